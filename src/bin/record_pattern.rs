//! Record a generated test pattern through the FFmpeg backend.
//!
//! Every frame gets a progress bar overlay that follows the chosen flip.

use anyhow::{anyhow, bail, Context};
use camera_toolbox::flip::FlipOptions;
use camera_toolbox::geometry::Rect;
use camera_toolbox::media::MediaTime;
use camera_toolbox::pixel::{Color, PixelBuffer, PixelFormat};
use camera_toolbox::writer::{
    Dimensions, FfmpegBackend, FfmpegOptions, FileKind, PixelBufferAttributes, VideoCodec,
    VideoSettings,
};
use camera_toolbox::{Recorder, RecorderEvent, RecorderStatus, RecordingConfig};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Mov,
    Mp4,
}

impl From<KindArg> for FileKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Mov => FileKind::Mov,
            KindArg::Mp4 => FileKind::Mp4,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CodecArg {
    H264,
    Hevc,
    Prores,
    Jpeg,
}

impl From<CodecArg> for VideoCodec {
    fn from(codec: CodecArg) -> Self {
        match codec {
            CodecArg::H264 => VideoCodec::H264,
            CodecArg::Hevc => VideoCodec::Hevc,
            CodecArg::Prores => VideoCodec::ProRes422,
            CodecArg::Jpeg => VideoCodec::Jpeg,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "record-pattern", version, about = "Record a test pattern to a movie file")]
struct Args {
    /// Output file; a temporary file when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "mov")]
    kind: KindArg,

    #[arg(long, value_enum, default_value = "h264")]
    codec: CodecArg,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 360)]
    height: u32,

    /// Number of frames to record
    #[arg(long, default_value_t = 90)]
    frames: u32,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    #[arg(long)]
    flip_vertical: bool,

    #[arg(long)]
    flip_horizontal: bool,

    /// FFmpeg executable
    #[arg(long, default_value = "ffmpeg")]
    ffmpeg: PathBuf,
}

impl Args {
    fn flip_options(&self) -> FlipOptions {
        let mut flip = FlipOptions::empty();
        flip.set(FlipOptions::VERTICAL, self.flip_vertical);
        flip.set(FlipOptions::HORIZONTAL, self.flip_horizontal);
        flip
    }
}

/// Diagonal color bars that scroll one pixel per frame
fn pattern_frame(width: u32, height: u32, index: u32) -> anyhow::Result<PixelBuffer> {
    let buffer = PixelBuffer::new(width as usize, height as usize, PixelFormat::Bgra32)?;
    {
        let mut guard = buffer.lock()?;
        let plane = guard
            .plane_mut(0)
            .ok_or_else(|| anyhow!("BGRA buffer has no plane"))?;

        for y in 0..plane.height {
            let row = &mut plane.data[y * plane.bytes_per_row..][..plane.width * 4];
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let band = ((x + y + index as usize) / 32) % 3;
                let mut bgr = [32u8; 3];
                bgr[band] = 224;
                px.copy_from_slice(&[bgr[0], bgr[1], bgr[2], 255]);
            }
        }
    }
    Ok(buffer)
}

async fn wait_for_ready(events: &mut UnboundedReceiver<RecorderEvent>) -> anyhow::Result<()> {
    while let Some(event) = events.recv().await {
        match event {
            RecorderEvent::StatusChanged(RecorderStatus::Ready) => return Ok(()),
            RecorderEvent::InitializationFailed(e) => bail!("recorder failed to start: {e}"),
            _ => {}
        }
    }
    bail!("recorder event channel closed")
}

async fn wait_for_finish(events: &mut UnboundedReceiver<RecorderEvent>) -> anyhow::Result<PathBuf> {
    while let Some(event) = events.recv().await {
        if let RecorderEvent::Finished {
            output_path, error, ..
        } = event
        {
            return match error {
                Some(e) => Err(e).context("recording failed"),
                None => Ok(output_path),
            };
        }
    }
    bail!("recorder event channel closed")
}

async fn run(args: Args) -> anyhow::Result<()> {
    let backend = FfmpegBackend::new(FfmpegOptions {
        program: args.ffmpeg.clone(),
        frame_rate: args.fps,
        ..FfmpegOptions::default()
    });
    if !backend.is_available() {
        bail!("{} is not available", args.ffmpeg.display());
    }

    let flip = args.flip_options();
    let config = RecordingConfig {
        output_path: args.output.clone(),
        file_kind: args.kind.into(),
        video: VideoSettings::Custom {
            codec: args.codec.into(),
            dimensions: Dimensions::new(args.width, args.height),
            source_attributes: Some(PixelBufferAttributes {
                pixel_format: Some(PixelFormat::Bgra32),
                width: Some(args.width),
                height: Some(args.height),
            }),
            flip_options: flip,
        },
        audio: None,
        realtime: false,
    };

    let (recorder, mut events) =
        Recorder::new(Arc::new(backend), tokio::runtime::Handle::current());
    if !recorder.initialize(config) {
        bail!("recorder is busy");
    }
    wait_for_ready(&mut events).await?;
    tracing::info!("Recording {} frames with flip {:?}", args.frames, flip);

    for index in 0..args.frames {
        let frame = pattern_frame(args.width, args.height, index)?;
        let time = MediaTime::new(i64::from(index), args.fps as i32);
        let progress = f64::from(index + 1) / f64::from(args.frames);

        while !recorder.is_ready_for_more_video_data() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        let appended = recorder.append_video_with_overlay(&frame, time, |surface, bounds| {
            surface.fill_rect(Rect::new(0.0, 0.0, bounds.width(), 12.0), Color::BLACK);
            surface.fill_rect(
                Rect::new(0.0, 0.0, bounds.width() * progress, 12.0),
                Color::WHITE,
            );
            surface.fill_rect(Rect::new(8.0, 20.0, 24.0, 24.0), Color::RED);
        });
        if !appended {
            tracing::warn!("Frame {} was not appended", index);
        }
    }

    if !recorder.finish() {
        bail!("recorder was not recording");
    }
    let output = wait_for_finish(&mut events).await?;
    println!("{}", output.display());
    Ok(())
}

#[tokio::main]
async fn main() {
    camera_toolbox::init_logging();

    if let Err(e) = run(Args::parse()).await {
        tracing::error!("record-pattern failed: {:#}", e);
        eprintln!("record-pattern: {e:#}");
        std::process::exit(1);
    }
}
