//! FFmpeg writer backend
//!
//! Video frames are packed (row padding stripped) and queued to a worker
//! thread that pipes them as `rawvideo` into an `ffmpeg` child process.
//! The queue depth is the backpressure limit: a full queue makes the track
//! report not-ready. Flips are baked into the encoded frames with the
//! `hflip`/`vflip` filters.
//!
//! Frames are encoded at a constant frame rate; presentation times only
//! order the input. Audio tracks are not supported.

use super::backend::{AssetWriter, AssetWriterFactory, ReadyCallback, WriterStatus};
use super::settings::{FileKind, PixelBufferAttributes, TrackDescriptor, TrackKind, VideoTrack};
use crate::flip::FlipOptions;
use crate::media::{AudioSample, MediaTime};
use crate::pixel::{PixelBuffer, PixelFormat};
use crate::utils::BackendError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// How often an idle worker re-announces readiness
const READY_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Bytes of ffmpeg's stderr kept for error reports
const STDERR_TAIL: usize = 8 * 1024;

/// Encoder options shared by every writer a backend opens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FfmpegOptions {
    /// FFmpeg executable
    pub program: PathBuf,
    pub frame_rate: u32,
    /// Constant rate factor for the x264/x265 encoders
    pub crf: u8,
    /// Frames buffered before the video track reports backpressure
    pub queue_depth: usize,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            frame_rate: 30,
            crf: 18,
            queue_depth: 8,
        }
    }
}

/// Writer factory backed by the `ffmpeg` executable
#[derive(Debug, Clone, Default)]
pub struct FfmpegBackend {
    options: FfmpegOptions,
}

impl FfmpegBackend {
    pub fn new(options: FfmpegOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &FfmpegOptions {
        &self.options
    }

    /// Whether the configured executable can be run
    pub fn is_available(&self) -> bool {
        Command::new(&self.options.program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl AssetWriterFactory for FfmpegBackend {
    fn open(&self, path: &Path, kind: FileKind) -> Result<Box<dyn AssetWriter>, BackendError> {
        if !self.is_available() {
            return Err(BackendError::Process(format!(
                "FFmpeg not found at {:?}. Please install FFmpeg",
                self.options.program
            )));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        Ok(Box::new(FfmpegWriter {
            options: self.options.clone(),
            output_path: path.to_path_buf(),
            file_kind: kind,
            video: None,
            input: None,
            status: WriterStatus::Unknown,
            error: None,
            pipeline: None,
            pump: Arc::new(Pump::default()),
        }))
    }
}

/// Size and layout of the frames piped into ffmpeg
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InputFormat {
    width: usize,
    height: usize,
    pixel_format: PixelFormat,
}

/// State shared between a writer and its worker thread
#[derive(Default)]
struct Pump {
    queued: AtomicUsize,
    frames_written: AtomicU64,
    finished: AtomicBool,
    failed: AtomicBool,
    callback: Mutex<Option<ReadyCallback>>,
}

impl Pump {
    fn has_room(&self, depth: usize) -> bool {
        self.queued.load(Ordering::SeqCst) < depth
    }

    fn announce_ready(&self, depth: usize) {
        if self.finished.load(Ordering::SeqCst) || !self.has_room(depth) {
            return;
        }

        if let Some(callback) = self.callback.lock().as_mut() {
            callback();
        }
    }
}

struct Pipeline {
    child: Child,
    frames: Option<SyncSender<Vec<u8>>>,
    worker: Option<JoinHandle<std::io::Result<()>>>,
    /// Drains stderr so ffmpeg never blocks on it; yields the tail
    stderr: Option<JoinHandle<String>>,
}

impl Pipeline {
    /// What ffmpeg last wrote to stderr. Call after the child exited.
    fn stderr_tail(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default()
    }
}

struct FfmpegWriter {
    options: FfmpegOptions,
    output_path: PathBuf,
    file_kind: FileKind,
    video: Option<VideoTrack>,
    input: Option<InputFormat>,
    status: WriterStatus,
    error: Option<BackendError>,
    pipeline: Option<Pipeline>,
    pump: Arc<Pump>,
}

impl FfmpegWriter {
    fn input_format(track: &VideoTrack, attributes: Option<PixelBufferAttributes>) -> InputFormat {
        let attributes = attributes.unwrap_or_default();
        InputFormat {
            width: attributes
                .width
                .unwrap_or(track.dimensions.width) as usize,
            height: attributes
                .height
                .unwrap_or(track.dimensions.height) as usize,
            pixel_format: attributes
                .pixel_format
                .or(track.source_format)
                .unwrap_or_default(),
        }
    }

    fn ffmpeg_args(&self, track: &VideoTrack, input: InputFormat) -> Vec<String> {
        let mut filters = Vec::new();
        let flip = FlipOptions::from_transform(&track.transform);
        if flip.contains(FlipOptions::HORIZONTAL) {
            filters.push("hflip".to_string());
        }
        if flip.contains(FlipOptions::VERTICAL) {
            filters.push("vflip".to_string());
        }
        let output = track.dimensions;
        if output.width as usize != input.width || output.height as usize != input.height {
            filters.push(format!("scale={}:{}", output.width, output.height));
        }

        let mut args: Vec<String> = vec![
            "-y".into(),
            "-nostats".into(),
            "-loglevel".into(),
            "error".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pixel_format".into(),
            input.pixel_format.ffmpeg_name().into(),
            "-video_size".into(),
            format!("{}x{}", input.width, input.height),
            "-framerate".into(),
            self.options.frame_rate.to_string(),
            "-i".into(),
            "-".into(),
        ];

        if !filters.is_empty() {
            args.push("-vf".into());
            args.push(filters.join(","));
        }

        args.push("-c:v".into());
        args.push(track.codec.ffmpeg_encoder().into());
        match track.codec.ffmpeg_encoder() {
            "libx264" | "libx265" => {
                let preset = if track.expects_realtime { "veryfast" } else { "medium" };
                args.extend(["-preset", preset].map(String::from));
                args.extend(["-crf".to_string(), self.options.crf.to_string()]);
                args.extend(["-pix_fmt", "yuv420p"].map(String::from));
            }
            "mjpeg" => args.extend(["-pix_fmt", "yuvj420p"].map(String::from)),
            _ => {}
        }

        if self.file_kind == FileKind::Mp4 {
            args.extend(["-movflags", "+faststart"].map(String::from));
        }

        args.push("-f".into());
        args.push(self.file_kind.ffmpeg_format().into());
        args.push(self.output_path.to_string_lossy().into_owned());
        args
    }

    fn spawn_worker(
        mut stdin: ChildStdin,
        frames: mpsc::Receiver<Vec<u8>>,
        pump: Arc<Pump>,
        depth: usize,
    ) -> std::io::Result<JoinHandle<std::io::Result<()>>> {
        std::thread::Builder::new()
            .name("ffmpeg-writer".into())
            .spawn(move || {
                loop {
                    match frames.recv_timeout(READY_POLL_INTERVAL) {
                        Ok(frame) => {
                            let result = stdin.write_all(&frame);
                            pump.queued.fetch_sub(1, Ordering::SeqCst);
                            if let Err(e) = result {
                                pump.failed.store(true, Ordering::SeqCst);
                                return Err(e);
                            }
                            pump.frames_written.fetch_add(1, Ordering::Relaxed);
                            pump.announce_ready(depth);
                        }
                        Err(RecvTimeoutError::Timeout) => pump.announce_ready(depth),
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                // Closing stdin signals EOF to ffmpeg
                drop(stdin);
                Ok(())
            })
    }

    fn spawn_stderr_reader(mut stderr: ChildStderr) -> std::io::Result<JoinHandle<String>> {
        std::thread::Builder::new()
            .name("ffmpeg-stderr".into())
            .spawn(move || {
                let mut tail = Vec::new();
                let mut chunk = [0u8; 4096];
                loop {
                    match stderr.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            tail.extend_from_slice(&chunk[..n]);
                            if tail.len() > STDERR_TAIL {
                                tail.drain(..tail.len() - STDERR_TAIL);
                            }
                        }
                    }
                }
                String::from_utf8_lossy(&tail).into_owned()
            })
    }

    /// Copy the visible bytes of every plane, without row padding
    fn pack(&self, buffer: &PixelBuffer) -> Option<Vec<u8>> {
        let input = self.input?;
        if buffer.width() != input.width
            || buffer.height() != input.height
            || buffer.format() != input.pixel_format
        {
            tracing::warn!(
                "Dropping {}x{} {} frame, writer expects {}x{} {}",
                buffer.width(),
                buffer.height(),
                buffer.format(),
                input.width,
                input.height,
                input.pixel_format
            );
            return None;
        }

        let guard = match buffer.lock() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!("Failed to read frame: {}", e);
                return None;
            }
        };

        let mut packed = Vec::new();
        for index in 0..guard.region_count() {
            let plane = guard.plane(index)?;
            packed.reserve(plane.width * plane.bytes_per_pixel * plane.height);
            for y in 0..plane.height {
                packed.extend_from_slice(plane.row(y));
            }
        }
        Some(packed)
    }

    /// Stop feeding ffmpeg and wait for the worker to drain the queue
    fn close_input(&mut self) -> Result<(), BackendError> {
        self.pump.finished.store(true, Ordering::SeqCst);
        self.pump.callback.lock().take();

        let Some(pipeline) = self.pipeline.as_mut() else {
            return Ok(());
        };

        pipeline.frames.take();
        match pipeline.worker.take().map(|w| w.join()) {
            Some(Ok(Err(e))) => Err(BackendError::Io(e.to_string())),
            Some(Err(_)) => Err(BackendError::Failed("writer thread panicked".into())),
            _ => Ok(()),
        }
    }

    fn fail(&mut self, error: BackendError) {
        tracing::error!("FFmpeg writer failed: {}", error);
        self.status = WriterStatus::Failed;
        self.error = Some(error);
    }
}

impl AssetWriter for FfmpegWriter {
    fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn file_kind(&self) -> FileKind {
        self.file_kind
    }

    fn can_add_track(&self, track: &TrackDescriptor) -> bool {
        match track {
            TrackDescriptor::Video(video) => {
                self.status == WriterStatus::Unknown
                    && self.video.is_none()
                    && video.dimensions.width > 0
                    && video.dimensions.height > 0
            }
            TrackDescriptor::Audio(_) => false,
        }
    }

    fn add_track(
        &mut self,
        track: TrackDescriptor,
        source_attributes: Option<PixelBufferAttributes>,
    ) -> Result<(), BackendError> {
        if !self.can_add_track(&track) {
            return Err(BackendError::Rejected(format!(
                "{:?} track not supported by the FFmpeg writer",
                track.kind()
            )));
        }

        if let TrackDescriptor::Video(video) = track {
            self.input = Some(Self::input_format(&video, source_attributes));
            self.video = Some(video);
        }
        Ok(())
    }

    fn start_writing(&mut self) -> bool {
        if self.status != WriterStatus::Unknown {
            return false;
        }
        let (Some(track), Some(input)) = (self.video.clone(), self.input) else {
            self.fail(BackendError::Rejected("no video track".into()));
            return false;
        };

        let args = self.ffmpeg_args(&track, input);
        let child = Command::new(&self.options.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                self.fail(BackendError::Process(format!("Failed to start FFmpeg: {}", e)));
                return false;
            }
        };

        let Some(stdin) = child.stdin.take() else {
            let _ = child.kill();
            self.fail(BackendError::Process("Failed to capture FFmpeg stdin".into()));
            return false;
        };

        let stderr = match child.stderr.take().map(Self::spawn_stderr_reader).transpose() {
            Ok(stderr) => stderr,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                self.fail(BackendError::Io(e.to_string()));
                return false;
            }
        };

        let depth = self.options.queue_depth.max(1);
        let (tx, rx) = mpsc::sync_channel(depth);
        let worker = match Self::spawn_worker(stdin, rx, self.pump.clone(), depth) {
            Ok(worker) => worker,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                self.fail(BackendError::Io(e.to_string()));
                return false;
            }
        };

        tracing::info!(
            "Started FFmpeg writer: {}x{} {} @ {}fps, {:?} -> {:?}",
            input.width,
            input.height,
            input.pixel_format,
            self.options.frame_rate,
            track.codec,
            self.output_path
        );

        self.pipeline = Some(Pipeline {
            child,
            frames: Some(tx),
            worker: Some(worker),
            stderr,
        });
        self.status = WriterStatus::Writing;
        true
    }

    fn start_session(&mut self, at: MediaTime) {
        tracing::debug!("FFmpeg session starts at {}", at);
    }

    fn is_ready_for_more_data(&self, track: TrackKind) -> bool {
        track == TrackKind::Video
            && self.status == WriterStatus::Writing
            && !self.pump.finished.load(Ordering::SeqCst)
            && !self.pump.failed.load(Ordering::SeqCst)
            && self.pump.has_room(self.options.queue_depth.max(1))
    }

    fn append_video(&mut self, buffer: &PixelBuffer, presentation_time: MediaTime) -> bool {
        if !self.is_ready_for_more_data(TrackKind::Video) {
            return false;
        }

        let Some(frame) = self.pack(buffer) else {
            return false;
        };

        let Some(sender) = self.pipeline.as_ref().and_then(|p| p.frames.as_ref()) else {
            return false;
        };

        self.pump.queued.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.pump.queued.fetch_sub(1, Ordering::SeqCst);
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.pump.queued.fetch_sub(1, Ordering::SeqCst);
                self.fail(BackendError::Process(format!(
                    "FFmpeg stopped accepting frames at {}",
                    presentation_time
                )));
                false
            }
        }
    }

    fn append_audio(&mut self, _sample: &AudioSample) -> bool {
        false
    }

    fn request_media_data_when_ready(&mut self, track: TrackKind, callback: ReadyCallback) {
        if track == TrackKind::Video {
            *self.pump.callback.lock() = Some(callback);
        }
    }

    fn mark_as_finished(&mut self, track: TrackKind) {
        if track != TrackKind::Video {
            return;
        }

        self.pump.finished.store(true, Ordering::SeqCst);
        self.pump.callback.lock().take();
        if let Some(pipeline) = self.pipeline.as_mut() {
            pipeline.frames.take();
        }
    }

    fn finish_writing(&mut self) {
        if self.status != WriterStatus::Writing {
            return;
        }

        let drained = self.close_input();

        let Some(mut pipeline) = self.pipeline.take() else {
            return;
        };

        let exit = match pipeline.child.wait() {
            Ok(exit) => exit,
            Err(e) => {
                self.fail(BackendError::Io(e.to_string()));
                return;
            }
        };
        let stderr = pipeline.stderr_tail();

        let frames = self.pump.frames_written.load(Ordering::Relaxed);
        if !exit.success() {
            self.fail(BackendError::Process(format!(
                "FFmpeg exited with status {}: {}",
                exit,
                stderr.trim()
            )));
            return;
        }

        if let Err(e) = drained {
            self.fail(e);
            return;
        }

        tracing::info!(
            "FFmpeg writer finished: {} frames, output: {:?}",
            frames,
            self.output_path
        );
        self.status = WriterStatus::Completed;
    }

    fn cancel_writing(&mut self) {
        if self.status.is_terminal() {
            return;
        }

        if let Some(pipeline) = self.pipeline.as_mut() {
            let _ = pipeline.child.kill();
        }
        let _ = self.close_input();
        if let Some(mut pipeline) = self.pipeline.take() {
            let _ = pipeline.child.wait();
            pipeline.stderr_tail();
        }

        if self.output_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.output_path) {
                tracing::warn!("Failed to remove cancelled output {:?}: {}", self.output_path, e);
            }
        }

        tracing::info!("FFmpeg writer cancelled: {:?}", self.output_path);
        self.status = WriterStatus::Cancelled;
    }

    fn status(&self) -> WriterStatus {
        self.status
    }

    fn error(&self) -> Option<BackendError> {
        self.error.clone()
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if let Some(mut pipeline) = self.pipeline.take() {
            pipeline.frames.take();
            let _ = pipeline.child.kill();
            let _ = pipeline.child.wait();
        }
    }
}
