//! Writer settings and track descriptors
//!
//! Settings are plain serde types so they can live in a JSON configuration
//! file. A [`TrackDescriptor`] is what a backend actually receives: the
//! settings resolved into a flat track description.

use crate::flip::FlipOptions;
use crate::geometry::AffineTransform;
use crate::pixel::PixelFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Container file kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    #[default]
    Mov,
    Mp4,
}

impl FileKind {
    pub const ALL: [FileKind; 2] = [FileKind::Mov, FileKind::Mp4];

    /// File name extension, without the dot
    pub fn extension(&self) -> &'static str {
        match self {
            FileKind::Mov => "mov",
            FileKind::Mp4 => "mp4",
        }
    }

    /// Muxer name understood by `ffmpeg -f`
    pub fn ffmpeg_format(&self) -> &'static str {
        match self {
            FileKind::Mov => "mov",
            FileKind::Mp4 => "mp4",
        }
    }

    /// A unique, not yet existing path in the system temp directory
    pub fn temporary_path(&self) -> PathBuf {
        std::env::temp_dir().join(format!("{}.{}", uuid::Uuid::new_v4(), self.extension()))
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Video codec of the recorded track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VideoCodec {
    #[default]
    H264,
    Hevc,
    ProRes422,
    Jpeg,
}

impl VideoCodec {
    /// Encoder name understood by `ffmpeg -c:v`
    pub fn ffmpeg_encoder(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "libx264",
            VideoCodec::Hevc => "libx265",
            VideoCodec::ProRes422 => "prores_ks",
            VideoCodec::Jpeg => "mjpeg",
        }
    }
}

/// Audio format of the recorded track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioFormatId {
    #[default]
    Aac,
    LinearPcm,
    AppleLossless,
    Opus,
}

/// Frame size in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Description of the frames a video source will deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFormatHint {
    pub dimensions: Dimensions,
    pub pixel_format: PixelFormat,
}

/// Description of the samples an audio source will deliver
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormatHint {
    pub sample_rate: f64,
    pub channel_count: u32,
}

/// Attributes of the pixel buffers appended to a video track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelBufferAttributes {
    pub pixel_format: Option<PixelFormat>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// Video track settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum VideoSettings {
    /// Output size and layout follow the source format
    Auto {
        codec: VideoCodec,
        format_hint: VideoFormatHint,
        #[serde(default)]
        source_attributes: Option<PixelBufferAttributes>,
        #[serde(default)]
        flip_options: FlipOptions,
    },
    /// Explicit output size
    Custom {
        codec: VideoCodec,
        dimensions: Dimensions,
        #[serde(default)]
        source_attributes: Option<PixelBufferAttributes>,
        #[serde(default)]
        flip_options: FlipOptions,
    },
}

impl VideoSettings {
    pub fn codec(&self) -> VideoCodec {
        match self {
            VideoSettings::Auto { codec, .. } | VideoSettings::Custom { codec, .. } => *codec,
        }
    }

    pub fn flip_options(&self) -> FlipOptions {
        match self {
            VideoSettings::Auto { flip_options, .. }
            | VideoSettings::Custom { flip_options, .. } => *flip_options,
        }
    }

    pub fn source_attributes(&self) -> Option<PixelBufferAttributes> {
        match self {
            VideoSettings::Auto {
                source_attributes, ..
            }
            | VideoSettings::Custom {
                source_attributes, ..
            } => *source_attributes,
        }
    }

    /// Output frame size
    pub fn dimensions(&self) -> Dimensions {
        match self {
            VideoSettings::Auto { format_hint, .. } => format_hint.dimensions,
            VideoSettings::Custom { dimensions, .. } => *dimensions,
        }
    }
}

/// Audio track settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AudioSettings {
    Auto {
        format_id: AudioFormatId,
        format_hint: AudioFormatHint,
    },
    /// More than two channels require a channel layout
    Custom {
        format_id: AudioFormatId,
        sample_rate: f64,
        number_of_channels: u32,
        #[serde(default)]
        channel_layout: Option<Vec<u8>>,
    },
}

/// Which track of a writer an operation refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// A resolved video track
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrack {
    pub codec: VideoCodec,
    pub dimensions: Dimensions,
    /// Format of the frames that will be appended, when known up front
    pub source_format: Option<PixelFormat>,
    pub transform: AffineTransform,
    pub expects_realtime: bool,
}

/// A resolved audio track
#[derive(Debug, Clone, PartialEq)]
pub struct AudioTrack {
    pub format_id: AudioFormatId,
    pub sample_rate: f64,
    pub channel_count: u32,
    pub channel_layout: Option<Vec<u8>>,
}

/// A track as handed to a writer backend
#[derive(Debug, Clone, PartialEq)]
pub enum TrackDescriptor {
    Video(VideoTrack),
    Audio(AudioTrack),
}

impl TrackDescriptor {
    /// Video track whose transform encodes the settings' flip options
    pub fn video(settings: &VideoSettings, realtime: bool) -> Self {
        let source_format = match settings {
            VideoSettings::Auto { format_hint, .. } => Some(format_hint.pixel_format),
            VideoSettings::Custom { .. } => None,
        };

        Self::Video(VideoTrack {
            codec: settings.codec(),
            dimensions: settings.dimensions(),
            source_format,
            transform: settings.flip_options().transform(),
            expects_realtime: realtime,
        })
    }

    pub fn audio(settings: &AudioSettings) -> Self {
        let track = match settings {
            AudioSettings::Auto {
                format_id,
                format_hint,
            } => AudioTrack {
                format_id: *format_id,
                sample_rate: format_hint.sample_rate,
                channel_count: format_hint.channel_count,
                channel_layout: None,
            },
            AudioSettings::Custom {
                format_id,
                sample_rate,
                number_of_channels,
                channel_layout,
            } => AudioTrack {
                format_id: *format_id,
                sample_rate: *sample_rate,
                channel_count: *number_of_channels,
                channel_layout: channel_layout.clone(),
            },
        };

        Self::Audio(track)
    }

    pub fn kind(&self) -> TrackKind {
        match self {
            TrackDescriptor::Video(_) => TrackKind::Video,
            TrackDescriptor::Audio(_) => TrackKind::Audio,
        }
    }

    /// Transform of a video track, identity for audio
    pub fn transform(&self) -> AffineTransform {
        match self {
            TrackDescriptor::Video(track) => track.transform,
            TrackDescriptor::Audio(_) => AffineTransform::IDENTITY,
        }
    }
}
