//! Container writing
//!
//! - `AssetWriter` / `AssetWriterFactory` traits for container backends
//! - `WriterSession`, the single-use wrapper the recorder drives
//! - Memory and FFmpeg backends

pub mod backend;
pub mod ffmpeg;
pub mod memory;
pub mod session;
pub mod settings;

pub use backend::{AssetWriter, AssetWriterFactory, ReadyCallback, WriterStatus};
pub use ffmpeg::{FfmpegBackend, FfmpegOptions};
pub use memory::{FinishOutcome, MemoryBackend, WriterLog};
pub use session::{SessionInfo, WriterSession};
pub use settings::{
    AudioFormatHint, AudioFormatId, AudioSettings, AudioTrack, Dimensions, FileKind,
    PixelBufferAttributes, TrackDescriptor, TrackKind, VideoCodec, VideoFormatHint, VideoSettings,
    VideoTrack,
};
