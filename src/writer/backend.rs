//! Container writer backend traits
//!
//! An [`AssetWriter`] writes one container file. Writers are opened by an
//! [`AssetWriterFactory`] and driven exclusively by a
//! [`WriterSession`](super::WriterSession).

use super::settings::{FileKind, PixelBufferAttributes, TrackDescriptor, TrackKind};
use crate::media::{AudioSample, MediaTime};
use crate::pixel::PixelBuffer;
use crate::utils::BackendError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Readiness callback, invoked repeatedly while a track can accept more data
pub type ReadyCallback = Box<dyn FnMut() + Send + 'static>;

/// Lifecycle status reported by a writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterStatus {
    /// Opened, not writing yet
    #[default]
    Unknown,
    Writing,
    Completed,
    Failed,
    Cancelled,
}

impl WriterStatus {
    /// Whether the writer can no longer be finished or cancelled
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WriterStatus::Completed | WriterStatus::Failed | WriterStatus::Cancelled
        )
    }
}

/// One container file being written
pub trait AssetWriter: Send {
    fn output_path(&self) -> &Path;

    fn file_kind(&self) -> FileKind;

    /// Whether `track` would be accepted by [`AssetWriter::add_track`]
    fn can_add_track(&self, track: &TrackDescriptor) -> bool;

    fn add_track(
        &mut self,
        track: TrackDescriptor,
        source_attributes: Option<PixelBufferAttributes>,
    ) -> Result<(), BackendError>;

    /// Begin writing; returns false if the writer refuses to start
    fn start_writing(&mut self) -> bool;

    /// Set the timeline origin of the file
    fn start_session(&mut self, at: MediaTime);

    fn is_ready_for_more_data(&self, track: TrackKind) -> bool;

    fn append_video(&mut self, buffer: &PixelBuffer, presentation_time: MediaTime) -> bool;

    fn append_audio(&mut self, sample: &AudioSample) -> bool;

    /// Register `callback` for `track`, replacing any previous one
    fn request_media_data_when_ready(&mut self, track: TrackKind, callback: ReadyCallback);

    fn mark_as_finished(&mut self, track: TrackKind);

    /// Finalize the file. Blocks until the container is complete or failed.
    fn finish_writing(&mut self);

    /// Abandon the file. Blocks until the writer has stopped.
    fn cancel_writing(&mut self);

    fn status(&self) -> WriterStatus;

    /// Error behind a `Failed` status, if the writer reported one
    fn error(&self) -> Option<BackendError>;
}

/// Opens container writers
pub trait AssetWriterFactory: Send + Sync {
    fn open(&self, path: &Path, kind: FileKind) -> Result<Box<dyn AssetWriter>, BackendError>;
}
