//! In-process writer backend
//!
//! Keeps every call it receives in a [`WriterLog`] instead of producing a
//! file. Its behavior (track rejection, start refusal, readiness, finish
//! outcome) is adjustable at runtime, which makes it the backend of choice
//! for deterministic tests.

use super::backend::{AssetWriter, AssetWriterFactory, ReadyCallback, WriterStatus};
use super::settings::{FileKind, PixelBufferAttributes, TrackDescriptor, TrackKind};
use crate::media::{AudioSample, MediaTime};
use crate::pixel::PixelBuffer;
use crate::utils::BackendError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How `finish_writing` ends
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FinishOutcome {
    #[default]
    Complete,
    /// Fail, optionally reporting a cause
    Fail(Option<BackendError>),
}

#[derive(Debug, Clone, Default)]
struct Behavior {
    fail_open: Option<BackendError>,
    reject_video: bool,
    reject_audio: bool,
    refuse_start: bool,
    video_ready: bool,
    audio_ready: bool,
    finish_outcome: FinishOutcome,
}

/// Everything a memory writer was asked to do
#[derive(Debug, Clone)]
pub struct WriterLog {
    pub output_path: PathBuf,
    pub file_kind: FileKind,
    pub tracks: Vec<TrackDescriptor>,
    pub source_attributes: Option<PixelBufferAttributes>,
    pub session_starts: Vec<MediaTime>,
    pub video_frames: Vec<(MediaTime, PixelBuffer)>,
    pub audio_samples: Vec<MediaTime>,
    pub finished_tracks: Vec<TrackKind>,
    pub finish_calls: usize,
    pub cancel_calls: usize,
    pub status: WriterStatus,
    pub error: Option<BackendError>,
}

impl WriterLog {
    fn new(output_path: &Path, file_kind: FileKind) -> Self {
        Self {
            output_path: output_path.to_path_buf(),
            file_kind,
            tracks: Vec::new(),
            source_attributes: None,
            session_starts: Vec::new(),
            video_frames: Vec::new(),
            audio_samples: Vec::new(),
            finished_tracks: Vec::new(),
            finish_calls: 0,
            cancel_calls: 0,
            status: WriterStatus::Unknown,
            error: None,
        }
    }

    fn has_track(&self, kind: TrackKind) -> bool {
        self.tracks.iter().any(|t| t.kind() == kind)
    }
}

struct WriterState {
    log: WriterLog,
    callbacks: HashMap<TrackKind, ReadyCallback>,
}

struct Inner {
    behavior: Mutex<Behavior>,
    writers: Mutex<Vec<Arc<Mutex<WriterState>>>>,
}

/// Factory for memory writers; clones share configuration and logs
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// A backend that accepts everything and is always ready
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                behavior: Mutex::new(Behavior {
                    video_ready: true,
                    audio_ready: true,
                    ..Behavior::default()
                }),
                writers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Make `open` fail with `error`, or succeed again with `None`
    pub fn fail_open(&self, error: Option<BackendError>) {
        self.inner.behavior.lock().fail_open = error;
    }

    pub fn reject_video(&self, reject: bool) {
        self.inner.behavior.lock().reject_video = reject;
    }

    pub fn reject_audio(&self, reject: bool) {
        self.inner.behavior.lock().reject_audio = reject;
    }

    pub fn refuse_start(&self, refuse: bool) {
        self.inner.behavior.lock().refuse_start = refuse;
    }

    pub fn set_ready(&self, track: TrackKind, ready: bool) {
        let mut behavior = self.inner.behavior.lock();
        match track {
            TrackKind::Video => behavior.video_ready = ready,
            TrackKind::Audio => behavior.audio_ready = ready,
        }
    }

    pub fn set_finish_outcome(&self, outcome: FinishOutcome) {
        self.inner.behavior.lock().finish_outcome = outcome;
    }

    /// Force the status of the most recently opened writer
    pub fn set_status(&self, status: WriterStatus) {
        if let Some(writer) = self.inner.writers.lock().last() {
            writer.lock().log.status = status;
        }
    }

    /// Invoke the readiness callback registered on the latest writer.
    ///
    /// Returns false when no callback is registered for `track`.
    pub fn signal_ready(&self, track: TrackKind) -> bool {
        let Some(writer) = self.inner.writers.lock().last().cloned() else {
            return false;
        };

        let mut state = writer.lock();
        match state.callbacks.get_mut(&track) {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Snapshot of the most recently opened writer
    pub fn last_writer(&self) -> Option<WriterLog> {
        self.inner
            .writers
            .lock()
            .last()
            .map(|w| w.lock().log.clone())
    }

    pub fn writer_count(&self) -> usize {
        self.inner.writers.lock().len()
    }
}

impl AssetWriterFactory for MemoryBackend {
    fn open(&self, path: &Path, kind: FileKind) -> Result<Box<dyn AssetWriter>, BackendError> {
        if let Some(error) = self.inner.behavior.lock().fail_open.clone() {
            return Err(error);
        }

        let state = Arc::new(Mutex::new(WriterState {
            log: WriterLog::new(path, kind),
            callbacks: HashMap::new(),
        }));
        self.inner.writers.lock().push(state.clone());

        Ok(Box::new(MemoryWriter {
            output_path: path.to_path_buf(),
            file_kind: kind,
            state,
            backend: self.inner.clone(),
        }))
    }
}

struct MemoryWriter {
    output_path: PathBuf,
    file_kind: FileKind,
    state: Arc<Mutex<WriterState>>,
    backend: Arc<Inner>,
}

impl AssetWriter for MemoryWriter {
    fn output_path(&self) -> &Path {
        &self.output_path
    }

    fn file_kind(&self) -> FileKind {
        self.file_kind
    }

    fn can_add_track(&self, track: &TrackDescriptor) -> bool {
        let behavior = self.backend.behavior.lock();
        let state = self.state.lock();

        if state.log.status != WriterStatus::Unknown || state.log.has_track(track.kind()) {
            return false;
        }

        match track {
            TrackDescriptor::Video(_) => !behavior.reject_video,
            TrackDescriptor::Audio(audio) => {
                !behavior.reject_audio
                    && audio.channel_count > 0
                    && (audio.channel_count <= 2 || audio.channel_layout.is_some())
            }
        }
    }

    fn add_track(
        &mut self,
        track: TrackDescriptor,
        source_attributes: Option<PixelBufferAttributes>,
    ) -> Result<(), BackendError> {
        if !self.can_add_track(&track) {
            return Err(BackendError::Rejected(format!("{:?} track", track.kind())));
        }

        let mut state = self.state.lock();
        if track.kind() == TrackKind::Video {
            state.log.source_attributes = source_attributes;
        }
        state.log.tracks.push(track);
        Ok(())
    }

    fn start_writing(&mut self) -> bool {
        let refuse = self.backend.behavior.lock().refuse_start;
        let mut state = self.state.lock();

        if refuse || !state.log.has_track(TrackKind::Video) {
            state.log.status = WriterStatus::Failed;
            return false;
        }

        state.log.status = WriterStatus::Writing;
        true
    }

    fn start_session(&mut self, at: MediaTime) {
        self.state.lock().log.session_starts.push(at);
    }

    fn is_ready_for_more_data(&self, track: TrackKind) -> bool {
        let ready = {
            let behavior = self.backend.behavior.lock();
            match track {
                TrackKind::Video => behavior.video_ready,
                TrackKind::Audio => behavior.audio_ready,
            }
        };

        let state = self.state.lock();
        ready
            && state.log.status == WriterStatus::Writing
            && state.log.has_track(track)
            && !state.log.finished_tracks.contains(&track)
    }

    fn append_video(&mut self, buffer: &PixelBuffer, presentation_time: MediaTime) -> bool {
        if !self.is_ready_for_more_data(TrackKind::Video) {
            return false;
        }

        self.state
            .lock()
            .log
            .video_frames
            .push((presentation_time, buffer.clone()));
        true
    }

    fn append_audio(&mut self, sample: &AudioSample) -> bool {
        if !self.is_ready_for_more_data(TrackKind::Audio) {
            return false;
        }

        self.state
            .lock()
            .log
            .audio_samples
            .push(sample.presentation_time);
        true
    }

    fn request_media_data_when_ready(&mut self, track: TrackKind, callback: ReadyCallback) {
        self.state.lock().callbacks.insert(track, callback);
    }

    fn mark_as_finished(&mut self, track: TrackKind) {
        let mut state = self.state.lock();
        if !state.log.finished_tracks.contains(&track) {
            state.log.finished_tracks.push(track);
        }
        state.callbacks.remove(&track);
    }

    fn finish_writing(&mut self) {
        let outcome = self.backend.behavior.lock().finish_outcome.clone();
        let mut state = self.state.lock();
        state.log.finish_calls += 1;
        state.callbacks.clear();

        if state.log.status != WriterStatus::Writing {
            return;
        }

        match outcome {
            FinishOutcome::Complete => state.log.status = WriterStatus::Completed,
            FinishOutcome::Fail(error) => {
                state.log.status = WriterStatus::Failed;
                state.log.error = error;
            }
        }
    }

    fn cancel_writing(&mut self) {
        let mut state = self.state.lock();
        state.log.cancel_calls += 1;
        state.callbacks.clear();
        state.log.status = WriterStatus::Cancelled;
    }

    fn status(&self) -> WriterStatus {
        self.state.lock().log.status
    }

    fn error(&self) -> Option<BackendError> {
        self.state.lock().log.error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flip::FlipOptions;
    use crate::writer::settings::{Dimensions, VideoCodec, VideoSettings};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn video_track() -> TrackDescriptor {
        TrackDescriptor::video(
            &VideoSettings::Custom {
                codec: VideoCodec::H264,
                dimensions: Dimensions::new(2, 2),
                source_attributes: None,
                flip_options: FlipOptions::empty(),
            },
            false,
        )
    }

    #[test]
    fn test_writer_refuses_second_video_track() {
        let backend = MemoryBackend::new();
        let mut writer = backend.open(Path::new("out.mp4"), FileKind::Mp4).unwrap();

        assert!(writer.add_track(video_track(), None).is_ok());
        assert!(!writer.can_add_track(&video_track()));
        assert!(matches!(
            writer.add_track(video_track(), None),
            Err(BackendError::Rejected(_))
        ));
    }

    #[test]
    fn test_finished_track_is_never_ready() {
        let backend = MemoryBackend::new();
        let mut writer = backend.open(Path::new("out.mp4"), FileKind::Mp4).unwrap();
        writer.add_track(video_track(), None).unwrap();
        assert!(!writer.is_ready_for_more_data(TrackKind::Video));

        assert!(writer.start_writing());
        assert!(writer.is_ready_for_more_data(TrackKind::Video));

        writer.mark_as_finished(TrackKind::Video);
        assert!(!writer.is_ready_for_more_data(TrackKind::Video));
        assert_eq!(backend.last_writer().unwrap().finished_tracks, vec![TrackKind::Video]);
    }

    #[test]
    fn test_signal_ready_invokes_registered_callback_repeatedly() {
        let backend = MemoryBackend::new();
        let mut writer = backend.open(Path::new("out.mov"), FileKind::Mov).unwrap();
        assert!(!backend.signal_ready(TrackKind::Video));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        writer.request_media_data_when_ready(
            TrackKind::Video,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(backend.signal_ready(TrackKind::Video));
        assert!(backend.signal_ready(TrackKind::Video));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
