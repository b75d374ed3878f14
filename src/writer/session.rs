//! Single-use writer session
//!
//! Bundles one container writer with its video track and optional audio
//! track. A session is built all-or-nothing and consumed by `finish` or
//! `cancel`, so it can never be written to after its terminal transition.

use super::backend::{AssetWriter, AssetWriterFactory, ReadyCallback, WriterStatus};
use super::settings::{FileKind, PixelBufferAttributes, TrackDescriptor, TrackKind};
use crate::flip::FlipOptions;
use crate::media::{AudioSample, MediaTime};
use crate::pixel::PixelBuffer;
use crate::utils::RecorderError;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;

/// Path, kind and flip of a session, kept by the recorder while it closes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub output_path: PathBuf,
    pub file_kind: FileKind,
    pub flip_options: FlipOptions,
}

pub struct WriterSession {
    writer: Box<dyn AssetWriter>,
    info: SessionInfo,
    has_audio: bool,
}

impl fmt::Debug for WriterSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterSession")
            .field("info", &self.info)
            .field("has_audio", &self.has_audio)
            .field("status", &self.writer.status())
            .finish()
    }
}

impl WriterSession {
    /// Open a writer, attach the tracks and start writing.
    ///
    /// A rejected audio track is dropped and the session records video only.
    pub fn open(
        factory: &dyn AssetWriterFactory,
        output_path: &Path,
        file_kind: FileKind,
        video: TrackDescriptor,
        audio: Option<TrackDescriptor>,
        source_attributes: Option<PixelBufferAttributes>,
    ) -> Result<Self, RecorderError> {
        let mut writer = factory.open(output_path, file_kind)?;

        if video.kind() != TrackKind::Video || !writer.can_add_track(&video) {
            return Err(RecorderError::InvalidVideoInput);
        }

        let flip_options = FlipOptions::from_transform(&video.transform());
        writer
            .add_track(video, source_attributes)
            .map_err(|e| {
                tracing::warn!("Video track rejected: {}", e);
                RecorderError::InvalidVideoInput
            })?;

        let has_audio = match audio {
            Some(track) if track.kind() == TrackKind::Audio && writer.can_add_track(&track) => {
                match writer.add_track(track, None) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!("Audio track rejected, recording video only: {}", e);
                        false
                    }
                }
            }
            Some(_) => {
                tracing::debug!("Audio track not accepted, recording video only");
                false
            }
            None => false,
        };

        if !writer.start_writing() {
            return Err(RecorderError::FailedToStartWriting);
        }

        tracing::info!(
            "Writer session opened: {:?} ({}, audio: {}, flip: {:?})",
            output_path,
            file_kind,
            has_audio,
            flip_options
        );

        Ok(Self {
            writer,
            info: SessionInfo {
                output_path: output_path.to_path_buf(),
                file_kind,
                flip_options,
            },
            has_audio,
        })
    }

    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    pub fn output_path(&self) -> &Path {
        &self.info.output_path
    }

    pub fn file_kind(&self) -> FileKind {
        self.info.file_kind
    }

    /// Flip recovered from the video track's transform
    pub fn flip_options(&self) -> FlipOptions {
        self.info.flip_options
    }

    pub fn has_audio_track(&self) -> bool {
        self.has_audio
    }

    pub fn status(&self) -> WriterStatus {
        self.writer.status()
    }

    pub fn is_cancellable(&self) -> bool {
        !self.writer.status().is_terminal()
    }

    pub fn is_ready_for_more_video_data(&self) -> bool {
        self.writer.is_ready_for_more_data(TrackKind::Video)
    }

    pub fn is_ready_for_more_audio_data(&self) -> bool {
        self.has_audio && self.writer.is_ready_for_more_data(TrackKind::Audio)
    }

    pub fn set_start_time(&mut self, at: MediaTime) {
        tracing::debug!("Session starts at {}", at);
        self.writer.start_session(at);
    }

    /// Returns false under backpressure; retry once the track is ready
    pub fn append_video_data(
        &mut self,
        buffer: &PixelBuffer,
        presentation_time: MediaTime,
    ) -> bool {
        if !self.is_ready_for_more_video_data() {
            return false;
        }

        self.writer.append_video(buffer, presentation_time)
    }

    pub fn append_audio_data(&mut self, sample: &AudioSample) -> bool {
        if !self.is_ready_for_more_audio_data() {
            return false;
        }

        self.writer.append_audio(sample)
    }

    pub fn request_video_data_when_ready(&mut self, callback: ReadyCallback) {
        self.writer
            .request_media_data_when_ready(TrackKind::Video, callback);
    }

    /// Returns false when there is no audio track
    pub fn request_audio_data_when_ready(&mut self, callback: ReadyCallback) -> bool {
        if !self.has_audio {
            return false;
        }

        self.writer
            .request_media_data_when_ready(TrackKind::Audio, callback);
        true
    }

    pub fn mark_video_as_finished(&mut self) {
        self.writer.mark_as_finished(TrackKind::Video);
    }

    pub fn mark_audio_as_finished(&mut self) -> bool {
        if !self.has_audio {
            return false;
        }

        self.writer.mark_as_finished(TrackKind::Audio);
        true
    }

    /// Abandon the file.
    ///
    /// `completion` receives the output path. It runs on `runtime` even when
    /// the writer is already terminal and nothing needs cancelling.
    pub fn cancel<F>(self, runtime: &Handle, completion: F)
    where
        F: FnOnce(PathBuf) + Send + 'static,
    {
        let output_path = self.info.output_path.clone();

        if !self.is_cancellable() {
            tracing::debug!("Writer already {:?}, nothing to cancel", self.status());
            runtime.spawn(async move {
                completion(output_path);
            });
            return;
        }

        let mut session = self;
        runtime.spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                session.writer.cancel_writing();
            })
            .await;

            if let Err(e) = result {
                tracing::error!("Cancel task failed: {}", e);
            }

            tracing::info!("Writer session cancelled: {:?}", output_path);
            completion(output_path);
        });
    }

    /// Finalize the file.
    ///
    /// `completion` receives the output path and `None` on success. A failed
    /// writer yields `Internal` when it reported a cause, `Unknown` otherwise.
    pub fn finish<F>(self, runtime: &Handle, completion: F)
    where
        F: FnOnce(PathBuf, Option<RecorderError>) + Send + 'static,
    {
        let output_path = self.info.output_path.clone();
        let mut session = self;

        runtime.spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                session.writer.finish_writing();
                (session.writer.status(), session.writer.error())
            })
            .await;

            let error = match result {
                Ok((WriterStatus::Completed, _)) => None,
                Ok((_, Some(cause))) => Some(RecorderError::Internal(cause)),
                Ok((_, None)) => Some(RecorderError::Unknown),
                Err(e) => {
                    tracing::error!("Finish task failed: {}", e);
                    Some(RecorderError::Unknown)
                }
            };

            match &error {
                None => tracing::info!("Writer session finished: {:?}", output_path),
                Some(e) => tracing::warn!("Writer session failed: {:?}: {}", output_path, e),
            }

            completion(output_path, error);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::BackendError;
    use crate::writer::memory::{FinishOutcome, MemoryBackend};
    use crate::writer::settings::{
        AudioFormatId, AudioSettings, Dimensions, VideoCodec, VideoSettings,
    };
    use tokio::sync::oneshot;

    fn video(flip: FlipOptions) -> TrackDescriptor {
        TrackDescriptor::video(
            &VideoSettings::Custom {
                codec: VideoCodec::H264,
                dimensions: Dimensions::new(4, 4),
                source_attributes: None,
                flip_options: flip,
            },
            true,
        )
    }

    fn audio(channels: u32) -> TrackDescriptor {
        TrackDescriptor::audio(&AudioSettings::Custom {
            format_id: AudioFormatId::Aac,
            sample_rate: 44_100.0,
            number_of_channels: channels,
            channel_layout: None,
        })
    }

    fn open(
        backend: &MemoryBackend,
        audio_track: Option<TrackDescriptor>,
    ) -> Result<WriterSession, RecorderError> {
        WriterSession::open(
            backend,
            Path::new("/tmp/session.mov"),
            FileKind::Mov,
            video(FlipOptions::VERTICAL),
            audio_track,
            None,
        )
    }

    #[test]
    fn test_open_derives_flip_from_track_transform() {
        let backend = MemoryBackend::new();
        let session = open(&backend, Some(audio(2))).unwrap();

        assert_eq!(session.flip_options(), FlipOptions::VERTICAL);
        assert!(session.has_audio_track());
        assert_eq!(session.status(), WriterStatus::Writing);
        assert_eq!(backend.last_writer().unwrap().tracks.len(), 2);
    }

    #[test]
    fn test_open_failures_map_to_recorder_errors() {
        let backend = MemoryBackend::new();

        backend.fail_open(Some(BackendError::Io("read-only".into())));
        assert_eq!(
            open(&backend, None).unwrap_err(),
            RecorderError::Internal(BackendError::Io("read-only".into()))
        );
        backend.fail_open(None);

        backend.reject_video(true);
        assert_eq!(open(&backend, None).unwrap_err(), RecorderError::InvalidVideoInput);
        backend.reject_video(false);

        backend.refuse_start(true);
        assert_eq!(open(&backend, None).unwrap_err(), RecorderError::FailedToStartWriting);
    }

    #[test]
    fn test_surround_audio_without_layout_is_dropped() {
        let backend = MemoryBackend::new();
        let mut session = open(&backend, Some(audio(6))).unwrap();

        assert!(!session.has_audio_track());
        assert!(!session.is_ready_for_more_audio_data());
        assert!(!session.request_audio_data_when_ready(Box::new(|| {})));
        assert!(!session.mark_audio_as_finished());
        assert!(!session.append_audio_data(&AudioSample::new(MediaTime::ZERO, 1, vec![0u8; 4])));
    }

    #[test]
    fn test_append_respects_backpressure() {
        let backend = MemoryBackend::new();
        let mut session = open(&backend, None).unwrap();
        let frame = PixelBuffer::new(4, 4, crate::pixel::PixelFormat::Bgra32).unwrap();

        backend.set_ready(TrackKind::Video, false);
        assert!(!session.append_video_data(&frame, MediaTime::new(1, 30)));

        backend.set_ready(TrackKind::Video, true);
        assert!(session.append_video_data(&frame, MediaTime::new(1, 30)));
        assert_eq!(backend.last_writer().unwrap().video_frames.len(), 1);
    }

    #[tokio::test]
    async fn test_finish_error_mapping() {
        let cases = [
            (FinishOutcome::Complete, None),
            (
                FinishOutcome::Fail(Some(BackendError::Io("disk full".into()))),
                Some(RecorderError::Internal(BackendError::Io("disk full".into()))),
            ),
            (FinishOutcome::Fail(None), Some(RecorderError::Unknown)),
        ];

        for (outcome, expected) in cases {
            let backend = MemoryBackend::new();
            backend.set_finish_outcome(outcome);
            let session = open(&backend, None).unwrap();

            let (tx, rx) = oneshot::channel();
            session.finish(&Handle::current(), move |path, error| {
                let _ = tx.send((path, error));
            });

            let (path, error) = rx.await.unwrap();
            assert_eq!(path, PathBuf::from("/tmp/session.mov"));
            assert_eq!(error, expected);
        }
    }

    #[tokio::test]
    async fn test_cancel_of_terminal_writer_still_completes() {
        let backend = MemoryBackend::new();
        let session = open(&backend, None).unwrap();
        backend.set_status(WriterStatus::Failed);
        assert!(!session.is_cancellable());

        let (tx, rx) = oneshot::channel();
        session.cancel(&Handle::current(), move |path| {
            let _ = tx.send(path);
        });

        assert_eq!(rx.await.unwrap(), PathBuf::from("/tmp/session.mov"));
        assert_eq!(backend.last_writer().unwrap().cancel_calls, 0);
    }

    #[tokio::test]
    async fn test_cancel_runs_backend_cancel() {
        let backend = MemoryBackend::new();
        let session = open(&backend, None).unwrap();

        let (tx, rx) = oneshot::channel();
        session.cancel(&Handle::current(), move |path| {
            let _ = tx.send(path);
        });

        rx.await.unwrap();
        let log = backend.last_writer().unwrap();
        assert_eq!(log.cancel_calls, 1);
        assert_eq!(log.status, WriterStatus::Cancelled);
    }
}
