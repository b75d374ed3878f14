//! Recorder
//!
//! Drives one [`WriterSession`] at a time through the status machine
//! `idle -> initializing -> ready -> writing -> {finishing | cancelling} -> idle`.
//! Session construction and finish/cancel run on the runtime's blocking
//! pool; everything else is synchronous. Results come back through the
//! event channel returned by [`Recorder::new`].

use super::state::{RecorderEvent, RecorderStatus, RecordingConfig};
use crate::flip::FlipOptions;
use crate::geometry::Rect;
use crate::media::{AudioSample, MediaTime, VideoSample};
use crate::pixel::{DrawingSurface, PixelBuffer};
use crate::utils::RecorderError;
use crate::writer::{AssetWriterFactory, FileKind, SessionInfo, TrackDescriptor, WriterSession};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Who owns the writer session right now
enum SessionSlot {
    Empty,
    Open(WriterSession),
    /// Handed to an in-flight finish or cancel
    Closing(SessionInfo),
}

impl SessionSlot {
    fn info(&self) -> Option<&SessionInfo> {
        match self {
            SessionSlot::Empty => None,
            SessionSlot::Open(session) => Some(session.info()),
            SessionSlot::Closing(info) => Some(info),
        }
    }
}

struct State {
    status: RecorderStatus,
    slot: SessionSlot,
}

struct Shared {
    state: Mutex<State>,
    events: mpsc::UnboundedSender<RecorderEvent>,
    factory: Arc<dyn AssetWriterFactory>,
    runtime: Handle,
}

fn send_event(events: &mpsc::UnboundedSender<RecorderEvent>, event: RecorderEvent) {
    if events.send(event).is_err() {
        tracing::trace!("Recorder event dropped, receiver closed");
    }
}

impl Shared {
    fn emit(&self, event: RecorderEvent) {
        send_event(&self.events, event);
    }

    /// Notifies only on an actual change
    fn set_status(&self, state: &mut State, status: RecorderStatus) {
        if state.status == status {
            return;
        }

        tracing::debug!("Recorder status: {:?} -> {:?}", state.status, status);
        state.status = status;
        self.emit(RecorderEvent::StatusChanged(status));
    }

    /// Set the session start time on the first append after `ready`
    fn start_if_needed(&self, state: &mut State, at: MediaTime) {
        if state.status != RecorderStatus::Ready {
            return;
        }

        if let SessionSlot::Open(session) = &mut state.slot {
            session.set_start_time(at);
            self.set_status(state, RecorderStatus::Writing);
        }
    }
}

/// Records video and optional audio into a container file.
///
/// Dropping the recorder abandons any in-flight completion: background
/// tasks only hold a weak reference and stop once it is gone.
pub struct Recorder {
    shared: Arc<Shared>,
}

impl Recorder {
    /// Create an idle recorder and the receiver for its events
    pub fn new(
        factory: Arc<dyn AssetWriterFactory>,
        runtime: Handle,
    ) -> (Self, mpsc::UnboundedReceiver<RecorderEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();

        let recorder = Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    status: RecorderStatus::Idle,
                    slot: SessionSlot::Empty,
                }),
                events,
                factory,
                runtime,
            }),
        };

        (recorder, receiver)
    }

    fn weak(&self) -> Weak<Shared> {
        Arc::downgrade(&self.shared)
    }

    pub fn status(&self) -> RecorderStatus {
        self.shared.state.lock().status
    }

    pub fn is_recording(&self) -> bool {
        self.status().is_recording()
    }

    pub fn output_path(&self) -> Option<PathBuf> {
        self.shared
            .state
            .lock()
            .slot
            .info()
            .map(|info| info.output_path.clone())
    }

    pub fn file_kind(&self) -> Option<FileKind> {
        self.shared.state.lock().slot.info().map(|info| info.file_kind)
    }

    pub fn flip_options(&self) -> Option<FlipOptions> {
        self.shared
            .state
            .lock()
            .slot
            .info()
            .map(|info| info.flip_options)
    }

    pub fn is_ready_for_more_video_data(&self) -> bool {
        match &self.shared.state.lock().slot {
            SessionSlot::Open(session) => session.is_ready_for_more_video_data(),
            _ => false,
        }
    }

    pub fn is_ready_for_more_audio_data(&self) -> bool {
        match &self.shared.state.lock().slot {
            SessionSlot::Open(session) => session.is_ready_for_more_audio_data(),
            _ => false,
        }
    }

    /// Start building a writer session for `config`.
    ///
    /// Returns false and emits `InitializationFailed(Busy)` when not idle.
    /// Otherwise the outcome arrives as `StatusChanged(Ready)`, or as
    /// `StatusChanged(Idle)` followed by `InitializationFailed`.
    pub fn initialize(&self, config: RecordingConfig) -> bool {
        {
            let mut state = self.shared.state.lock();
            if state.status != RecorderStatus::Idle {
                tracing::warn!("Initialize rejected, recorder is {:?}", state.status);
                self.shared
                    .emit(RecorderEvent::InitializationFailed(RecorderError::Busy));
                return false;
            }
            self.shared.set_status(&mut state, RecorderStatus::Initializing);
        }

        let output_path = config.resolved_output_path();
        tracing::info!("Initializing recorder: {:?} ({})", output_path, config.file_kind);

        let factory = self.shared.factory.clone();
        let weak = self.weak();

        self.shared.runtime.spawn_blocking(move || {
            let video = TrackDescriptor::video(&config.video, config.realtime);
            let audio = config.audio.as_ref().map(TrackDescriptor::audio);

            let result = WriterSession::open(
                factory.as_ref(),
                &output_path,
                config.file_kind,
                video,
                audio,
                config.video.source_attributes(),
            );

            let Some(shared) = weak.upgrade() else {
                return;
            };

            let mut state = shared.state.lock();
            match result {
                Ok(session) => {
                    state.slot = SessionSlot::Open(session);
                    shared.set_status(&mut state, RecorderStatus::Ready);
                }
                Err(e) => {
                    tracing::warn!("Recorder initialization failed: {}", e);
                    shared.set_status(&mut state, RecorderStatus::Idle);
                    shared.emit(RecorderEvent::InitializationFailed(e));
                }
            }
        });

        true
    }

    /// Append a video frame. Returns false when not recording or under backpressure.
    pub fn append_video(&self, buffer: &PixelBuffer, presentation_time: MediaTime) -> bool {
        let mut state = self.shared.state.lock();
        if !state.status.is_recording() || !matches!(state.slot, SessionSlot::Open(_)) {
            return false;
        }

        self.shared.start_if_needed(&mut state, presentation_time);

        match &mut state.slot {
            SessionSlot::Open(session) => session.append_video_data(buffer, presentation_time),
            _ => false,
        }
    }

    /// Append a copy of `buffer` with an overlay drawn on it.
    ///
    /// The overlay honors the session's flip. `buffer` itself is left
    /// untouched. Returns false when the copy cannot be made.
    pub fn append_video_with_overlay<F>(
        &self,
        buffer: &PixelBuffer,
        presentation_time: MediaTime,
        draw: F,
    ) -> bool
    where
        F: FnOnce(&mut DrawingSurface<'_>, Rect),
    {
        let flip = {
            let state = self.shared.state.lock();
            match &state.slot {
                SessionSlot::Open(session) if state.status.is_recording() => {
                    session.flip_options()
                }
                _ => return false,
            }
        };

        let copy = match buffer.copy() {
            Ok(copy) => copy,
            Err(e) => {
                tracing::warn!("Failed to copy frame for overlay: {}", e);
                return false;
            }
        };

        if let Err(e) = copy.apply_overlay(flip, draw) {
            tracing::warn!("Overlay skipped: {}", e);
        }

        self.append_video(&copy, presentation_time)
    }

    /// Append the image buffer of a sample; samples without one are refused
    pub fn append_video_sample(&self, sample: &VideoSample) -> bool {
        match &sample.image_buffer {
            Some(buffer) => self.append_video(buffer, sample.presentation_time),
            None => false,
        }
    }

    pub fn append_video_sample_with_overlay<F>(&self, sample: &VideoSample, draw: F) -> bool
    where
        F: FnOnce(&mut DrawingSurface<'_>, Rect),
    {
        match &sample.image_buffer {
            Some(buffer) => {
                self.append_video_with_overlay(buffer, sample.presentation_time, draw)
            }
            None => false,
        }
    }

    pub fn append_audio(&self, sample: &AudioSample) -> bool {
        let mut state = self.shared.state.lock();
        if !state.status.is_recording() || !matches!(state.slot, SessionSlot::Open(_)) {
            return false;
        }

        self.shared
            .start_if_needed(&mut state, sample.presentation_time);

        match &mut state.slot {
            SessionSlot::Open(session) => session.append_audio_data(sample),
            _ => false,
        }
    }

    /// Emit `ReadyForMoreVideoData` whenever the video track can take more
    pub fn request_video_data_when_ready(&self) -> bool {
        let mut state = self.shared.state.lock();
        if !state.status.is_recording() {
            return false;
        }

        let SessionSlot::Open(session) = &mut state.slot else {
            return false;
        };

        let events = self.shared.events.clone();
        session.request_video_data_when_ready(Box::new(move || {
            send_event(&events, RecorderEvent::ReadyForMoreVideoData);
        }));
        true
    }

    /// Emit `ReadyForMoreAudioData` whenever the audio track can take more.
    ///
    /// Returns false when the session has no audio track.
    pub fn request_audio_data_when_ready(&self) -> bool {
        let mut state = self.shared.state.lock();
        if !state.status.is_recording() {
            return false;
        }

        let SessionSlot::Open(session) = &mut state.slot else {
            return false;
        };

        let events = self.shared.events.clone();
        session.request_audio_data_when_ready(Box::new(move || {
            send_event(&events, RecorderEvent::ReadyForMoreAudioData);
        }))
    }

    pub fn mark_video_as_finished(&self) -> bool {
        let mut state = self.shared.state.lock();
        if !state.status.is_recording() {
            return false;
        }

        match &mut state.slot {
            SessionSlot::Open(session) => {
                session.mark_video_as_finished();
                true
            }
            _ => false,
        }
    }

    pub fn mark_audio_as_finished(&self) -> bool {
        let mut state = self.shared.state.lock();
        if !state.status.is_recording() {
            return false;
        }

        match &mut state.slot {
            SessionSlot::Open(session) => session.mark_audio_as_finished(),
            _ => false,
        }
    }

    /// Take the open session out of the slot, leaving its info behind
    fn begin_closing(&self, status: RecorderStatus) -> Option<WriterSession> {
        let mut state = self.shared.state.lock();
        if !state.status.is_recording() {
            return None;
        }

        let session = match std::mem::replace(&mut state.slot, SessionSlot::Empty) {
            SessionSlot::Open(session) => session,
            other => {
                state.slot = other;
                return None;
            }
        };

        state.slot = SessionSlot::Closing(session.info().clone());
        self.shared.set_status(&mut state, status);
        Some(session)
    }

    /// Abandon the recording.
    ///
    /// Emits `StatusChanged(Idle)` then `Cancelled` once the writer stopped.
    pub fn cancel(&self) -> bool {
        let Some(session) = self.begin_closing(RecorderStatus::Cancelling) else {
            return false;
        };

        let file_kind = session.file_kind();
        let weak = self.weak();

        session.cancel(&self.shared.runtime, move |output_path| {
            let Some(shared) = weak.upgrade() else {
                return;
            };

            let mut state = shared.state.lock();
            state.slot = SessionSlot::Empty;
            shared.set_status(&mut state, RecorderStatus::Idle);
            shared.emit(RecorderEvent::Cancelled {
                output_path,
                file_kind,
            });
        });

        true
    }

    /// Finalize the recording.
    ///
    /// Emits `StatusChanged(Idle)` then `Finished` once the file is complete
    /// or has failed.
    pub fn finish(&self) -> bool {
        let Some(session) = self.begin_closing(RecorderStatus::Finishing) else {
            return false;
        };

        let file_kind = session.file_kind();
        let weak = self.weak();

        session.finish(&self.shared.runtime, move |output_path, error| {
            let Some(shared) = weak.upgrade() else {
                return;
            };

            let mut state = shared.state.lock();
            state.slot = SessionSlot::Empty;
            shared.set_status(&mut state, RecorderStatus::Idle);
            shared.emit(RecorderEvent::Finished {
                output_path,
                file_kind,
                error,
            });
        });

        true
    }
}
