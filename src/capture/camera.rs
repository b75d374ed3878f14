//! Camera wrapper
//!
//! Tracks the inputs, outputs and previews attached to one capture session
//! and keeps their video connections in line with the camera's flip.

use super::traits::{
    CaptureBackend, CaptureEvent, Connection, DeviceChange, DeviceFormat, DeviceInfo, FocusMode,
    FrameRateRange, InputDescriptor, InputId, OutputId, OutputKind, PreviewId, SessionPreset,
};
use crate::flip::FlipOptions;
use crate::geometry::Point;
use crate::writer::FileKind;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Movie file output helpers
pub struct MovieFileOutput;

impl MovieFileOutput {
    /// A unique file in the temp directory for a new movie recording
    pub fn temporary_path(kind: FileKind) -> PathBuf {
        kind.temporary_path()
    }
}

/// Previews registered on a camera, in registration order
#[derive(Debug, Default)]
pub struct PreviewRegistry {
    live: Vec<PreviewId>,
}

impl PreviewRegistry {
    pub fn register(&mut self, id: PreviewId) {
        if !self.is_live(id) {
            self.live.push(id);
        }
    }

    /// Returns false if `id` was not registered
    pub fn unregister(&mut self, id: PreviewId) -> bool {
        let before = self.live.len();
        self.live.retain(|entry| *entry != id);
        self.live.len() != before
    }

    pub fn is_live(&self, id: PreviewId) -> bool {
        self.live.contains(&id)
    }

    pub fn live(&self) -> impl Iterator<Item = PreviewId> + '_ {
        self.live.iter().copied()
    }

    /// Unregister everything, returning what was live
    pub fn unregister_all(&mut self) -> Vec<PreviewId> {
        std::mem::take(&mut self.live)
    }
}

pub struct Camera {
    backend: Box<dyn CaptureBackend>,
    inputs: Vec<(InputId, InputDescriptor)>,
    outputs: Vec<(OutputId, OutputKind)>,
    previews: PreviewRegistry,
    flip_options: FlipOptions,
    next_id: u64,
}

impl Camera {
    /// Wrap `backend` and return the receiver for what it captures
    pub fn new(
        mut backend: Box<dyn CaptureBackend>,
    ) -> (Self, mpsc::UnboundedReceiver<CaptureEvent>) {
        let device = backend.device();
        tracing::info!("Camera opened: {} ({})", device.name, device.id);

        let (events, receiver) = mpsc::unbounded_channel();
        backend.set_event_sender(events);

        let camera = Self {
            backend,
            inputs: Vec::new(),
            outputs: Vec::new(),
            previews: PreviewRegistry::default(),
            flip_options: FlipOptions::empty(),
            next_id: 0,
        };

        (camera, receiver)
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn device(&self) -> DeviceInfo {
        self.backend.device()
    }

    pub fn name(&self) -> String {
        self.backend.device().name
    }

    pub fn unique_id(&self) -> String {
        self.backend.device().id
    }

    // Session

    pub fn is_running(&self) -> bool {
        self.backend.is_running()
    }

    pub fn start_running(&mut self) {
        if !self.is_running() {
            self.backend.start_running();
        }
    }

    pub fn stop_running(&mut self) {
        if self.is_running() {
            self.backend.stop_running();
        }
    }

    pub fn preset(&self) -> SessionPreset {
        self.backend.preset()
    }

    pub fn can_set_preset(&self, preset: SessionPreset) -> bool {
        self.backend.can_set_preset(preset)
    }

    pub fn set_preset(&mut self, preset: SessionPreset) {
        if self.can_set_preset(preset) {
            self.backend.set_preset(preset);
        }
    }

    // Flip

    pub fn flip_options(&self) -> FlipOptions {
        self.flip_options
    }

    /// Change the flip and re-apply it to every output and live preview
    pub fn set_flip_options(&mut self, flip_options: FlipOptions) {
        self.flip_options = flip_options;
        let flip = flip_options.connection_flip();

        let outputs: Vec<OutputId> = self
            .outputs
            .iter()
            .filter(|(_, kind)| kind.has_video_connection())
            .map(|(id, _)| *id)
            .collect();
        for id in outputs {
            self.backend
                .apply_connection_flip(Connection::Output(id), flip);
        }

        let previews: Vec<PreviewId> = self.previews.live().collect();
        for id in previews {
            self.backend
                .apply_connection_flip(Connection::Preview(id), flip);
        }
    }

    // Inputs

    pub fn inputs(&self) -> impl Iterator<Item = (InputId, &InputDescriptor)> + '_ {
        self.inputs.iter().map(|(id, input)| (*id, input))
    }

    pub fn can_add_input(&self, input: &InputDescriptor) -> bool {
        !self.inputs.iter().any(|(_, existing)| existing == input)
            && self.backend.can_add_input(input)
    }

    pub fn add_input(&mut self, input: InputDescriptor) -> Option<InputId> {
        if !self.can_add_input(&input) {
            return None;
        }

        let id = InputId(self.allocate_id());
        self.backend.add_input(id, &input);
        self.inputs.push((id, input));
        Some(id)
    }

    pub fn remove_input(&mut self, id: InputId) -> bool {
        let Some(index) = self.inputs.iter().position(|(existing, _)| *existing == id) else {
            return false;
        };

        self.backend.remove_input(id);
        self.inputs.remove(index);
        true
    }

    // Outputs

    pub fn outputs(&self) -> impl Iterator<Item = (OutputId, OutputKind)> + '_ {
        self.outputs.iter().copied()
    }

    pub fn can_add_output(&self, kind: OutputKind) -> bool {
        self.backend.can_add_output(kind)
    }

    /// Add an output; its video connection gets the current flip
    pub fn add_output(&mut self, kind: OutputKind) -> Option<OutputId> {
        if !self.can_add_output(kind) {
            return None;
        }

        let id = OutputId(self.allocate_id());
        self.backend.add_output(id, kind);
        self.outputs.push((id, kind));

        if kind.has_video_connection() {
            self.backend
                .apply_connection_flip(Connection::Output(id), self.flip_options.connection_flip());
        }
        Some(id)
    }

    pub fn remove_output(&mut self, id: OutputId) -> bool {
        let Some(index) = self.outputs.iter().position(|(existing, _)| *existing == id) else {
            return false;
        };

        self.backend.remove_output(id);
        self.outputs.remove(index);
        true
    }

    // Format and frame rate

    pub fn formats(&self) -> Vec<DeviceFormat> {
        self.backend.formats()
    }

    pub fn active_format(&self) -> DeviceFormat {
        self.backend.active_format()
    }

    pub fn set_format(&mut self, format: DeviceFormat) -> bool {
        if self.backend.active_format() == format {
            return true;
        }

        self.configure(DeviceChange::Format(format))
    }

    pub fn frame_rate_ranges(&self) -> Vec<FrameRateRange> {
        self.backend.active_format().frame_rate_ranges
    }

    pub fn active_frame_rate_range(&self) -> Option<FrameRateRange> {
        self.backend.active_frame_rate_range()
    }

    pub fn set_frame_rate_range(&mut self, range: FrameRateRange) -> bool {
        if self.backend.active_frame_rate_range() == Some(range) {
            return true;
        }

        self.configure(DeviceChange::FrameRateRange(range))
    }

    // Focus

    pub fn is_adjusting_focus(&self) -> bool {
        self.backend.is_adjusting_focus()
    }

    pub fn focus_mode(&self) -> FocusMode {
        self.backend.focus_mode()
    }

    pub fn focus_point(&self) -> Point {
        self.backend.focus_point()
    }

    pub fn is_focus_point_supported(&self) -> bool {
        self.backend.is_focus_point_supported()
    }

    pub fn is_focus_mode_supported(&self, mode: FocusMode) -> bool {
        self.backend.is_focus_mode_supported(mode)
    }

    pub fn set_focus_point(&mut self, point: Point) -> bool {
        if !self.is_focus_point_supported() {
            return false;
        }

        self.configure(DeviceChange::FocusPoint(point))
    }

    pub fn set_focus_mode(&mut self, mode: FocusMode) -> bool {
        if !self.is_focus_mode_supported(mode) {
            return false;
        }

        self.configure(DeviceChange::FocusMode(mode))
    }

    pub fn focus(&mut self, point: Point, mode: FocusMode) -> bool {
        if !self.is_focus_point_supported() || !self.is_focus_mode_supported(mode) {
            return false;
        }

        self.configure(DeviceChange::Focus { point, mode })
    }

    fn configure(&mut self, change: DeviceChange) -> bool {
        match self.backend.configure(change) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Device configuration failed: {}", e);
                false
            }
        }
    }

    // Previews

    /// Register a new preview carrying the current flip
    pub fn make_preview(&mut self) -> PreviewId {
        let id = PreviewId(self.allocate_id());
        self.backend.attach_preview(id);
        self.backend
            .apply_connection_flip(Connection::Preview(id), self.flip_options.connection_flip());
        self.previews.register(id);
        id
    }

    pub fn remove_preview(&mut self, id: PreviewId) -> bool {
        if !self.previews.unregister(id) {
            return false;
        }

        self.backend.detach_preview(id);
        true
    }

    pub fn previews(&self) -> impl Iterator<Item = PreviewId> + '_ {
        self.previews.live()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        for (id, _) in std::mem::take(&mut self.outputs) {
            self.backend.remove_output(id);
        }
        for (id, _) in std::mem::take(&mut self.inputs) {
            self.backend.remove_input(id);
        }
        for id in self.previews.unregister_all() {
            self.backend.detach_preview(id);
        }
        if self.backend.is_running() {
            self.backend.stop_running();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::traits::Resolution;
    use crate::flip::{ConnectionFlip, VideoOrientation};
    use crate::pixel::PixelFormat;
    use crate::utils::BackendError;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct Log {
        flips: Vec<(Connection, ConnectionFlip)>,
        changes: Vec<DeviceChange>,
        removed_outputs: Vec<OutputId>,
        removed_inputs: Vec<InputId>,
        detached: Vec<PreviewId>,
        running: bool,
        start_calls: usize,
    }

    struct FakeBackend {
        log: Arc<Mutex<Log>>,
        events: Option<mpsc::UnboundedSender<CaptureEvent>>,
        format: DeviceFormat,
        focus_point_supported: bool,
    }

    fn format(width: u32) -> DeviceFormat {
        DeviceFormat {
            resolution: Resolution { width, height: 720 },
            pixel_format: PixelFormat::Nv12,
            frame_rate_ranges: vec![FrameRateRange {
                min_frame_rate: 1.0,
                max_frame_rate: 30.0,
            }],
        }
    }

    impl CaptureBackend for FakeBackend {
        fn device(&self) -> DeviceInfo {
            DeviceInfo {
                id: "cam-0".into(),
                name: "Test Camera".into(),
                model_id: "T1".into(),
                manufacturer: None,
            }
        }
        fn set_event_sender(&mut self, events: mpsc::UnboundedSender<CaptureEvent>) {
            self.events = Some(events);
        }
        fn is_running(&self) -> bool {
            self.log.lock().running
        }
        fn start_running(&mut self) {
            let mut log = self.log.lock();
            log.running = true;
            log.start_calls += 1;
            if let Some(events) = &self.events {
                let _ = events.send(CaptureEvent::RecordingStarted(PathBuf::from("/tmp/take.mov")));
            }
        }
        fn stop_running(&mut self) {
            self.log.lock().running = false;
        }
        fn preset(&self) -> SessionPreset {
            SessionPreset::High
        }
        fn can_set_preset(&self, preset: SessionPreset) -> bool {
            preset != SessionPreset::Uhd3840x2160
        }
        fn set_preset(&mut self, _preset: SessionPreset) {}
        fn formats(&self) -> Vec<DeviceFormat> {
            vec![format(1280), format(1920)]
        }
        fn active_format(&self) -> DeviceFormat {
            self.format.clone()
        }
        fn active_frame_rate_range(&self) -> Option<FrameRateRange> {
            self.format.frame_rate_ranges.first().copied()
        }
        fn is_focus_point_supported(&self) -> bool {
            self.focus_point_supported
        }
        fn is_focus_mode_supported(&self, mode: FocusMode) -> bool {
            mode != FocusMode::ContinuousAutoFocus
        }
        fn focus_mode(&self) -> FocusMode {
            FocusMode::Locked
        }
        fn focus_point(&self) -> Point {
            Point::new(0.5, 0.5)
        }
        fn is_adjusting_focus(&self) -> bool {
            false
        }
        fn configure(&mut self, change: DeviceChange) -> Result<(), BackendError> {
            if let DeviceChange::Format(format) = &change {
                self.format = format.clone();
            }
            self.log.lock().changes.push(change);
            Ok(())
        }
        fn can_add_input(&self, _input: &InputDescriptor) -> bool {
            true
        }
        fn add_input(&mut self, _id: InputId, _input: &InputDescriptor) {}
        fn remove_input(&mut self, id: InputId) {
            self.log.lock().removed_inputs.push(id);
        }
        fn can_add_output(&self, _kind: OutputKind) -> bool {
            true
        }
        fn add_output(&mut self, _id: OutputId, _kind: OutputKind) {}
        fn remove_output(&mut self, id: OutputId) {
            self.log.lock().removed_outputs.push(id);
        }
        fn attach_preview(&mut self, _id: PreviewId) {}
        fn detach_preview(&mut self, id: PreviewId) {
            self.log.lock().detached.push(id);
        }
        fn apply_connection_flip(&mut self, connection: Connection, flip: ConnectionFlip) -> bool {
            self.log.lock().flips.push((connection, flip));
            true
        }
    }

    type Events = mpsc::UnboundedReceiver<CaptureEvent>;

    fn camera_with_events() -> (Camera, Events, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let backend = FakeBackend {
            log: log.clone(),
            events: None,
            format: format(1280),
            focus_point_supported: false,
        };
        let (camera, events) = Camera::new(Box::new(backend));
        (camera, events, log)
    }

    fn camera() -> (Camera, Arc<Mutex<Log>>) {
        let (camera, _events, log) = camera_with_events();
        (camera, log)
    }

    #[test]
    fn test_flip_reaches_outputs_and_live_previews() {
        let (mut camera, log) = camera();
        let movie = camera.add_output(OutputKind::MovieFile).unwrap();
        let _audio = camera.add_output(OutputKind::AudioData).unwrap();
        let kept = camera.make_preview();
        let removed = camera.make_preview();
        assert!(camera.remove_preview(removed));
        assert!(!camera.remove_preview(removed));

        log.lock().flips.clear();
        camera.set_flip_options(FlipOptions::VERTICAL);

        let expected = ConnectionFlip {
            mirrored: true,
            orientation: VideoOrientation::PortraitUpsideDown,
        };
        assert_eq!(
            log.lock().flips,
            vec![
                (Connection::Output(movie), expected),
                (Connection::Preview(kept), expected),
            ]
        );
    }

    #[test]
    fn test_new_output_gets_current_flip() {
        let (mut camera, log) = camera();
        camera.set_flip_options(FlipOptions::all());
        let id = camera.add_output(OutputKind::VideoData).unwrap();

        assert_eq!(
            log.lock().flips.last(),
            Some(&(
                Connection::Output(id),
                ConnectionFlip {
                    mirrored: false,
                    orientation: VideoOrientation::PortraitUpsideDown,
                }
            ))
        );
    }

    #[test]
    fn test_remove_output_searches_outputs() {
        let (mut camera, log) = camera();
        let input = camera
            .add_input(InputDescriptor {
                device_id: "mic-0".into(),
            })
            .unwrap();
        let output = camera.add_output(OutputKind::Photo).unwrap();

        assert!(camera.remove_output(output));
        assert!(!camera.remove_output(output));
        assert!(!camera.remove_output(OutputId(input.0)));
        assert_eq!(camera.outputs().count(), 0);
        assert_eq!(camera.inputs().count(), 1);
        assert_eq!(log.lock().removed_outputs, vec![output]);
    }

    #[test]
    fn test_duplicate_input_rejected() {
        let (mut camera, _log) = camera();
        let mic = InputDescriptor {
            device_id: "mic-0".into(),
        };
        assert!(camera.add_input(mic.clone()).is_some());
        assert!(!camera.can_add_input(&mic));
        assert!(camera.add_input(mic).is_none());
    }

    #[test]
    fn test_device_settings_short_circuit_and_check_support() {
        let (mut camera, log) = camera();

        assert!(camera.set_format(format(1280)));
        assert!(camera.set_frame_rate_range(FrameRateRange {
            min_frame_rate: 1.0,
            max_frame_rate: 30.0,
        }));
        assert!(log.lock().changes.is_empty());

        assert!(camera.set_format(format(1920)));
        assert_eq!(camera.active_format(), format(1920));

        assert!(!camera.set_focus_point(Point::new(0.1, 0.1)));
        assert!(!camera.set_focus_mode(FocusMode::ContinuousAutoFocus));
        assert!(camera.set_focus_mode(FocusMode::AutoFocus));
        assert!(!camera.focus(Point::new(0.1, 0.1), FocusMode::AutoFocus));

        assert_eq!(
            log.lock().changes,
            vec![
                DeviceChange::Format(format(1920)),
                DeviceChange::FocusMode(FocusMode::AutoFocus),
            ]
        );
    }

    #[test]
    fn test_running_state_is_guarded() {
        let (mut camera, mut events, log) = camera_with_events();
        camera.start_running();
        camera.start_running();
        assert!(camera.is_running());
        assert_eq!(log.lock().start_calls, 1);

        assert!(matches!(
            events.try_recv(),
            Ok(CaptureEvent::RecordingStarted(path)) if path == PathBuf::from("/tmp/take.mov")
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_drop_tears_everything_down() {
        let (mut camera, log) = camera();
        let output = camera.add_output(OutputKind::MovieFile).unwrap();
        let input = camera
            .add_input(InputDescriptor {
                device_id: "mic-0".into(),
            })
            .unwrap();
        let preview = camera.make_preview();
        camera.start_running();
        drop(camera);

        let log = log.lock();
        assert_eq!(log.removed_outputs, vec![output]);
        assert_eq!(log.removed_inputs, vec![input]);
        assert_eq!(log.detached, vec![preview]);
        assert!(!log.running);
    }

    #[test]
    fn test_movie_file_temporary_path() {
        let path = MovieFileOutput::temporary_path(FileKind::Mov);
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mov"));
        assert!(!path.exists());
    }
}
