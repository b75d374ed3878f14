//! Capture trait definitions
//!
//! Platform-agnostic description of a capture device and its session. The
//! hardware itself lives behind [`CaptureBackend`].

use crate::flip::ConnectionFlip;
use crate::geometry::Point;
use crate::media::{AudioSample, VideoSample};
use crate::pixel::{PixelBuffer, PixelFormat};
use crate::utils::BackendError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Information about a camera/webcam
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Unique device ID
    pub id: String,

    /// Device name
    pub name: String,

    pub model_id: String,

    pub manufacturer: Option<String>,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// Supported frame rates of a format
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRateRange {
    pub min_frame_rate: f64,
    pub max_frame_rate: f64,
}

/// One capture format offered by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFormat {
    pub resolution: Resolution,
    pub pixel_format: PixelFormat,
    pub frame_rate_ranges: Vec<FrameRateRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FocusMode {
    Locked,
    AutoFocus,
    ContinuousAutoFocus,
}

/// Session quality preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionPreset {
    #[default]
    High,
    Medium,
    Low,
    Photo,
    Hd1280x720,
    Hd1920x1080,
    Uhd3840x2160,
}

/// Kind of a session output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputKind {
    MovieFile,
    VideoData,
    AudioData,
    Photo,
}

impl OutputKind {
    /// Whether the output has a video connection that can be flipped
    pub fn has_video_connection(&self) -> bool {
        !matches!(self, OutputKind::AudioData)
    }
}

/// An additional session input, e.g. a microphone
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputDescriptor {
    pub device_id: String,
}

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);
    };
}

id_type!(
    /// Handle of an input added to a camera
    InputId
);
id_type!(
    /// Handle of an output added to a camera
    OutputId
);
id_type!(
    /// Handle of a registered video preview
    PreviewId
);

/// A video connection whose flip can be configured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Connection {
    Output(OutputId),
    Preview(PreviewId),
}

/// A device setting change, applied with the device locked for configuration
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceChange {
    Format(DeviceFormat),
    FrameRateRange(FrameRateRange),
    FocusPoint(Point),
    FocusMode(FocusMode),
    Focus { point: Point, mode: FocusMode },
}

/// What a capture backend pushes while its session runs
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    PhotoReady(PixelBuffer),
    VideoFrame {
        output: OutputId,
        sample: VideoSample,
    },
    AudioSample {
        output: OutputId,
        sample: AudioSample,
    },
    RecordingStarted(PathBuf),
    RecordingPaused(PathBuf),
    RecordingResumed(PathBuf),
    RecordingFinished {
        output_path: PathBuf,
        error: Option<BackendError>,
    },
}

/// A capture device together with its session graph
pub trait CaptureBackend: Send {
    fn device(&self) -> DeviceInfo;

    /// Where the backend sends [`CaptureEvent`]s from now on
    fn set_event_sender(&mut self, events: mpsc::UnboundedSender<CaptureEvent>);

    // Session

    fn is_running(&self) -> bool;

    fn start_running(&mut self);

    fn stop_running(&mut self);

    fn preset(&self) -> SessionPreset;

    fn can_set_preset(&self, preset: SessionPreset) -> bool;

    fn set_preset(&mut self, preset: SessionPreset);

    // Format and frame rate

    fn formats(&self) -> Vec<DeviceFormat>;

    fn active_format(&self) -> DeviceFormat;

    fn active_frame_rate_range(&self) -> Option<FrameRateRange>;

    // Focus

    fn is_focus_point_supported(&self) -> bool;

    fn is_focus_mode_supported(&self, mode: FocusMode) -> bool;

    fn focus_mode(&self) -> FocusMode;

    fn focus_point(&self) -> Point;

    fn is_adjusting_focus(&self) -> bool;

    /// Lock the device, apply `change`, unlock it
    fn configure(&mut self, change: DeviceChange) -> Result<(), BackendError>;

    // Session graph

    fn can_add_input(&self, input: &InputDescriptor) -> bool;

    fn add_input(&mut self, id: InputId, input: &InputDescriptor);

    fn remove_input(&mut self, id: InputId);

    fn can_add_output(&self, kind: OutputKind) -> bool;

    fn add_output(&mut self, id: OutputId, kind: OutputKind);

    fn remove_output(&mut self, id: OutputId);

    fn attach_preview(&mut self, id: PreviewId);

    fn detach_preview(&mut self, id: PreviewId);

    /// Apply mirroring and orientation to a video connection.
    ///
    /// Returns false when the connection supports neither.
    fn apply_connection_flip(&mut self, connection: Connection, flip: ConnectionFlip) -> bool;
}
