//! Camera capture
//!
//! The device and its session graph sit behind [`CaptureBackend`];
//! [`Camera`] keeps the bookkeeping and the connection flips.

pub mod camera;
pub mod traits;

pub use camera::{Camera, MovieFileOutput, PreviewRegistry};
pub use traits::{
    CaptureBackend, CaptureEvent, Connection, DeviceChange, DeviceFormat, DeviceInfo, FocusMode,
    FrameRateRange, InputDescriptor, InputId, OutputId, OutputKind, PreviewId, Resolution,
    SessionPreset,
};
