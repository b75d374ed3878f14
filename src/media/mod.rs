//! Media timing and sample types
//!
//! Timestamps and the audio/video samples handed to the recorder.

pub mod sample;
pub mod time;

pub use sample::{AudioSample, VideoSample};
pub use time::MediaTime;
