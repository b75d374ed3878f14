//! Recording system module
//!
//! - `Recorder` drives a single-use writer session through its status machine
//! - `RecordingConfig` describes one recording and loads from JSON
//! - `RecorderEvent` is what the recorder reports back

pub mod coordinator;
pub mod state;

pub use coordinator::Recorder;
pub use state::{RecorderEvent, RecorderStatus, RecordingConfig};
