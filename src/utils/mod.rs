//! Shared utilities

pub mod error;

pub use error::{BackendError, ConfigError, RecorderError, RecorderResult};
