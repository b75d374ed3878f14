//! Error types and handling
//!
//! Errors reported by the recorder and by the container writer backends.

use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a container writer backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Writer failed: {0}")]
    Failed(String),
}

impl From<std::io::Error> for BackendError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

/// Recorder error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecorderError {
    /// `initialize` was called while the recorder was not idle
    #[error("Recorder is busy")]
    Busy,

    #[error("Video track was rejected by the writer")]
    InvalidVideoInput,

    #[error("Writer refused to start writing")]
    FailedToStartWriting,

    #[error("Internal error: {0}")]
    Internal(#[from] BackendError),

    /// Terminal failure without a reported cause
    #[error("Unknown error")]
    Unknown,
}

/// Error while loading a recording configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type alias using RecorderError
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_wraps_into_internal() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: RecorderError = BackendError::from(io).into();
        assert_eq!(err, RecorderError::Internal(BackendError::Io("disk full".into())));
        assert_eq!(err.to_string(), "Internal error: IO error: disk full");
    }
}
