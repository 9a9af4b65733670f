//! Error types for the gridq crate

use thiserror::Error;

/// Main error type for the gridq crate
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("grid size mismatch: expected side {expected}, got {got}")]
    GridSizeMismatch { expected: usize, got: usize },

    #[error("value network already built for vision size {vision_size}")]
    NetworkAlreadyBuilt { vision_size: usize },

    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("network image error: {message}")]
    Storage { message: String },

    #[error("failed to {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for Results using the crate's Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Frame-level errors drop the current frame; the session keeps going.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            Error::MalformedMessage { .. } | Error::GridSizeMismatch { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io {
            operation: "IO operation".to_string(),
            source,
        }
    }
}
