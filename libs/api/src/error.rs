//! Error types for stream frame handling.

use thiserror::Error;

/// Errors produced while decoding a watch stream frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The frame payload is not a valid watch event.
    #[error("invalid frame payload: {0}")]
    InvalidPayload(String),
}

impl From<serde_json::Error> for FrameError {
    fn from(err: serde_json::Error) -> Self {
        FrameError::InvalidPayload(err.to_string())
    }
}
