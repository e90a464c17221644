//! Error types for spec handling.

use thiserror::Error;

/// Errors that can occur while reading, validating or decoding a spec.
#[derive(Debug, Error)]
pub enum SpecError {
    /// The container has no image.
    #[error("image cannot be empty")]
    EmptyImage,

    /// A port mapping could not be parsed.
    #[error("invalid port {port:?}: {reason}")]
    InvalidPort { port: String, reason: String },

    /// An environment variable name is unusable.
    #[error("invalid env var name {0:?}")]
    InvalidEnvName(String),

    /// The spec file contains no containers.
    #[error("spec file contains no containers")]
    Empty,

    /// The spec file could not be read.
    #[error("failed to read spec file: {0}")]
    Io(#[from] std::io::Error),

    /// The spec file is not valid YAML for a spec.
    #[error("failed to parse spec file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SpecError {
    pub(crate) fn invalid_port(port: &str, reason: impl Into<String>) -> Self {
        SpecError::InvalidPort {
            port: port.to_string(),
            reason: reason.into(),
        }
    }
}
