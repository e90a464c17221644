//! Pod spec to runtime options translation.

use minipod_api::PodSpec;
use minipod_spec::{CreateContainerOptions, SpecError};

/// Turns a pod spec into container creation options.
pub trait SpecDecoder: Send + Sync {
    fn decode(&self, spec: &PodSpec) -> Result<CreateContainerOptions, SpecError>;
}

/// Decoder using the standard pod spec mapping.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecoder;

impl SpecDecoder for DefaultDecoder {
    fn decode(&self, spec: &PodSpec) -> Result<CreateContainerOptions, SpecError> {
        minipod_spec::decode(spec)
    }
}
