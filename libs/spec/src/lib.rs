//! # minipod-spec
//!
//! Declarative pod specs and their translation into container create options.
//!
//! - `file`: YAML spec files (`spec: [ {image, env, ports, volumes} ]`)
//! - `decode`: validation and conversion of a `PodSpec` into the body of a
//!   Docker Engine `POST /containers/create` request

pub mod decode;
mod error;
pub mod file;

pub use decode::{decode, validate, CreateContainerOptions, HostConfig, PortBinding};
pub use error::SpecError;
pub use file::SpecFile;
