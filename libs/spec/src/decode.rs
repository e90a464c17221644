//! Translation of a pod spec into container create options.
//!
//! The options serialize to the JSON body expected by the Docker Engine
//! `POST /containers/create` endpoint.

use std::collections::BTreeMap;

use minipod_api::{Container, PodSpec, Port};
use serde::{Deserialize, Serialize};

use crate::error::SpecError;

const PROTOCOLS: [&str; 3] = ["tcp", "udp", "sctp"];

/// Body of a container create request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateContainerOptions {
    pub image: String,

    /// `KEY=value` pairs, sorted by key.
    #[serde(default)]
    pub env: Vec<String>,

    /// Keyed by `port/protocol`.
    #[serde(default)]
    pub exposed_ports: BTreeMap<String, EmptyObject>,

    #[serde(default)]
    pub volumes: BTreeMap<String, EmptyObject>,

    #[serde(default)]
    pub host_config: HostConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    #[serde(default)]
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    #[serde(rename = "HostIp")]
    pub host_ip: String,
    #[serde(rename = "HostPort")]
    pub host_port: String,
}

/// Serializes as `{}`, which is how the Engine API spells set membership.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyObject {}

/// Check a container spec without building options from it.
pub fn validate(container: &Container) -> Result<(), SpecError> {
    if container.image.trim().is_empty() {
        return Err(SpecError::EmptyImage);
    }
    for name in container.env.keys() {
        if name.is_empty() || name.contains('=') {
            return Err(SpecError::InvalidEnvName(name.clone()));
        }
    }
    for port in &container.ports {
        parse_container_port(&port.containerport)?;
        parse_host_port(&port.hostport)?;
    }
    Ok(())
}

/// Build create options for the pod's container.
pub fn decode(spec: &PodSpec) -> Result<CreateContainerOptions, SpecError> {
    let container = &spec.container;
    validate(container)?;

    let env = container
        .env
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    let volumes = container
        .volumes
        .iter()
        .map(|v| (v.clone(), EmptyObject {}))
        .collect();

    let mut exposed_ports = BTreeMap::new();
    let mut port_bindings: BTreeMap<String, Vec<PortBinding>> = BTreeMap::new();
    for port in &container.ports {
        let key = parse_container_port(&port.containerport)?;
        exposed_ports.insert(key.clone(), EmptyObject {});
        if let Some(binding) = host_binding(port)? {
            port_bindings.entry(key).or_default().push(binding);
        }
    }

    Ok(CreateContainerOptions {
        image: container.image.clone(),
        env,
        exposed_ports,
        volumes,
        host_config: HostConfig { port_bindings },
    })
}

/// Normalize `80` or `80/udp` to `port/protocol`.
fn parse_container_port(raw: &str) -> Result<String, SpecError> {
    let raw = raw.trim();
    let (port, proto) = match raw.split_once('/') {
        Some((port, proto)) => (port, proto.to_ascii_lowercase()),
        None => (raw, "tcp".to_string()),
    };

    if !PROTOCOLS.contains(&proto.as_str()) {
        return Err(SpecError::invalid_port(raw, format!("unknown protocol {proto:?}")));
    }
    let number = parse_port_number(raw, port)?;

    Ok(format!("{number}/{proto}"))
}

fn parse_host_port(raw: &str) -> Result<Option<u16>, SpecError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    parse_port_number(raw, raw).map(Some)
}

fn parse_port_number(raw: &str, port: &str) -> Result<u16, SpecError> {
    match port.parse::<u16>() {
        Ok(0) => Err(SpecError::invalid_port(raw, "port must be between 1 and 65535")),
        Ok(n) => Ok(n),
        Err(e) => Err(SpecError::invalid_port(raw, e.to_string())),
    }
}

fn host_binding(port: &Port) -> Result<Option<PortBinding>, SpecError> {
    Ok(parse_host_port(&port.hostport)?.map(|host_port| PortBinding {
        host_ip: String::new(),
        host_port: host_port.to_string(),
    }))
}
