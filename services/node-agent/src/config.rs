//! Configuration for the node agent.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};

/// Which container runtime backend to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Docker Engine over its unix socket.
    Docker,
    /// In-process mock, for development without a container engine.
    Mock,
}

impl FromStr for RuntimeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "docker" => Ok(RuntimeKind::Docker),
            "mock" => Ok(RuntimeKind::Mock),
            other => bail!("unknown runtime {other:?} (expected docker or mock)"),
        }
    }
}

/// Node agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the node this agent manages. Pods are watched under `pod/{node_name}`.
    pub node_name: String,

    /// Apiserver base URL.
    pub apiserver_url: String,

    pub runtime: RuntimeKind,

    /// Docker Engine socket path.
    pub docker_socket: String,

    /// Connection attempts before the watch gives up.
    pub watch_attempts: u32,

    /// Delay before the first retry; doubles on every further retry.
    pub watch_initial_delay: Duration,

    /// A watch stream that delivers nothing, not even a keepalive, for this
    /// long is treated as timed out.
    pub watch_idle_timeout: Duration,

    /// Reconciler workers. Pods are sharded across workers by UID.
    pub sync_workers: usize,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: "node-1".to_string(),
            apiserver_url: "http://127.0.0.1:8080".to_string(),
            runtime: RuntimeKind::Docker,
            docker_socket: "/var/run/docker.sock".to_string(),
            watch_attempts: 3,
            watch_initial_delay: Duration::from_secs(1),
            watch_idle_timeout: Duration::from_secs(45),
            sync_workers: 1,
            log_level: "info".to_string(),
        }
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let node_name = std::env::var("MINIPOD_NODE_NAME").unwrap_or(defaults.node_name);
        if node_name.is_empty() || node_name.contains('/') {
            bail!("MINIPOD_NODE_NAME must be non-empty and must not contain '/'");
        }

        let apiserver_url = std::env::var("MINIPOD_APISERVER_URL")
            .unwrap_or(defaults.apiserver_url)
            .trim_end_matches('/')
            .to_string();

        let runtime = match std::env::var("MINIPOD_RUNTIME") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.runtime,
        };

        let docker_socket =
            std::env::var("MINIPOD_DOCKER_SOCKET").unwrap_or(defaults.docker_socket);

        let watch_attempts = env_parse::<u32>("MINIPOD_WATCH_ATTEMPTS")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.watch_attempts);

        let watch_initial_delay = env_parse::<u64>("MINIPOD_WATCH_INITIAL_DELAY_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.watch_initial_delay);

        let watch_idle_timeout = env_parse::<u64>("MINIPOD_WATCH_IDLE_TIMEOUT_SECS")
            .filter(|n| *n > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.watch_idle_timeout);

        let sync_workers = env_parse::<usize>("MINIPOD_SYNC_WORKERS")
            .filter(|n| *n > 0)
            .unwrap_or(defaults.sync_workers);

        let log_level = std::env::var("MINIPOD_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            node_name,
            apiserver_url,
            runtime,
            docker_socket,
            watch_attempts,
            watch_initial_delay,
            watch_idle_timeout,
            sync_workers,
            log_level,
        })
    }
}
