use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    /// Interval between keepalive comments on idle watch streams.
    pub keepalive: Duration,
    /// Upper bound on a single event handoff. `None` waits indefinitely.
    pub publish_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            keepalive: Duration::from_secs(15),
            publish_timeout: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("MINIPOD_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("MINIPOD_LISTEN_ADDR is not a socket address")?;

        let log_level = std::env::var("MINIPOD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let keepalive_secs = std::env::var("MINIPOD_KEEPALIVE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .unwrap_or(15);

        let publish_timeout = std::env::var("MINIPOD_PUBLISH_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|secs: &u64| *secs > 0)
            .map(Duration::from_secs);

        Ok(Self {
            listen_addr,
            log_level,
            keepalive: Duration::from_secs(keepalive_secs),
            publish_timeout,
        })
    }
}
