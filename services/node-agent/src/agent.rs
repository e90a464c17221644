//! Node agent wiring: runtime check, watch stream and sync loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;

use crate::client::ApiServerClient;
use crate::config::{Config, RuntimeKind};
use crate::decoder::{DefaultDecoder, SpecDecoder};
use crate::docker::DockerRuntime;
use crate::reconciler::{RunSummary, SyncLoop};
use crate::retry::RetryPolicy;
use crate::runtime::{ContainerRuntime, MockRuntime};
use crate::watch::{EventSource, WatchClient};

/// Agent for one node.
pub struct NodeAgent {
    config: Config,
    runtime: Arc<dyn ContainerRuntime>,
    decoder: Arc<dyn SpecDecoder>,
    source: Arc<dyn EventSource>,
}

impl NodeAgent {
    pub fn new(
        config: Config,
        runtime: Arc<dyn ContainerRuntime>,
        source: Arc<dyn EventSource>,
    ) -> Self {
        Self {
            config,
            runtime,
            decoder: Arc::new(DefaultDecoder),
            source,
        }
    }

    /// Build an agent with the runtime and apiserver named in `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let runtime: Arc<dyn ContainerRuntime> = match config.runtime {
            RuntimeKind::Docker => Arc::new(DockerRuntime::new(&config.docker_socket)),
            RuntimeKind::Mock => Arc::new(MockRuntime::new()),
        };
        let client = ApiServerClient::new(&config)?;
        let source = client
            .watch_source()
            .context("failed to build watch request")?;
        Ok(Self::new(config, runtime, Arc::new(source)))
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn SpecDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Run until shutdown or until the watch gives up.
    ///
    /// Fails only if the runtime is unreachable at startup. Everything after
    /// that is reported through the returned summary.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
        self.runtime
            .ping()
            .await
            .context("container runtime is not reachable")?;
        info!(node = %self.config.node_name, runtime = ?self.config.runtime, "Container runtime ready");

        let policy = RetryPolicy::new(self.config.watch_attempts, self.config.watch_initial_delay);
        let events = WatchClient::new(self.source, policy)
            .with_idle_timeout(self.config.watch_idle_timeout)
            .watch(shutdown.clone());

        let sync = SyncLoop::new(self.runtime, self.decoder, self.config.sync_workers);
        Ok(sync.run(events, shutdown).await)
    }
}
