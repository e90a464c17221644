//! minipod Node Agent
//!
//! Watches the apiserver for this node's pod events and runs their
//! containers. On Ctrl-C every container it created is stopped and removed.

use anyhow::{bail, Result};
use minipod_node_agent::config::Config;
use minipod_node_agent::{ApiServerClient, ExitReason, NodeAgent};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        node = %config.node_name,
        apiserver_url = %config.apiserver_url,
        runtime = ?config.runtime,
        sync_workers = config.sync_workers,
        "Starting minipod node agent"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            let _ = shutdown_tx.send(true);
        }
    });

    // The watch only carries events published while this agent is connected.
    let client = ApiServerClient::new(&config)?;
    match client.list_pods().await {
        Ok(pods) if !pods.is_empty() => warn!(
            node = %config.node_name,
            pod_count = pods.len(),
            "Pods assigned before startup will not be started"
        ),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Could not list this node's pods"),
    }

    let agent = NodeAgent::from_config(config)?;
    let summary = agent.run(shutdown_rx).await?;

    match summary.reason {
        ExitReason::Shutdown => {
            info!("Node agent shutdown complete");
            Ok(())
        }
        ExitReason::WatchTerminated => {
            error!(
                removed = summary.cleanup.removed,
                left_behind = summary.cleanup.failures.len(),
                "Watch stream terminated"
            );
            bail!("watch stream terminated")
        }
    }
}
