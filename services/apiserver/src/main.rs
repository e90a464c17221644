//! minipod apiserver
//!
//! Accepts pod specs, stores them and streams pod events to the node agents
//! watching their node.

use anyhow::Result;
use minipod_apiserver::{api, config, state::AppState};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to MINIPOD_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting minipod apiserver");
    info!(
        listen_addr = %config.listen_addr,
        keepalive_secs = config.keepalive.as_secs(),
        publish_timeout_secs = ?config.publish_timeout.map(|t| t.as_secs()),
        "Configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState::in_memory(&config);
    let bus = state.bus().clone();
    let store = state.store().clone();
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
            bus.shutdown();
            store.close().await;
            return Ok(());
        }
    }

    // Watch streams never finish on their own; closing the bus ends them so
    // graceful shutdown can complete.
    bus.shutdown();
    let _ = shutdown_tx.send(true);

    let shutdown_timeout = std::time::Duration::from_secs(10);
    match tokio::time::timeout(shutdown_timeout, server_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "Server error during shutdown"),
        Ok(Err(e)) => error!(error = %e, "Server task panicked"),
        Err(_) => error!("HTTP server did not shut down in time"),
    }
    store.close().await;

    info!("Apiserver shutdown complete");
    Ok(())
}
