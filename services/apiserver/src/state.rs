//! Application state shared across request handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::pods::PodService;
use crate::store::{MemStore, Store};
use crate::watch::EventBus;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn Store>,
    pods: PodService,
    bus: EventBus,
    keepalive: Duration,
}

impl AppState {
    /// Create a new application state.
    pub fn new(store: Arc<dyn Store>, bus: EventBus, keepalive: Duration) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                pods: PodService::new(store.clone(), bus.clone()),
                store,
                bus,
                keepalive,
            }),
        }
    }

    /// State backed by an in-memory store.
    pub fn in_memory(config: &Config) -> Self {
        Self::new(
            Arc::new(MemStore::new()),
            EventBus::with_publish_timeout(config.publish_timeout),
            config.keepalive,
        )
    }

    pub fn pods(&self) -> &PodService {
        &self.inner.pods
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.inner.store
    }

    /// Keepalive interval for watch streams.
    pub fn keepalive(&self) -> Duration {
        self.inner.keepalive
    }
}
