//! Object store.
//!
//! Pods are persisted as JSON under `pods/{node}/{uid}`. The `Store` trait is
//! the seam for other backends; `MemStore` keeps everything in process.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors returned by a store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key is required")]
    EmptyKey,

    #[error("store is closed")]
    Closed,
}

/// Key/value store for serialized resources.
#[async_trait]
pub trait Store: Send + Sync {
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All entries whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    async fn close(&self);
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemStore {
    inner: RwLock<MemInner>,
}

#[derive(Debug, Default)]
struct MemInner {
    items: BTreeMap<String, Vec<u8>>,
    closed: bool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let mut inner = self.inner.write().await;
        if inner.closed {
            return Err(StoreError::Closed);
        }
        inner.items.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let inner = self.inner.read().await;
        if inner.closed {
            return Err(StoreError::Closed);
        }
        inner
            .items
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.closed {
            return Err(StoreError::Closed);
        }
        inner
            .items
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError> {
        let inner = self.inner.read().await;
        if inner.closed {
            return Err(StoreError::Closed);
        }
        Ok(inner
            .items
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn close(&self) {
        let mut inner = self.inner.write().await;
        inner.closed = true;
        inner.items.clear();
    }
}
