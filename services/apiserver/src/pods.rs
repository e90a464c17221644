//! Pod service.
//!
//! Persists pods and notifies the owning node over the event bus. A failed
//! notification is logged and does not undo the mutation.

use std::sync::Arc;

use minipod_api::{EventKind, Pod, PodSpec, WatchEvent};
use minipod_spec::SpecError;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::store::{Store, StoreError};
use crate::watch::EventBus;

/// Errors returned by the pod service.
#[derive(Debug, Error)]
pub enum PodError {
    #[error("nodename is required")]
    MissingNode,

    #[error("invalid pod spec: {0}")]
    InvalidSpec(#[from] SpecError),

    #[error("pod {uid} not found on node {node}")]
    NotFound { node: String, uid: Uuid },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("failed to encode pod: {0}")]
    Encoding(#[from] serde_json::Error),
}

fn pod_key(node: &str, uid: &Uuid) -> String {
    format!("pods/{node}/{uid}")
}

fn node_prefix(node: &str) -> String {
    format!("pods/{node}/")
}

/// Pod CRUD plus watch notifications.
#[derive(Clone)]
pub struct PodService {
    store: Arc<dyn Store>,
    bus: EventBus,
}

impl PodService {
    pub fn new(store: Arc<dyn Store>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Store a new pending pod for `node` and publish an `Add` event.
    pub async fn create(&self, node: &str, spec: PodSpec) -> Result<Pod, PodError> {
        if node.is_empty() {
            return Err(PodError::MissingNode);
        }
        minipod_spec::validate(&spec.container)?;

        let pod = Pod::new(node, spec);
        let bytes = serde_json::to_vec(&pod)?;
        self.store.set(&pod_key(node, &pod.uid), bytes).await?;

        info!(
            node = %node,
            pod_uid = %pod.uid,
            image = %pod.image(),
            "Created pod"
        );

        self.notify(EventKind::Add, pod.clone()).await;
        Ok(pod)
    }

    pub async fn get(&self, node: &str, uid: Uuid) -> Result<Pod, PodError> {
        if node.is_empty() {
            return Err(PodError::MissingNode);
        }
        let bytes = self
            .store
            .get(&pod_key(node, &uid))
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => PodError::NotFound {
                    node: node.to_string(),
                    uid,
                },
                other => PodError::Store(other),
            })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Pods on `node`, or on every node when `None`.
    pub async fn list(&self, node: Option<&str>) -> Result<Vec<Pod>, PodError> {
        let prefix = match node {
            Some(node) => node_prefix(node),
            None => "pods/".to_string(),
        };
        self.store
            .list(&prefix)
            .await?
            .into_iter()
            .map(|(_, bytes)| serde_json::from_slice(&bytes).map_err(PodError::from))
            .collect()
    }

    /// Remove a pod and publish a `Delete` event. Returns the removed pod.
    pub async fn delete(&self, node: &str, uid: Uuid) -> Result<Pod, PodError> {
        let pod = self.get(node, uid).await?;
        // A concurrent delete of the same pod may win between get and delete.
        self.store
            .delete(&pod_key(node, &uid))
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => PodError::NotFound {
                    node: node.to_string(),
                    uid,
                },
                other => PodError::Store(other),
            })?;

        info!(node = %node, pod_uid = %uid, "Deleted pod");

        self.notify(EventKind::Delete, pod.clone()).await;
        Ok(pod)
    }

    async fn notify(&self, kind: EventKind, pod: Pod) {
        let uid = pod.uid;
        let event = WatchEvent::pod(kind, pod);
        let key = event.key();
        if let Err(e) = self.bus.publish(event).await {
            warn!(
                error = %e,
                key = %key,
                pod_uid = %uid,
                kind = %kind,
                "Failed to notify watcher"
            );
        }
    }
}
