//! Watch events and subscription keys.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Pod;

/// Resource name used for pod events.
pub const POD_RESOURCE: &str = "pod";

/// What happened to the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Add,
    Delete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Add => f.write_str("add"),
            EventKind::Delete => f.write_str("delete"),
        }
    }
}

/// A notification that a resource owned by `node` changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub resource: String,
    pub node: String,
    pub pod: Pod,
}

impl WatchEvent {
    /// Pod event for the node that owns `pod`.
    pub fn pod(kind: EventKind, pod: Pod) -> Self {
        Self {
            kind,
            resource: POD_RESOURCE.to_string(),
            node: pod.nodename.clone(),
            pod,
        }
    }

    /// Key of the subscription this event is routed to.
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(&self.resource, &self.node)
    }
}

/// Routing key of a watch subscription, formatted as `resource/node`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey(String);

impl SubscriptionKey {
    pub fn new(resource: &str, node: &str) -> Self {
        Self(format!("{resource}/{node}"))
    }

    /// Key for the pod stream of `node`.
    pub fn pods(node: &str) -> Self {
        Self::new(POD_RESOURCE, node)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// A key is usable only if both halves are non-empty.
    pub fn is_valid(&self) -> bool {
        match self.0.split_once('/') {
            Some((resource, node)) => !resource.is_empty() && !node.is_empty(),
            None => false,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
