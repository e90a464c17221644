//! Pod model.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace assigned to every pod. Only one namespace exists for now.
pub const DEFAULT_NAMESPACE: &str = "default";

/// A pod: one container spec plus runtime status, owned by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub uid: Uuid,
    pub nodename: String,
    pub namespace: String,
    pub spec: PodSpec,
    #[serde(default)]
    pub state: PodState,
}

impl Pod {
    /// Create a pending pod for `nodename` with a fresh UID.
    pub fn new(nodename: impl Into<String>, spec: PodSpec) -> Self {
        Self {
            uid: Uuid::new_v4(),
            nodename: nodename.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            spec,
            state: PodState::Pending,
        }
    }

    /// Container ID assigned by the runtime, empty until the pod has started.
    pub fn container_id(&self) -> &str {
        &self.spec.container.container_id
    }

    /// Image of the pod's container.
    pub fn image(&self) -> &str {
        &self.spec.container.image
    }
}

/// Desired state of a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSpec {
    pub container: Container,
}

/// A single container inside a pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Set by the node agent once the runtime has created the container.
    #[serde(rename = "containerid", default)]
    pub container_id: String,

    pub image: String,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default)]
    pub ports: Vec<Port>,

    /// Anonymous volumes, given as container paths.
    #[serde(default)]
    pub volumes: Vec<String>,
}

/// A host to container port mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    #[serde(default)]
    pub hostport: String,
    pub containerport: String,
}

/// Lifecycle state of a pod.
///
/// Transitions: `Pending -> Running`, `Pending -> Failed`, `Running -> Terminated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodState {
    #[default]
    Pending,
    Running,
    Failed,
    Terminated,
}

impl PodState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PodState::Pending => "pending",
            PodState::Running => "running",
            PodState::Failed => "failed",
            PodState::Terminated => "terminated",
        }
    }

    /// Whether `self -> next` is an allowed transition.
    pub fn can_transition_to(&self, next: PodState) -> bool {
        matches!(
            (self, next),
            (PodState::Pending, PodState::Running)
                | (PodState::Pending, PodState::Failed)
                | (PodState::Running, PodState::Terminated)
        )
    }
}

impl fmt::Display for PodState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_pod_is_pending() {
        let pod = Pod::new("node-1", PodSpec::default());
        assert_eq!(pod.state, PodState::Pending);
        assert_eq!(pod.namespace, DEFAULT_NAMESPACE);
        assert!(pod.container_id().is_empty());
        assert!(!pod.uid.is_nil());
    }

    #[test]
    fn test_pod_uids_are_unique() {
        let a = Pod::new("node-1", PodSpec::default());
        let b = Pod::new("node-1", PodSpec::default());
        assert_ne!(a.uid, b.uid);
    }

    #[test]
    fn test_state_transitions() {
        assert!(PodState::Pending.can_transition_to(PodState::Running));
        assert!(PodState::Pending.can_transition_to(PodState::Failed));
        assert!(PodState::Running.can_transition_to(PodState::Terminated));
        assert!(!PodState::Running.can_transition_to(PodState::Pending));
        assert!(!PodState::Terminated.can_transition_to(PodState::Running));
        assert!(!PodState::Failed.can_transition_to(PodState::Running));
    }

    #[test]
    fn test_container_wire_names() {
        let container = Container {
            container_id: "abc".to_string(),
            image: "nginx:latest".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&container).unwrap();
        assert_eq!(json["containerid"], "abc");
        assert_eq!(json["image"], "nginx:latest");
    }

    #[test]
    fn test_spec_defaults_missing_fields() {
        let spec: PodSpec = serde_json::from_str(r#"{"container":{"image":"redis"}}"#).unwrap();
        assert_eq!(spec.container.image, "redis");
        assert!(spec.container.env.is_empty());
        assert!(spec.container.ports.is_empty());
        assert!(spec.container.container_id.is_empty());
    }
}
