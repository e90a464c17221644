//! Container runtime interface and mock implementation.
//!
//! The runtime interface abstracts container lifecycle operations:
//! - Pulling images
//! - Creating, starting, stopping and removing containers
//!
//! `DockerRuntime` (see `docker`) talks to a real engine. `MockRuntime` keeps
//! containers in memory and records every call, for tests and development.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use minipod_spec::CreateContainerOptions;
use thiserror::Error;
use tracing::{debug, info};

/// Errors from a container runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    #[error("failed to pull image {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("runtime API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("runtime transport error: {0}")]
    Transport(String),
}

/// Container runtime interface.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the runtime is reachable.
    async fn ping(&self) -> Result<(), RuntimeError>;

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create a container and return its ID.
    async fn create_container(&self, options: &CreateContainerOptions)
        -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Remove a container, killing it if needed, along with its anonymous volumes.
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;
}

/// Shared, ordered record of calls made against test doubles.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: impl Into<String>) {
        self.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// Calls whose name (the part before `:`) is `op`.
    pub fn count(&self, op: &str) -> usize {
        self.lock()
            .iter()
            .filter(|c| c.split(':').next() == Some(op))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runtime operations a `MockRuntime` can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Ping,
    Pull,
    Create,
    Start,
    Stop,
    Remove,
}

#[derive(Debug, Default)]
struct MockState {
    /// Container ID to running flag.
    containers: HashMap<String, bool>,
}

/// Mock runtime for testing and development.
pub struct MockRuntime {
    /// Counter for generating container IDs.
    counter: AtomicU64,
    log: CallLog,
    failing: HashSet<MockOp>,
    slow_images: HashMap<String, Duration>,
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            log: CallLog::new(),
            failing: HashSet::new(),
            slow_images: HashMap::new(),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Create a mock runtime that fails `op`.
    pub fn failing(op: MockOp) -> Self {
        Self::new().with_failure(op)
    }

    pub fn with_failure(mut self, op: MockOp) -> Self {
        self.failing.insert(op);
        self
    }

    /// Record calls into an existing log.
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Make pulls of `image` take `delay`.
    pub fn with_slow_image(mut self, image: &str, delay: Duration) -> Self {
        self.slow_images.insert(image.to_string(), delay);
        self
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// IDs of containers that exist, running or not.
    pub fn containers(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.state().containers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.state().containers.get(id).copied().unwrap_or(false)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, op: MockOp) -> Result<(), RuntimeError> {
        if self.failing.contains(&op) {
            return Err(RuntimeError::Api {
                status: 500,
                message: format!("mock runtime configured to fail {op:?}"),
            });
        }
        Ok(())
    }

    fn next_container_id(&self) -> String {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("mock_{:012x}", counter)
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.log.push("ping");
        self.check(MockOp::Ping)
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.log.push(format!("pull:{image}"));
        if let Some(delay) = self.slow_images.get(image) {
            tokio::time::sleep(*delay).await;
        }
        self.check(MockOp::Pull).map_err(|e| RuntimeError::ImagePull {
            image: image.to_string(),
            message: e.to_string(),
        })?;
        debug!(image = %image, "[MOCK] Pulled image");
        Ok(())
    }

    async fn create_container(
        &self,
        options: &CreateContainerOptions,
    ) -> Result<String, RuntimeError> {
        self.log.push(format!("create:{}", options.image));
        self.check(MockOp::Create)?;

        let id = self.next_container_id();
        self.state().containers.insert(id.clone(), false);
        info!(image = %options.image, container_id = %id, "[MOCK] Created container");
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.log.push(format!("start:{id}"));
        self.check(MockOp::Start)?;

        match self.state().containers.get_mut(id) {
            Some(running) => {
                *running = true;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(id.to_string())),
        }
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.log.push(format!("stop:{id}"));
        self.check(MockOp::Stop)?;

        match self.state().containers.get_mut(id) {
            Some(running) => {
                *running = false;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(id.to_string())),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.log.push(format!("remove:{id}"));
        self.check(MockOp::Remove)?;

        match self.state().containers.remove(id) {
            Some(_) => {
                info!(container_id = %id, "[MOCK] Removed container");
                Ok(())
            }
            None => Err(RuntimeError::NotFound(id.to_string())),
        }
    }
}
