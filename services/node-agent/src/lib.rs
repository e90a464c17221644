//! minipod Node Agent Library
//!
//! The node agent runs on each node and manages the containers of the pods
//! scheduled there. It watches the apiserver for pod events and converges
//! the node by driving a container runtime.
//!
//! ## Architecture
//!
//! ```text
//! apiserver ──SSE──▶ WatchClient ──events──▶ SyncLoop ──▶ PodWorker(s) ──▶ ContainerRuntime
//! ```
//!
//! ## Modules
//!
//! - `watch`: watch stream client with bounded reconnects
//! - `reconciler`: sync loop, pod workers and the pod table
//! - `runtime`: container runtime trait and mock
//! - `docker`: Docker Engine runtime
//! - `decoder`: pod spec to runtime options

pub mod agent;
pub mod client;
pub mod config;
pub mod decoder;
pub mod docker;
pub mod reconciler;
pub mod retry;
pub mod runtime;
pub mod watch;

pub use agent::NodeAgent;
pub use client::ApiServerClient;
pub use reconciler::{CleanupReport, ExitReason, RunSummary};
pub use runtime::{ContainerRuntime, MockRuntime};
