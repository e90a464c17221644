//! Sync loop turning watch events into container lifecycle actions.
//!
//! Each `Add` event runs pull, decode, create and start for the pod's
//! container. Each `Delete` event stops and removes it. Pods that reconcile
//! successfully are kept in a pod table keyed by UID; failures are logged
//! and dropped, never retried.
//!
//! With more than one worker, events are routed to a fixed worker by pod
//! UID, so events for one pod stay ordered while different pods reconcile
//! in parallel. Each worker owns its shard of the pod table and cleans it
//! up on exit.

use std::collections::HashMap;
use std::sync::Arc;

use minipod_api::{EventKind, Pod, PodState, WatchEvent};
use minipod_spec::SpecError;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::decoder::SpecDecoder;
use crate::retry::{shutdown_requested, wait_for_shutdown};
use crate::runtime::{ContainerRuntime, RuntimeError};

/// Capacity of each worker's queue.
const SHARD_BUFFER: usize = 64;

/// Reconciliation errors. Each one is local to the event that caused it.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("pod has a nil UID")]
    NilUid,

    #[error("pod {0} is already running")]
    AlreadyExists(Uuid),

    #[error("pod {0} is not known to this node")]
    UnknownPod(Uuid),

    #[error("image pull failed: {0}")]
    Pull(#[source] RuntimeError),

    #[error("invalid pod spec: {0}")]
    Decode(#[from] SpecError),

    #[error("container create failed: {0}")]
    Create(#[source] RuntimeError),

    #[error("container {id} failed to start: {source}")]
    Start { id: String, source: RuntimeError },

    #[error("container {id} could not be removed: {source}")]
    Remove { id: String, source: RuntimeError },

    #[error("pod {uid} cannot move from {from} to {to}")]
    InvalidTransition {
        uid: Uuid,
        from: PodState,
        to: PodState,
    },
}

fn check_transition(pod: &Pod, next: PodState) -> Result<(), ReconcileError> {
    if pod.state.can_transition_to(next) {
        Ok(())
    } else {
        Err(ReconcileError::InvalidTransition {
            uid: pod.uid,
            from: pod.state,
            to: next,
        })
    }
}

/// Pods running on this node, keyed by UID.
#[derive(Debug, Clone, Default)]
pub struct PodTable {
    pods: HashMap<Uuid, Pod>,
}

impl PodTable {
    pub fn get(&self, uid: &Uuid) -> Option<&Pod> {
        self.pods.get(uid)
    }

    pub fn contains(&self, uid: &Uuid) -> bool {
        self.pods.contains_key(uid)
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pod> {
        self.pods.values()
    }

    fn insert(&mut self, pod: Pod) {
        self.pods.insert(pod.uid, pod);
    }

    fn remove(&mut self, uid: &Uuid) -> Option<Pod> {
        self.pods.remove(uid)
    }

    fn uids(&self) -> Vec<Uuid> {
        self.pods.keys().copied().collect()
    }
}

/// A container that could not be cleaned up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub pod_uid: Uuid,
    pub container_id: String,
    pub error: String,
}

/// Outcome of removing every container on shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    pub failures: Vec<CleanupFailure>,
}

impl CleanupReport {
    pub fn merge(&mut self, other: CleanupReport) {
        self.removed += other.removed;
        self.failures.extend(other.failures);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn log(&self) {
        if self.is_clean() {
            info!(removed = self.removed, "Cleanup complete");
            return;
        }
        for failure in &self.failures {
            warn!(
                pod_uid = %failure.pod_uid,
                container_id = %failure.container_id,
                error = %failure.error,
                "Container left behind"
            );
        }
        error!(
            removed = self.removed,
            failed = self.failures.len(),
            "Cleanup finished with errors"
        );
    }
}

/// Reconciles the pods of one shard.
pub struct PodWorker {
    runtime: Arc<dyn ContainerRuntime>,
    decoder: Arc<dyn SpecDecoder>,
    pods: PodTable,
}

impl PodWorker {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, decoder: Arc<dyn SpecDecoder>) -> Self {
        Self {
            runtime,
            decoder,
            pods: PodTable::default(),
        }
    }

    pub fn pods(&self) -> &PodTable {
        &self.pods
    }

    /// Apply one event to the runtime.
    pub async fn handle_event(&mut self, event: WatchEvent) -> Result<(), ReconcileError> {
        match event.kind {
            EventKind::Add => self.add(event.pod).await,
            EventKind::Delete => self.delete(event.pod.uid).await,
        }
    }

    /// Apply one event and log the outcome.
    pub async fn process(&mut self, event: WatchEvent) -> Result<(), ReconcileError> {
        let kind = event.kind;
        let uid = event.pod.uid;
        let node = event.node.clone();
        let image = event.pod.image().to_string();

        let result = self.handle_event(event).await;
        match &result {
            Ok(()) => debug!(kind = %kind, pod_uid = %uid, "Event reconciled"),
            Err(ReconcileError::UnknownPod(_)) => {
                warn!(pod_uid = %uid, node = %node, "Ignoring delete for unknown pod")
            }
            Err(e) if kind == EventKind::Add => error!(
                pod_uid = %uid,
                node = %node,
                image = %image,
                state = %PodState::Failed,
                error = %e,
                "Failed to start pod"
            ),
            Err(e) => error!(
                pod_uid = %uid,
                node = %node,
                image = %image,
                error = %e,
                "Failed to delete pod"
            ),
        }
        result
    }

    async fn add(&mut self, mut pod: Pod) -> Result<(), ReconcileError> {
        if pod.uid.is_nil() {
            return Err(ReconcileError::NilUid);
        }
        if self.pods.contains(&pod.uid) {
            return Err(ReconcileError::AlreadyExists(pod.uid));
        }
        check_transition(&pod, PodState::Running)?;

        self.runtime
            .pull_image(pod.image())
            .await
            .map_err(ReconcileError::Pull)?;
        let options = self.decoder.decode(&pod.spec)?;
        let id = self
            .runtime
            .create_container(&options)
            .await
            .map_err(ReconcileError::Create)?;

        if let Err(source) = self.runtime.start_container(&id).await {
            if let Err(e) = self.runtime.remove_container(&id).await {
                warn!(container_id = %id, error = %e, "Failed to remove unstarted container");
            }
            return Err(ReconcileError::Start { id, source });
        }

        pod.spec.container.container_id = id;
        pod.state = PodState::Running;
        info!(
            pod_uid = %pod.uid,
            node = %pod.nodename,
            container_id = %pod.container_id(),
            image = %pod.image(),
            "Pod running"
        );
        self.pods.insert(pod);
        Ok(())
    }

    async fn delete(&mut self, uid: Uuid) -> Result<(), ReconcileError> {
        if !self.pods.contains(&uid) {
            return Err(ReconcileError::UnknownPod(uid));
        }
        self.remove_pod(uid).await
    }

    /// Stop and remove a pod's container, then drop it from the table.
    /// The pod stays in the table if removal fails.
    async fn remove_pod(&mut self, uid: Uuid) -> Result<(), ReconcileError> {
        let Some(pod) = self.pods.get(&uid) else {
            return Err(ReconcileError::UnknownPod(uid));
        };
        check_transition(pod, PodState::Terminated)?;
        let id = pod.container_id().to_string();

        if let Err(e) = self.runtime.stop_container(&id).await {
            warn!(pod_uid = %uid, container_id = %id, error = %e, "Stop failed, forcing removal");
        }
        match self.runtime.remove_container(&id).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => {}
            Err(source) => return Err(ReconcileError::Remove { id, source }),
        }

        if let Some(mut pod) = self.pods.remove(&uid) {
            pod.state = PodState::Terminated;
            info!(
                pod_uid = %uid,
                container_id = %id,
                state = %pod.state,
                "Pod removed"
            );
        }
        Ok(())
    }

    /// Best-effort removal of every container this worker created.
    pub async fn cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        for uid in self.pods.uids() {
            let container_id = self
                .pods
                .get(&uid)
                .map(|p| p.container_id().to_string())
                .unwrap_or_default();
            match self.remove_pod(uid).await {
                Ok(()) => report.removed += 1,
                Err(e) => report.failures.push(CleanupFailure {
                    pod_uid: uid,
                    container_id,
                    error: e.to_string(),
                }),
            }
        }
        report
    }
}

/// Why the sync loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Shutdown was requested.
    Shutdown,
    /// The watch channel closed on its own.
    WatchTerminated,
}

/// Result of a sync loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub reason: ExitReason,
    /// Events reconciled successfully.
    pub handled: usize,
    /// Events that failed to reconcile.
    pub failed: usize,
    pub cleanup: CleanupReport,
}

#[derive(Debug, Default)]
struct WorkerStats {
    handled: usize,
    failed: usize,
}

impl WorkerStats {
    fn record(&mut self, result: &Result<(), ReconcileError>) {
        match result {
            Ok(()) => self.handled += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Worker index for a pod.
pub fn shard_for(uid: &Uuid, workers: usize) -> usize {
    (uid.as_u128() % workers.max(1) as u128) as usize
}

/// Consumes watch events until shutdown or until the watch ends.
pub struct SyncLoop {
    runtime: Arc<dyn ContainerRuntime>,
    decoder: Arc<dyn SpecDecoder>,
    workers: usize,
}

impl SyncLoop {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        decoder: Arc<dyn SpecDecoder>,
        workers: usize,
    ) -> Self {
        Self {
            runtime,
            decoder,
            workers: workers.max(1),
        }
    }

    /// Run until shutdown fires or `events` closes, then clean up.
    pub async fn run(
        self,
        events: mpsc::Receiver<WatchEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> RunSummary {
        info!(workers = self.workers, "Starting sync loop");
        let summary = if self.workers == 1 {
            self.run_inline(events, shutdown).await
        } else {
            self.run_sharded(events, shutdown).await
        };

        summary.cleanup.log();
        info!(
            reason = ?summary.reason,
            handled = summary.handled,
            failed = summary.failed,
            "Sync loop stopped"
        );
        summary
    }

    async fn run_inline(
        self,
        mut events: mpsc::Receiver<WatchEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> RunSummary {
        let mut worker = PodWorker::new(self.runtime, self.decoder);
        let mut stats = WorkerStats::default();

        let reason = loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break ExitReason::Shutdown,
                event = events.recv() => match event {
                    Some(event) => {
                        let result = worker.process(event).await;
                        stats.record(&result);
                    }
                    None => break closed_reason(&shutdown),
                },
            }
        };

        RunSummary {
            reason,
            handled: stats.handled,
            failed: stats.failed,
            cleanup: worker.cleanup().await,
        }
    }

    async fn run_sharded(
        self,
        mut events: mpsc::Receiver<WatchEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> RunSummary {
        let mut shards = Vec::with_capacity(self.workers);
        let mut handles = Vec::with_capacity(self.workers);
        for index in 0..self.workers {
            let (tx, rx) = mpsc::channel(SHARD_BUFFER);
            let worker = PodWorker::new(self.runtime.clone(), self.decoder.clone());
            handles.push(tokio::spawn(run_shard(index, worker, rx, shutdown.clone())));
            shards.push(tx);
        }

        let reason = loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut shutdown) => break ExitReason::Shutdown,
                event = events.recv() => match event {
                    Some(event) => {
                        let shard = shard_for(&event.pod.uid, self.workers);
                        tokio::select! {
                            _ = wait_for_shutdown(&mut shutdown) => break ExitReason::Shutdown,
                            result = shards[shard].send(event) => {
                                if result.is_err() {
                                    error!(shard = shard, "Worker exited early, event dropped");
                                }
                            }
                        }
                    }
                    None => break closed_reason(&shutdown),
                },
            }
        };

        // Closing the queues lets each worker drain and clean up.
        drop(shards);

        let mut summary = RunSummary {
            reason,
            handled: 0,
            failed: 0,
            cleanup: CleanupReport::default(),
        };
        for handle in handles {
            match handle.await {
                Ok((stats, report)) => {
                    summary.handled += stats.handled;
                    summary.failed += stats.failed;
                    summary.cleanup.merge(report);
                }
                Err(e) => error!(error = %e, "Worker task failed"),
            }
        }
        summary
    }
}

fn closed_reason(shutdown: &watch::Receiver<bool>) -> ExitReason {
    if shutdown_requested(shutdown) {
        ExitReason::Shutdown
    } else {
        ExitReason::WatchTerminated
    }
}

async fn run_shard(
    index: usize,
    mut worker: PodWorker,
    mut events: mpsc::Receiver<WatchEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> (WorkerStats, CleanupReport) {
    debug!(shard = index, "Worker started");
    let mut stats = WorkerStats::default();

    loop {
        tokio::select! {
            _ = wait_for_shutdown(&mut shutdown) => break,
            event = events.recv() => match event {
                Some(event) => {
                    let result = worker.process(event).await;
                    stats.record(&result);
                }
                None => break,
            },
        }
    }

    let report = worker.cleanup().await;
    debug!(shard = index, removed = report.removed, "Worker stopped");
    (stats, report)
}
