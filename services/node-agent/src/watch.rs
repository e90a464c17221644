//! Watch stream client.
//!
//! Holds a long-lived event stream open against the apiserver, decodes its
//! frames and forwards pod events to the sync loop. Failed connections are
//! retried with bounded exponential backoff; when the budget runs out the
//! output channel is closed and the watch is over.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use minipod_api::frame::FrameDecoder;
use minipod_api::{FrameError, WatchEvent};
use reqwest::header::ACCEPT;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::retry::{shutdown_requested, sleep_or_shutdown, wait_for_shutdown, RetryPolicy};

/// Capacity of the channel between the watch task and the sync loop.
const EVENT_BUFFER: usize = 16;

/// Watch errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("failed to connect to apiserver: {0}")]
    Connect(String),

    #[error("watch timed out: {0}")]
    Timeout(String),

    #[error("watch stream interrupted: {0}")]
    Interrupted(String),

    #[error("apiserver rejected watch with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid watch request: {0}")]
    Request(String),
}

impl WatchError {
    /// Transport failures are worth another attempt; rejections are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WatchError::Connect(_) | WatchError::Timeout(_) | WatchError::Interrupted(_)
        )
    }
}

/// Opens watch streams.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn EventStream>, WatchError>;
}

/// An open watch stream, read as raw chunks.
#[async_trait]
pub trait EventStream: Send {
    /// Next chunk of the body, or `None` once the server closed the stream.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, WatchError>;
}

/// Event source for the apiserver's `/v1/watch` endpoint.
pub struct HttpEventSource {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpEventSource {
    pub fn new(base_url: &str, node: &str, connect_timeout: Duration) -> Result<Self, WatchError> {
        // No overall timeout: the stream is meant to stay open.
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| WatchError::Request(e.to_string()))?;
        let url = reqwest::Url::parse_with_params(
            &format!("{}/v1/watch", base_url.trim_end_matches('/')),
            &[("nodename", node)],
        )
        .map_err(|e| WatchError::Request(e.to_string()))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }
}

fn classify(e: reqwest::Error) -> WatchError {
    if e.is_timeout() {
        WatchError::Timeout(e.to_string())
    } else if e.is_builder() {
        WatchError::Request(e.to_string())
    } else if e.is_connect() || e.is_request() {
        WatchError::Connect(e.to_string())
    } else {
        WatchError::Interrupted(e.to_string())
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn connect(&self) -> Result<Box<dyn EventStream>, WatchError> {
        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WatchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Box::new(HttpEventStream { response }))
    }
}

struct HttpEventStream {
    response: reqwest::Response,
}

#[async_trait]
impl EventStream for HttpEventStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, WatchError> {
        match self.response.chunk().await {
            Ok(chunk) => Ok(chunk.map(|b| b.to_vec())),
            Err(e) if e.is_timeout() => Err(WatchError::Timeout(e.to_string())),
            Err(e) => Err(WatchError::Interrupted(e.to_string())),
        }
    }
}

/// Starts watch tasks.
#[derive(Clone)]
pub struct WatchClient {
    source: Arc<dyn EventSource>,
    policy: RetryPolicy,
    idle_timeout: Duration,
}

impl WatchClient {
    pub fn new(source: Arc<dyn EventSource>, policy: RetryPolicy) -> Self {
        Self {
            source,
            policy,
            idle_timeout: Duration::from_secs(45),
        }
    }

    /// Treat a stream that delivers nothing for `idle_timeout` as timed out.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Start watching. Returns at once; events arrive on the receiver, which
    /// closes when the watch gives up or `shutdown` fires.
    pub fn watch(&self, shutdown: watch::Receiver<bool>) -> mpsc::Receiver<WatchEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let task = WatchTask {
            source: self.source.clone(),
            policy: self.policy,
            idle_timeout: self.idle_timeout,
            tx,
            shutdown,
        };
        tokio::spawn(task.run());
        rx
    }
}

/// How a single stream session ended.
enum Outcome {
    /// Shutdown fired or the receiver went away.
    Stopped,
    /// The server closed the stream.
    Eof,
    Failed(WatchError),
}

enum Forwarded {
    Sent,
    Dropped,
    /// Shutdown fired or the receiver went away.
    Stop,
}

struct WatchTask {
    source: Arc<dyn EventSource>,
    policy: RetryPolicy,
    idle_timeout: Duration,
    tx: mpsc::Sender<WatchEvent>,
    shutdown: watch::Receiver<bool>,
}

impl WatchTask {
    async fn run(mut self) {
        let mut failures = 0u32;

        loop {
            if shutdown_requested(&self.shutdown) {
                break;
            }

            let (healthy, outcome) = self.session().await;
            if healthy {
                failures = 0;
            }

            let err = match outcome {
                Outcome::Stopped => break,
                Outcome::Eof if healthy => {
                    info!("Watch stream closed by server, reconnecting");
                    continue;
                }
                Outcome::Eof => {
                    WatchError::Interrupted("stream closed before any event".to_string())
                }
                Outcome::Failed(e) => e,
            };

            if !err.is_retryable() {
                error!(error = %err, "Watch failed permanently");
                break;
            }

            failures += 1;
            if !self.policy.allows_retry(failures) {
                error!(attempts = failures, error = %err, "Watch retries exhausted");
                break;
            }

            let delay = self.policy.delay(failures - 1);
            warn!(
                attempt = failures,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Watch failed, retrying"
            );
            if !sleep_or_shutdown(delay, &mut self.shutdown).await {
                break;
            }
        }

        debug!("Watch task exiting");
        // Dropping `self.tx` closes the output channel.
    }

    /// Run one connection. Returns whether the session proved healthy and how
    /// it ended.
    ///
    /// A session is healthy once it has delivered an event, or once it has
    /// stayed open for a full idle timeout. Keepalives alone do not count.
    async fn session(&mut self) -> (bool, Outcome) {
        let connected = tokio::select! {
            _ = wait_for_shutdown(&mut self.shutdown) => return (false, Outcome::Stopped),
            result = self.source.connect() => result,
        };
        let mut stream = match connected {
            Ok(stream) => stream,
            Err(e) => return (false, Outcome::Failed(e)),
        };
        info!("Watch stream connected");

        let opened = Instant::now();
        let idle_timeout = self.idle_timeout;
        let healthy = |delivered: bool| delivered || opened.elapsed() >= idle_timeout;
        let mut decoder = FrameDecoder::new();
        let mut delivered = false;

        loop {
            let next = tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown) => {
                    return (healthy(delivered), Outcome::Stopped);
                }
                result = tokio::time::timeout(idle_timeout, stream.next_chunk()) => result,
            };

            let frames = match next {
                Err(_) => {
                    let err = WatchError::Timeout(format!(
                        "no data for {}s",
                        idle_timeout.as_secs_f64()
                    ));
                    return (healthy(delivered), Outcome::Failed(err));
                }
                Ok(Err(e)) => return (healthy(delivered), Outcome::Failed(e)),
                Ok(Ok(None)) => {
                    if let Some(frame) = decoder.finish() {
                        match self.forward(frame).await {
                            Forwarded::Sent => delivered = true,
                            Forwarded::Dropped => {}
                            Forwarded::Stop => return (healthy(delivered), Outcome::Stopped),
                        }
                    }
                    return (healthy(delivered), Outcome::Eof);
                }
                Ok(Ok(Some(chunk))) => decoder.push(&chunk),
            };

            for frame in frames {
                match self.forward(frame).await {
                    Forwarded::Sent => delivered = true,
                    Forwarded::Dropped => {}
                    Forwarded::Stop => return (healthy(delivered), Outcome::Stopped),
                }
            }
        }
    }

    /// Hand a decoded frame to the sync loop.
    async fn forward(&mut self, frame: Result<WatchEvent, FrameError>) -> Forwarded {
        let event = match frame {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed watch frame");
                return Forwarded::Dropped;
            }
        };
        debug!(
            kind = %event.kind,
            pod_uid = %event.pod.uid,
            node = %event.node,
            "Watch event received"
        );

        tokio::select! {
            _ = wait_for_shutdown(&mut self.shutdown) => Forwarded::Stop,
            result = self.tx.send(event) => match result {
                Ok(()) => Forwarded::Sent,
                Err(_) => Forwarded::Stop,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use minipod_api::frame::encode_event;
    use minipod_api::{Container, EventKind, Pod, PodSpec};

    enum Step {
        Refuse,
        Reject(u16),
        Stream(Vec<Vec<u8>>),
        /// Chunks spaced out by a fixed pause, then a clean close.
        Paced(Duration, Vec<Vec<u8>>),
        Hang,
    }

    struct ScriptedSource {
        steps: Mutex<VecDeque<Step>>,
        attempts: Mutex<Vec<Instant>>,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                attempts: Mutex::new(Vec::new()),
            })
        }

        fn attempts(&self) -> Vec<Instant> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn connect(&self) -> Result<Box<dyn EventStream>, WatchError> {
            self.attempts.lock().unwrap().push(Instant::now());
            let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Refuse);
            match step {
                Step::Refuse => Err(WatchError::Connect("connection refused".to_string())),
                Step::Reject(status) => Err(WatchError::Status {
                    status,
                    body: "rejected".to_string(),
                }),
                Step::Stream(chunks) => Ok(Box::new(ChunkStream(chunks.into()))),
                Step::Paced(pause, chunks) => Ok(Box::new(PacedStream {
                    pause,
                    chunks: chunks.into(),
                })),
                Step::Hang => Ok(Box::new(HangingStream)),
            }
        }
    }

    struct ChunkStream(VecDeque<Vec<u8>>);

    #[async_trait]
    impl EventStream for ChunkStream {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, WatchError> {
            Ok(self.0.pop_front())
        }
    }

    struct PacedStream {
        pause: Duration,
        chunks: VecDeque<Vec<u8>>,
    }

    #[async_trait]
    impl EventStream for PacedStream {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, WatchError> {
            tokio::time::sleep(self.pause).await;
            Ok(self.chunks.pop_front())
        }
    }

    struct HangingStream;

    #[async_trait]
    impl EventStream for HangingStream {
        async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, WatchError> {
            std::future::pending().await
        }
    }

    fn event(image: &str) -> WatchEvent {
        let spec = PodSpec {
            container: Container {
                image: image.to_string(),
                ..Default::default()
            },
        };
        WatchEvent::pod(EventKind::Add, Pod::new("node-1", spec))
    }

    fn frame(event: &WatchEvent) -> Vec<u8> {
        encode_event(event).unwrap().into_bytes()
    }

    fn client(source: Arc<ScriptedSource>) -> WatchClient {
        WatchClient::new(source, RetryPolicy::new(3, Duration::from_secs(1)))
    }

    async fn collect(mut rx: mpsc::Receiver<WatchEvent>) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retry_with_doubling_delays() {
        let source = ScriptedSource::new(vec![]);
        let (_tx, shutdown) = watch::channel(false);

        let events = collect(client(source.clone()).watch(shutdown)).await;
        assert!(events.is_empty());

        let attempts = source.attempts();
        assert_eq!(attempts.len(), 3);
        let first_gap = attempts[1] - attempts[0];
        let second_gap = attempts[2] - attempts[1];
        assert!(first_gap >= Duration::from_secs(1) && first_gap < Duration::from_millis(1100));
        assert!(second_gap >= Duration::from_secs(2) && second_gap < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let source = ScriptedSource::new(vec![Step::Reject(400)]);
        let (_tx, shutdown) = watch::channel(false);

        let events = collect(client(source.clone()).watch(shutdown)).await;
        assert!(events.is_empty());
        assert_eq!(source.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_survive_keepalives_and_bad_frames() {
        let first = event("nginx");
        let second = event("redis");

        let mut mixed = b":keepalive\n\n".to_vec();
        mixed.extend(frame(&first));
        mixed.extend(b":keepalive\n\ndata: {broken\n\n");
        let mut tail = frame(&second);
        let split = tail.split_off(10);

        let source = ScriptedSource::new(vec![Step::Stream(vec![
            b":keepalive\n\n".to_vec(),
            mixed,
            tail,
            split,
        ])]);
        let (_tx, shutdown) = watch::channel(false);

        let events = collect(client(source).watch(shutdown)).await;
        assert_eq!(events, vec![first, second]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_close_resets_budget() {
        let first = event("nginx");
        let second = event("redis");
        let source = ScriptedSource::new(vec![
            Step::Refuse,
            Step::Stream(vec![frame(&first)]),
            Step::Refuse,
            Step::Refuse,
            Step::Stream(vec![frame(&second)]),
        ]);
        let (_tx, shutdown) = watch::channel(false);

        let events = collect(client(source.clone()).watch(shutdown)).await;
        assert_eq!(events, vec![first, second]);
        // Three trailing refusals exhaust the fresh budget.
        assert_eq!(source.attempts().len(), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_streams_count_as_failures() {
        let source = ScriptedSource::new(vec![
            Step::Stream(vec![]),
            Step::Stream(vec![]),
            Step::Stream(vec![]),
            Step::Stream(vec![frame(&event("nginx"))]),
        ]);
        let (_tx, shutdown) = watch::channel(false);

        let events = collect(client(source.clone()).watch(shutdown)).await;
        assert!(events.is_empty());
        assert_eq!(source.attempts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_then_close_backs_off() {
        let keepalive_only = || Step::Stream(vec![b":keepalive\n\n".to_vec()]);
        let source = ScriptedSource::new(vec![
            keepalive_only(),
            keepalive_only(),
            keepalive_only(),
            keepalive_only(),
        ]);
        let (_tx, shutdown) = watch::channel(false);

        let events = collect(client(source.clone()).watch(shutdown)).await;
        assert!(events.is_empty());

        let attempts = source.attempts();
        assert_eq!(attempts.len(), 3);
        assert!(attempts[1] - attempts[0] >= Duration::from_secs(1));
        assert!(attempts[2] - attempts[1] >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_quiet_session_resets_budget() {
        let keepalives = vec![b":keepalive\n\n".to_vec(); 3];
        let source = ScriptedSource::new(vec![
            Step::Refuse,
            Step::Refuse,
            Step::Paced(Duration::from_secs(20), keepalives),
            Step::Refuse,
            Step::Refuse,
            Step::Refuse,
        ]);
        let (_tx, shutdown) = watch::channel(false);

        let events = collect(client(source.clone()).watch(shutdown)).await;
        assert!(events.is_empty());

        let attempts = source.attempts();
        assert_eq!(attempts.len(), 6);
        // The quiet session outlived the idle timeout, so the server's close
        // is followed by an immediate reconnect.
        let session = attempts[3] - attempts[2];
        assert!(session >= Duration::from_secs(80) && session < Duration::from_secs(81));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_stream_times_out() {
        let source = ScriptedSource::new(vec![Step::Hang]);
        let (_tx, shutdown) = watch::channel(false);
        let started = Instant::now();

        let watch = WatchClient::new(source.clone(), RetryPolicy::new(1, Duration::from_secs(1)))
            .with_idle_timeout(Duration::from_secs(45));
        let events = collect(watch.watch(shutdown)).await;

        assert!(events.is_empty());
        assert_eq!(source.attempts().len(), 1);
        assert!(started.elapsed() >= Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff() {
        let source = ScriptedSource::new(vec![]);
        let (tx, shutdown) = watch::channel(false);

        let watch = WatchClient::new(source.clone(), RetryPolicy::new(3, Duration::from_secs(60)));
        let mut rx = watch.watch(shutdown);

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();

        assert!(rx.recv().await.is_none());
        assert_eq!(source.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_streaming() {
        let source = ScriptedSource::new(vec![Step::Hang]);
        let (tx, shutdown) = watch::channel(false);
        let mut rx = client(source).watch(shutdown);

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(WatchError::Connect("x".into()).is_retryable());
        assert!(WatchError::Timeout("x".into()).is_retryable());
        assert!(WatchError::Interrupted("x".into()).is_retryable());
        assert!(!WatchError::Request("x".into()).is_retryable());
        assert!(!WatchError::Status {
            status: 500,
            body: String::new()
        }
        .is_retryable());
    }

    #[test]
    fn test_http_source_url() {
        let source =
            HttpEventSource::new("http://127.0.0.1:8080/", "node 1", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            source.url().as_str(),
            "http://127.0.0.1:8080/v1/watch?nodename=node+1"
        );
    }
}
