//! End-to-end tests: a real apiserver, the node agent and a mock runtime.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use minipod_api::{Pod, SubscriptionKey};
use minipod_apiserver::{api, state::AppState, store::MemStore, watch::EventBus};
use minipod_node_agent::config::{Config, RuntimeKind};
use minipod_node_agent::{ApiServerClient, ExitReason, MockRuntime, NodeAgent, RunSummary};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const NODE: &str = "node-e2e";

fn test_config(apiserver_url: &str) -> Config {
    Config {
        node_name: NODE.to_string(),
        apiserver_url: apiserver_url.to_string(),
        runtime: RuntimeKind::Mock,
        watch_attempts: 2,
        watch_initial_delay: Duration::from_millis(20),
        watch_idle_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

async fn start_apiserver() -> (String, AppState) {
    let state = AppState::new(
        Arc::new(MemStore::new()),
        EventBus::new(),
        Duration::from_millis(100),
    );
    let app = api::create_router(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), state)
}

fn spawn_agent(
    config: Config,
    runtime: Arc<MockRuntime>,
) -> (watch::Sender<bool>, JoinHandle<RunSummary>) {
    let client = ApiServerClient::new(&config).unwrap();
    let source = Arc::new(client.watch_source().unwrap());
    let agent = NodeAgent::new(config, runtime, source);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { agent.run(shutdown_rx).await.unwrap() });
    (shutdown_tx, handle)
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(10), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

async fn create_pod(base_url: &str, image: &str) -> Pod {
    let response = reqwest::Client::new()
        .post(format!("{base_url}/v1/pods?nodename={NODE}"))
        .json(&json!({ "container": { "image": image } }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    response.json().await.unwrap()
}

#[tokio::test]
async fn test_agent_runs_and_removes_pods() {
    let (base_url, state) = start_apiserver().await;
    let runtime = Arc::new(MockRuntime::new());
    let (shutdown_tx, handle) = spawn_agent(test_config(&base_url), runtime.clone());

    let key = SubscriptionKey::pods(NODE);
    eventually("agent watch", || {
        let bus = state.bus().clone();
        let key = key.clone();
        async move { bus.contains(&key) }
    })
    .await;

    let pod = create_pod(&base_url, "nginx").await;
    eventually("container start", || {
        let runtime = runtime.clone();
        async move { runtime.log().count("start") == 1 }
    })
    .await;
    let containers = runtime.containers();
    assert_eq!(containers.len(), 1);
    assert!(runtime.is_running(&containers[0]));

    let response = reqwest::Client::new()
        .delete(format!("{base_url}/v1/pods/{}?nodename={NODE}", pod.uid))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    eventually("container removal", || {
        let runtime = runtime.clone();
        async move { runtime.containers().is_empty() }
    })
    .await;

    create_pod(&base_url, "redis").await;
    eventually("second container", || {
        let runtime = runtime.clone();
        async move { runtime.log().count("start") == 2 }
    })
    .await;

    shutdown_tx.send(true).unwrap();
    let summary = handle.await.unwrap();
    assert_eq!(summary.reason, ExitReason::Shutdown);
    assert_eq!(summary.handled, 3);
    assert_eq!(summary.cleanup.removed, 1);
    assert!(summary.cleanup.is_clean());
    assert!(runtime.containers().is_empty());
}

#[tokio::test]
async fn test_unreachable_apiserver_terminates_watch() {
    // Reserve a port, then free it so nothing is listening there.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let runtime = Arc::new(MockRuntime::new());
    let (_shutdown_tx, handle) = spawn_agent(test_config(&format!("http://{addr}")), runtime);

    let summary = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("agent did not give up")
        .unwrap();
    assert_eq!(summary.reason, ExitReason::WatchTerminated);
    assert_eq!(summary.handled, 0);
}

#[tokio::test]
async fn test_bus_shutdown_ends_agent_watch() {
    let (base_url, state) = start_apiserver().await;
    let runtime = Arc::new(MockRuntime::new());
    let (_shutdown_tx, handle) = spawn_agent(test_config(&base_url), runtime.clone());

    let key = SubscriptionKey::pods(NODE);
    eventually("agent watch", || {
        let bus = state.bus().clone();
        let key = key.clone();
        async move { bus.contains(&key) }
    })
    .await;

    create_pod(&base_url, "nginx").await;
    eventually("container start", || {
        let runtime = runtime.clone();
        async move { runtime.log().count("start") == 1 }
    })
    .await;

    // With the bus closed every reconnect is rejected, so the agent gives up
    // and cleans up after itself.
    state.bus().shutdown();
    let summary = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("agent did not give up")
        .unwrap();
    assert_eq!(summary.reason, ExitReason::WatchTerminated);
    assert_eq!(summary.cleanup.removed, 1);
    assert!(runtime.containers().is_empty());
}

#[tokio::test]
async fn test_client_reads_back_node_pods() {
    let (base_url, _state) = start_apiserver().await;
    let client = ApiServerClient::new(&test_config(&base_url)).unwrap();
    assert!(client.list_pods().await.unwrap().is_empty());

    let nginx = create_pod(&base_url, "nginx").await;
    let redis = create_pod(&base_url, "redis").await;

    let fetched = client.get_pod(nginx.uid).await.unwrap();
    assert_eq!(fetched, nginx);

    let mut listed: Vec<_> = client
        .list_pods()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.uid)
        .collect();
    listed.sort();
    let mut expected = vec![nginx.uid, redis.uid];
    expected.sort();
    assert_eq!(listed, expected);

    // Pods on other nodes are not visible to this client.
    let other = ApiServerClient::with_base_url(&base_url, "other-node").unwrap();
    assert!(other.list_pods().await.unwrap().is_empty());
    assert!(other.get_pod(nginx.uid).await.is_err());
}

#[tokio::test]
async fn test_unreachable_runtime_fails_startup() {
    let (base_url, _state) = start_apiserver().await;
    let config = test_config(&base_url);
    let client = ApiServerClient::new(&config).unwrap();
    client.ping().await.unwrap();

    let runtime = Arc::new(MockRuntime::failing(minipod_node_agent::runtime::MockOp::Ping));
    let agent = NodeAgent::new(config, runtime, Arc::new(client.watch_source().unwrap()));
    let (_tx, rx) = watch::channel(false);
    assert!(agent.run(rx).await.is_err());
}
