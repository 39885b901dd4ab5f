//! Agent regression tests.
//!
//! Exercises the wired agent context end to end with the in-memory
//! runtime: desired-state tasks through the dispatcher, message
//! publish/pull through the local API, and routing reconfiguration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tokio::sync::watch;
use tower::ServiceExt;

use foglet_core::{
    AgentConfig, ContainerTask, Registry, Route, RouteReceiver, TaskAction, Workload,
};
use foglet_runtime::fake::FakeRuntime;
use fogletd::agent::Agent;
use fogletd::dispatcher::run_dispatcher;

struct TestAgent {
    agent: Agent,
    runtime: Arc<FakeRuntime>,
    _data_dir: tempfile::TempDir,
}

fn test_agent() -> TestAgent {
    let data_dir = tempfile::tempdir().unwrap();
    let mut config = AgentConfig::default();
    config.agent.data_dir = data_dir.path().to_path_buf();
    config.connector.trust_store_dir = data_dir.path().join("trust-stores");

    let runtime = Arc::new(FakeRuntime::new());
    let agent = Agent::build(config, runtime.clone());
    TestAgent {
        agent,
        runtime,
        _data_dir: data_dir,
    }
}

fn remote_registry(id: i32) -> Registry {
    Registry {
        id,
        url: "quay.example/ns".to_string(),
        username: String::new(),
        password: String::new(),
        cert: None,
        dev_mode_enabled: false,
    }
}

#[tokio::test]
async fn desired_state_flows_through_the_dispatcher() {
    let mut t = test_agent();
    t.agent
        .registry
        .set_latest_workloads(vec![Workload::new("w1", "img:1", 5)]);
    t.agent.registry.set_registries(vec![remote_registry(5)]);

    let task_rx = t.agent.task_rx.take().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = tokio::spawn(run_dispatcher(
        t.agent.lifecycle.clone(),
        t.agent.status.clone(),
        task_rx,
        shutdown_rx,
    ));

    t.agent
        .task_tx
        .send(ContainerTask::new(TaskAction::Add, "w1"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(t.runtime.container("w1").unwrap().running);

    let _ = shutdown_tx.send(true);
    dispatcher.await.unwrap().unwrap();
}

#[tokio::test]
async fn publish_and_pull_through_the_local_api() {
    let t = test_agent();
    t.agent.registry.set_routes(HashMap::from([(
        "w1".to_string(),
        Route {
            producer: "w1".to_string(),
            receivers: vec![RouteReceiver::local("w2")],
        },
    )]));
    t.agent.router.start().await.unwrap();

    let api = foglet_api::build_router(t.agent.api_state());

    let body = serde_json::json!({
        "publisher": "w1",
        "tag": "temperature",
        "content_type": "application/json",
        "content": "eyJjIjoyMS41fQ==",
    });
    let req = Request::builder()
        .method("POST")
        .uri("/v2/messages/new")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let resp = api.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let req = Request::builder()
        .uri("/v2/messages/next?id=w2")
        .body(Body::empty())
        .unwrap();
    let resp = api.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["data"]["count"], 1);
    assert_eq!(value["data"]["messages"][0]["publisher"], "w1");
}

#[tokio::test]
async fn config_fetch_through_the_local_api() {
    let t = test_agent();
    let mut workload = Workload::new("w1", "img:1", 5);
    workload.config = serde_json::json!({"rate": 2});
    t.agent.registry.set_latest_workloads(vec![workload]);
    t.agent.router.start().await.unwrap();

    let api = foglet_api::build_router(t.agent.api_state());
    let req = Request::builder()
        .method("POST")
        .uri("/v2/config/get")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"id":"w1"}"#))
        .unwrap();
    let resp = api.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["data"]["config"]["rate"], 2);
}

#[tokio::test]
async fn route_change_is_applied_atomically() {
    let t = test_agent();
    t.agent.registry.set_routes(HashMap::from([(
        "p1".to_string(),
        Route {
            producer: "p1".to_string(),
            receivers: vec![RouteReceiver::local("r1")],
        },
    )]));
    t.agent.router.start().await.unwrap();

    t.agent.registry.set_routes(HashMap::from([
        (
            "p1".to_string(),
            Route {
                producer: "p1".to_string(),
                receivers: vec![RouteReceiver::local("r1")],
            },
        ),
        (
            "p2".to_string(),
            Route {
                producer: "p2".to_string(),
                receivers: vec![RouteReceiver::local("r3")],
            },
        ),
    ]));
    t.agent.router.update().await;

    let mut publishers = t.agent.router.publisher_uuids().await;
    publishers.sort();
    assert_eq!(publishers, vec!["p1", "p2"]);

    let mut receivers = t.agent.router.receiver_uuids().await;
    receivers.sort();
    assert_eq!(receivers, vec!["r1", "r3"]);
}

#[tokio::test]
async fn malformed_requests_do_not_touch_core_state() {
    let t = test_agent();
    t.agent.router.start().await.unwrap();
    let api = foglet_api::build_router(t.agent.api_state());

    let req = Request::builder()
        .method("POST")
        .uri("/v2/messages/new")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = api.oneshot(req).await.unwrap();
    assert!(resp.status().is_client_error());
    assert_eq!(t.agent.status.processed_messages(), 0);
}
