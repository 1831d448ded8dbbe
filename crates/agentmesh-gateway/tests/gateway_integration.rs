#![allow(clippy::unwrap_used, clippy::expect_used)]

use agentmesh_notify::{NotifierConfig, PushNotifier};
use agentmesh_orchestrator::{EchoAgent, Engine, EngineConfig, EventBus, HandlerRegistry};
use agentmesh_gateway::GatewayServer;
use agentmesh_tasks::{TaskStore, TaskStoreConfig};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Build a full gateway on a random port, returning its address.
async fn start_test_server() -> String {
    let mut registry = HandlerRegistry::new();
    registry.register("echo", Arc::new(EchoAgent));

    let store = Arc::new(TaskStore::new(TaskStoreConfig::default()));
    let events = EventBus::new(64);
    let notifier = Arc::new(PushNotifier::new(NotifierConfig::default()));
    let token = CancellationToken::new();
    events.spawn_notifier_bridge(notifier.clone(), token.clone());
    // Keep the bridge alive for the duration of the test process.
    std::mem::forget(token);

    let engine = Arc::new(Engine::new(
        Arc::new(registry),
        store,
        events,
        EngineConfig::default(),
    ));
    let app = GatewayServer::build(engine, notifier);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("127.0.0.1:{}", addr.port())
}

async fn execute(addr: &str, body: serde_json::Value) -> (reqwest::StatusCode, serde_json::Value) {
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/agent/execute"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    let body: serde_json::Value = resp.json().await.unwrap();
    (status, body)
}

#[tokio::test]
async fn health_reports_component_stats() {
    let addr = start_test_server().await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["components"]["taskStore"]["total_tasks"].is_number());
    assert!(body["components"]["pushNotifier"]["active_subscriptions"].is_number());
}

#[tokio::test]
async fn execute_echo_completes_and_is_queryable() {
    let addr = start_test_server().await;
    let (status, body) = execute(
        &addr,
        serde_json::json!({"agentName": "echo", "query": "ping"}),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["result"], "ping");
    let task_id = body["taskId"].as_str().unwrap();

    let record: serde_json::Value =
        reqwest::get(format!("http://{addr}/api/v1/tasks/{task_id}"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(record["status"], "completed");
    assert_eq!(record["agent_name"], "echo");
    assert!(record["result"].is_string());
}

#[tokio::test]
async fn execute_validates_required_fields() {
    let addr = start_test_server().await;

    let (status, body) = execute(&addr, serde_json::json!({"query": "ping"})).await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("agentName"));

    let (status, body) = execute(&addr, serde_json::json!({"agentName": "echo"})).await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("query"));
}

#[tokio::test]
async fn unknown_agent_returns_structured_failure_not_a_stuck_task() {
    let addr = start_test_server().await;
    let (status, body) = execute(
        &addr,
        serde_json::json!({"agentName": "ghost", "query": "boo"}),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().unwrap().contains("Agent not found"));

    let listing: serde_json::Value =
        reqwest::get(format!("http://{addr}/api/v1/tasks?status=running"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(listing["count"], 0);
}

#[tokio::test]
async fn task_listing_filters_and_paginates() {
    let addr = start_test_server().await;
    for i in 0..3 {
        execute(
            &addr,
            serde_json::json!({"agentName": "echo", "query": format!("q{i}")}),
        )
        .await;
    }

    let all: serde_json::Value = reqwest::get(format!("http://{addr}/api/v1/tasks"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all["count"], 3);

    let page: serde_json::Value =
        reqwest::get(format!("http://{addr}/api/v1/tasks?limit=2&offset=2"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(page["count"], 1);

    let filtered: serde_json::Value =
        reqwest::get(format!("http://{addr}/api/v1/tasks?agentName=echo&status=completed"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(filtered["count"], 3);

    let bad = reqwest::get(format!("http://{addr}/api/v1/tasks?status=sideways"))
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);
}

#[tokio::test]
async fn missing_task_paths_return_not_found() {
    let addr = start_test_server().await;
    let ghost_id = uuid::Uuid::new_v4();

    let resp = reqwest::get(format!("http://{addr}/api/v1/tasks/{ghost_id}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = reqwest::Client::new()
        .delete(format!("http://{addr}/api/v1/tasks/{ghost_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn delete_and_cancel_semantics() {
    let addr = start_test_server().await;
    let (_, body) = execute(
        &addr,
        serde_json::json!({"agentName": "echo", "query": "x"}),
    )
    .await;
    let task_id = body["taskId"].as_str().unwrap().to_string();

    // Cancelling a completed task is a conflict, not a silent success.
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/tasks/{task_id}/cancel"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = reqwest::Client::new()
        .delete(format!("http://{addr}/api/v1/tasks/{task_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 204);

    let resp = reqwest::get(format!("http://{addr}/api/v1/tasks/{task_id}"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn workflow_endpoint_plans_waves_and_rejects_cycles() {
    let addr = start_test_server().await;

    let body = serde_json::json!({
        "steps": [
            {"key": "echo"},
            {"key": "late", "dependsOn": ["echo"]},
        ],
        "queries": {"echo": "first"},
        "thresholds": [
            {"name": "confidence", "min_value": 0.0},
            {"name": "completeness", "min_value": 0.0},
        ],
    });
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/workflow/execute"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let outcome: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(outcome["waves"][0][0], "echo");
    assert_eq!(outcome["waves"][1][0], "late");
    assert_eq!(outcome["results"]["echo"]["status"], "completed");
    // "late" is unregistered, so it surfaces as unavailable, not fake data.
    assert_eq!(outcome["results"]["late"]["status"], "unavailable");

    let cyclic = serde_json::json!({
        "steps": [
            {"key": "a", "dependsOn": ["b"]},
            {"key": "b", "dependsOn": ["a"]},
        ],
    });
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/v1/workflow/execute"))
        .json(&cyclic)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("cycle"));
}

#[tokio::test]
async fn mesh_node_is_addressable_as_an_agent_over_rpc() {
    use agentmesh_client::{ConnectionPool, Endpoint, PoolConfig, PortRegistry, ProtocolClient};

    let addr = start_test_server().await;
    let endpoint = Endpoint::parse(&addr).unwrap();

    // Another mesh node would carry this entry in its port registry.
    let registry = Arc::new(PortRegistry::new());
    registry.register("peer", endpoint);
    let pool = Arc::new(ConnectionPool::new(PoolConfig::default()).unwrap());
    let client = ProtocolClient::new(registry, pool);

    let mut metadata = std::collections::HashMap::new();
    metadata.insert("agent".to_string(), serde_json::json!("echo"));
    let result = client
        .send_message_by_name("peer", serde_json::json!("across the wire"), metadata, None)
        .await
        .unwrap();
    assert_eq!(result, serde_json::json!("across the wire"));

    // The hop was recorded as a task on the receiving node.
    let listing: serde_json::Value =
        reqwest::get(format!("http://{addr}/api/v1/tasks?agentName=echo"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(listing["count"], 1);

    // An unknown method is a structured wire error, not a transport error.
    let raw: serde_json::Value = reqwest::Client::new()
        .post(format!("http://{addr}/rpc"))
        .json(&serde_json::json!({
            "method": "agent/unknown",
            "params": {"message": null},
            "id": 9
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(raw["id"], 9);
    assert!(raw["error"]["message"]
        .as_str()
        .unwrap()
        .contains("unknown method"));
}

#[tokio::test]
async fn websocket_welcome_ping_pong_and_progress_events() {
    let addr = start_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws/notifications"))
        .await
        .unwrap();

    let welcome: serde_json::Value =
        serde_json::from_str(ws.next().await.unwrap().unwrap().to_text().unwrap()).unwrap();
    assert_eq!(welcome["type"], "connected");
    assert!(welcome["subscription_id"].is_string());

    ws.send(Message::Text("ping".to_string())).await.unwrap();
    let pong = ws.next().await.unwrap().unwrap();
    assert_eq!(pong.to_text().unwrap(), "pong");

    execute(
        &addr,
        serde_json::json!({"agentName": "echo", "query": "ping"}),
    )
    .await;

    let mut kinds = Vec::new();
    for _ in 0..3 {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let event: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
        kinds.push(event["type"].as_str().unwrap().to_string());
        assert_eq!(event["agent_name"], "echo");
        assert!(event["timestamp"].is_string());
    }
    assert_eq!(kinds, vec!["task_created", "task_started", "task_completed"]);
}

#[tokio::test]
async fn websocket_agent_filter_suppresses_other_agents() {
    let addr = start_test_server().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!(
        "ws://{addr}/ws/notifications?agents=oracle"
    ))
    .await
    .unwrap();
    // Drain the welcome frame.
    ws.next().await.unwrap().unwrap();

    execute(
        &addr,
        serde_json::json!({"agentName": "echo", "query": "ping"}),
    )
    .await;

    // Events for "echo" must never reach an "oracle"-only subscriber.
    let quiet = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(quiet.is_err());
}
