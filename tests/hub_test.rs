//! Event-stream hub over a real socket.

mod common;

use async_trait::async_trait;
use common::SseClient;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use nas_mcp::adapters::mcp::{EventStreamHub, McpHandler};
use nas_mcp::domain::models::HubConfig;
use nas_mcp::services::{ToolDefinition, ToolError, ToolHandler, ToolRegistry};

const TOKEN: &str = "hub-token";

struct Echo;

#[async_trait]
impl ToolHandler for Echo {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Returns its arguments".to_string(),
            input_schema: json!({"type": "object"}),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        Ok(arguments)
    }
}

struct RunningHub {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    server: JoinHandle<anyhow::Result<()>>,
}

impl RunningHub {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn post(&self, path: &str, body: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(self.url(path))
            .bearer_auth(TOKEN)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap()
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.server.await.unwrap().unwrap();
    }
}

async fn start_hub() -> RunningHub {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(Echo));
    let config = HubConfig {
        api_key: Some(TOKEN.to_string()),
        ..HubConfig::default()
    };
    let hub = EventStreamHub::new(McpHandler::new(Arc::new(registry)), config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    let server = tokio::spawn(hub.serve_on(listener, async {
        let _ = stopped.await;
    }));

    RunningHub {
        addr,
        stop: Some(stop),
        server,
    }
}

async fn subscribe(hub: &RunningHub) -> (SseClient, String) {
    let mut client = SseClient::open(&hub.url("/sse"), Some(TOKEN)).await.unwrap();
    let endpoint = client.next_event().await;
    assert_eq!(endpoint.event, "endpoint");
    (client, endpoint.data)
}

#[tokio::test]
async fn test_first_event_announces_session_endpoint() {
    let hub = start_hub().await;
    let (_a, first) = subscribe(&hub).await;
    let (_b, second) = subscribe(&hub).await;

    assert!(first.starts_with("/messages?sessionId="));
    assert_ne!(first, second, "each subscriber gets its own session id");
    hub.shutdown().await;
}

#[tokio::test]
async fn test_reply_is_broadcast_to_every_subscriber() {
    let hub = start_hub().await;
    let (mut a, endpoint) = subscribe(&hub).await;
    let (mut b, _) = subscribe(&hub).await;

    let response = hub
        .post(
            &endpoint,
            r#"{"jsonrpc":"2.0","id":11,"method":"tools/call","params":{"name":"echo","arguments":{"x":1}}}"#,
        )
        .await;
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    for client in [&mut a, &mut b] {
        let event = client.next_event().await;
        assert_eq!(event.event, "message");
        let reply: Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(reply["id"], 11);
        assert!(reply["result"]["content"][0]["text"].as_str().unwrap().contains("\"x\""));
    }
    hub.shutdown().await;
}

#[tokio::test]
async fn test_closed_subscriber_does_not_affect_the_other() {
    let hub = start_hub().await;
    let (a, endpoint) = subscribe(&hub).await;
    let (mut b, _) = subscribe(&hub).await;
    drop(a);

    hub.post(&endpoint, r#"{"jsonrpc":"2.0","id":"p","method":"ping"}"#)
        .await;
    let event = b.next_event().await;
    let reply: Value = serde_json::from_str(&event.data).unwrap();
    assert_eq!(reply, json!({"jsonrpc": "2.0", "id": "p", "result": {}}));
    hub.shutdown().await;
}

#[tokio::test]
async fn test_invalid_json_is_accepted_and_answered_with_parse_error() {
    let hub = start_hub().await;
    let (mut a, endpoint) = subscribe(&hub).await;

    let response = hub.post(&endpoint, "{not json").await;
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    let reply: Value = serde_json::from_str(&a.next_event().await.data).unwrap();
    assert_eq!(reply["id"], Value::Null);
    assert_eq!(reply["error"]["code"], -32700);
    hub.shutdown().await;
}

#[tokio::test]
async fn test_auth_required_except_for_health() {
    let hub = start_hub().await;
    let client = reqwest::Client::new();

    let health = client.get(hub.url("/health")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    let body: Value = health.json().await.unwrap();
    assert_eq!(body["service"], "nas-mcp");
    assert_eq!(body["subscriber_count"], 0);

    let sse = client.get(hub.url("/sse")).send().await.unwrap();
    assert_eq!(sse.status(), reqwest::StatusCode::UNAUTHORIZED);

    let post = client
        .post(hub.url("/messages"))
        .bearer_auth("wrong")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(post.status(), reqwest::StatusCode::UNAUTHORIZED);
    hub.shutdown().await;
}

#[tokio::test]
async fn test_health_counts_subscribers() {
    let hub = start_hub().await;
    let (_a, _) = subscribe(&hub).await;
    let (_b, _) = subscribe(&hub).await;

    let body: Value = reqwest::get(hub.url("/health")).await.unwrap().json().await.unwrap();
    assert_eq!(body["subscriber_count"], 2);
    hub.shutdown().await;
}
