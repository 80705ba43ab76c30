//! Common test utilities for integration tests
//!
//! An in-memory frame connector stands in for the backend WebSocket: every
//! `connect` hands the test a `BackendSession` holding the server ends of a
//! fresh channel pair.

#![allow(dead_code)]

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use nas_mcp::domain::ports::BackendError;
use nas_mcp::infrastructure::rpc::{Connector, FrameChannel};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Connector whose connections are served by the test itself.
pub struct MemoryConnector {
    sessions: mpsc::UnboundedSender<BackendSession>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<BackendSession>) {
        let (sessions, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                sessions,
                connects: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<FrameChannel, BackendError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (to_server, from_client) = fmpsc::unbounded::<String>();
        let (to_client, from_server) = fmpsc::unbounded::<Result<String, BackendError>>();

        self.sessions
            .send(BackendSession {
                inbound: from_client,
                outbound: to_client,
            })
            .map_err(|_| BackendError::Connect("backend unavailable".to_string()))?;

        let sink = to_server.sink_map_err(|_| BackendError::ConnectionClosed);
        Ok(FrameChannel::new(sink, from_server))
    }
}

/// A method call as received by the fake backend.
#[derive(Debug, Clone)]
pub struct Call {
    pub id: String,
    pub method: String,
    pub params: Value,
}

/// Server end of one in-memory connection.
pub struct BackendSession {
    inbound: fmpsc::UnboundedReceiver<String>,
    outbound: fmpsc::UnboundedSender<Result<String, BackendError>>,
}

impl BackendSession {
    /// Next frame written by the client.
    pub async fn recv(&mut self) -> Value {
        let text = tokio::time::timeout(WAIT, self.inbound.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client closed the connection");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    pub fn send(&self, frame: Value) {
        self.outbound
            .unbounded_send(Ok(frame.to_string()))
            .expect("client reader is gone");
    }

    /// Consume the connect frame and accept it.
    pub async fn accept_handshake(&mut self) {
        let hello = self.recv().await;
        assert_eq!(hello, json!({"msg": "connect", "version": "1", "support": ["1"]}));
        self.send(json!({"msg": "connected", "session": "test-session"}));
    }

    /// Accept the handshake and the API-key login.
    pub async fn accept_login(&mut self, expected_key: &str) {
        self.accept_handshake().await;
        let login = self.next_call().await;
        assert_eq!(login.method, "auth.login_with_api_key");
        assert_eq!(login.params, json!([expected_key]));
        self.reply(&login.id, json!(true));
    }

    pub async fn next_call(&mut self) -> Call {
        let frame = self.recv().await;
        assert_eq!(frame["msg"], "method", "unexpected frame {frame}");
        Call {
            id: frame["id"].as_str().expect("call id is a string").to_string(),
            method: frame["method"].as_str().expect("method name").to_string(),
            params: frame["params"].clone(),
        }
    }

    pub fn reply(&self, id: &str, result: Value) {
        self.send(json!({"id": id, "msg": "result", "result": result}));
    }

    pub fn reject(&self, id: &str, code: i64, reason: &str) {
        self.send(json!({
            "id": id,
            "msg": "failed",
            "error": {"error": code, "reason": reason, "trace": null}
        }));
    }

    /// Break the transport with an error, as a reset socket would.
    pub fn reset(&self) {
        let _ = self
            .outbound
            .unbounded_send(Err(BackendError::Transport("connection reset by peer".to_string())));
    }
}

/// Serve every connection by handshaking and answering calls with `answer`.
pub fn spawn_backend<F>(mut sessions: mpsc::UnboundedReceiver<BackendSession>, answer: F)
where
    F: Fn(&Call) -> Value + Send + Sync + 'static,
{
    let answer = Arc::new(answer);
    tokio::spawn(async move {
        while let Some(mut session) = sessions.recv().await {
            let answer = Arc::clone(&answer);
            tokio::spawn(async move {
                let hello = match session.inbound.next().await {
                    Some(hello) => hello,
                    None => return,
                };
                assert!(hello.contains("\"connect\""));
                session.send(json!({"msg": "connected"}));

                while let Some(text) = session.inbound.next().await {
                    let frame: Value = serde_json::from_str(&text).unwrap();
                    if frame["msg"] != "method" {
                        continue;
                    }
                    let call = Call {
                        id: frame["id"].as_str().unwrap().to_string(),
                        method: frame["method"].as_str().unwrap().to_string(),
                        params: frame["params"].clone(),
                    };
                    let result = answer(&call);
                    session.reply(&call.id, result);
                }
            });
        }
    });
}

/// Minimal event-stream reader for HTTP tests.
pub struct SseClient {
    body: futures::stream::BoxStream<'static, Result<Vec<u8>, reqwest::Error>>,
    decoder: nas_mcp::adapters::mcp::SseDecoder,
    queued: std::collections::VecDeque<nas_mcp::adapters::mcp::SseEvent>,
}

impl SseClient {
    pub async fn open(url: &str, token: Option<&str>) -> reqwest::Result<Self> {
        let mut request = reqwest::Client::new()
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?.error_for_status()?;
        Ok(Self {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            decoder: nas_mcp::adapters::mcp::SseDecoder::new(),
            queued: Default::default(),
        })
    }

    pub async fn next_event(&mut self) -> nas_mcp::adapters::mcp::SseEvent {
        loop {
            if let Some(event) = self.queued.pop_front() {
                return event;
            }
            let chunk = tokio::time::timeout(WAIT, self.body.next())
                .await
                .expect("timed out waiting for an event")
                .expect("event stream ended")
                .expect("event stream failed");
            self.queued.extend(self.decoder.feed(&chunk));
        }
    }
}
