//! Protocol bridge: a local stdio endpoint proxied to a remote event-stream hub.
//!
//! Requests read from local input are POSTed to the endpoint the hub announces
//! on its event stream; their replies arrive later on that same stream and are
//! matched back by request id. Each reply is written to local output exactly
//! once, or replaced by a local error when the endpoint never shows up, the
//! POST fails or the reply times out.

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tracing::{debug, info, warn};

use super::protocol::{
    classify, id_key, JsonRpcResponse, MessageKind, INTERNAL_ERROR, INVALID_REQUEST, PARSE_ERROR,
};
use super::sse::{SseDecoder, SseEvent};
use super::stdio_server::{read_message, write_lines};
use crate::domain::models::BridgeConfig;
use crate::infrastructure::logging::scrub;
use crate::infrastructure::retry::{RetryPolicy, Transient};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Timeout waiting for server endpoint")]
    EndpointTimeout,

    #[error("Timed out after {0}s waiting for response")]
    Timeout(u64),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),
}

impl Transient for BridgeError {
    fn is_transient(&self) -> bool {
        match self {
            BridgeError::Network(_) => true,
            BridgeError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        BridgeError::Network(err.to_string())
    }
}

/// POSTs message bodies to the hub, retrying transient failures.
#[derive(Clone)]
pub struct MessagePoster {
    http: Client,
    api_key: Option<String>,
    retry: RetryPolicy,
    request_timeout: Duration,
}

impl MessagePoster {
    pub fn new(
        http: Client,
        api_key: Option<String>,
        retry: RetryPolicy,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http,
            api_key,
            retry,
            request_timeout,
        }
    }

    /// One POST; any non-2xx status is an error.
    pub async fn post_once(&self, url: &Url, body: &str) -> Result<(), BridgeError> {
        let mut request = self
            .http
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .timeout(self.request_timeout)
            .body(body.to_string());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(BridgeError::Status {
            status: status.as_u16(),
            body,
        })
    }

    /// POST with exponential backoff on network failures and 5xx replies.
    pub async fn post(&self, url: &Url, body: &str) -> Result<(), BridgeError> {
        self.retry.execute(|| self.post_once(url, body)).await
    }
}

struct Shared {
    base_url: Url,
    sse_url: Url,
    http: Client,
    api_key: Option<String>,
    poster: MessagePoster,
    reconnect: RetryPolicy,
    request_timeout: Duration,
    endpoint_timeout: Duration,
    endpoint: watch::Sender<Option<Url>>,
    pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
    in_flight: AtomicUsize,
    drained: Notify,
}

/// Counts one message being handled; the count drops when this does.
struct InFlight(Arc<Shared>);

impl InFlight {
    fn enter(shared: &Arc<Shared>) -> Self {
        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(shared))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.drained.notify_waiters();
        }
    }
}

pub struct Bridge {
    shared: Arc<Shared>,
}

impl Bridge {
    pub fn new(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let base_url = Url::parse(&config.server_url)
            .map_err(|e| BridgeError::InvalidUrl(format!("{}: {e}", config.server_url)))?;
        let sse_url = base_url
            .join(&config.sse_path)
            .map_err(|e| BridgeError::InvalidUrl(format!("{}: {e}", config.sse_path)))?;
        let http = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        let api_key = config.api_key.clone().filter(|k| !k.is_empty());

        let retry = RetryPolicy::new(
            config.max_retries,
            config.initial_backoff_ms,
            config.max_backoff_ms,
        );
        let poster = MessagePoster::new(http.clone(), api_key.clone(), retry, request_timeout);
        let (endpoint, _) = watch::channel(None);

        Ok(Self {
            shared: Arc::new(Shared {
                base_url,
                sse_url,
                http,
                api_key,
                poster,
                reconnect: RetryPolicy::new(u32::MAX, config.initial_backoff_ms, config.max_backoff_ms),
                request_timeout,
                endpoint_timeout: Duration::from_secs(config.endpoint_timeout_secs),
                endpoint,
                pending: Mutex::new(HashMap::new()),
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
        })
    }

    /// Bridge the process's stdin/stdout until input ends or Ctrl-C.
    pub async fn run(&self) -> anyhow::Result<()> {
        let interrupt = async {
            let _ = tokio::signal::ctrl_c().await;
        };
        self.run_with_io(tokio::io::stdin(), tokio::io::stdout(), interrupt)
            .await
    }

    /// Bridge `reader` to `writer` until input ends or `shutdown` resolves.
    ///
    /// Input stops being read at shutdown, but every request already read is
    /// answered before the event stream is torn down.
    pub async fn run_with_io<R, W, F>(&self, reader: R, writer: W, shutdown: F) -> anyhow::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = ()>,
    {
        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let writer_task = tokio::spawn(write_lines(out_rx, writer));
        let (stop_tx, stop_rx) = watch::channel(false);
        let listener = tokio::spawn(listen(Arc::clone(&self.shared), out_tx.clone(), stop_rx));

        info!(server = %self.shared.base_url, "Bridge started");

        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        tokio::pin!(shutdown);
        loop {
            let line = tokio::select! {
                line = read_message(&mut reader, &mut buf) => line,
                () = &mut shutdown => {
                    info!("Interrupt received, no longer accepting input");
                    break;
                }
            };
            match line {
                Ok(Some(Ok(line))) => {
                    if line.is_empty() {
                        continue;
                    }
                    let guard = InFlight::enter(&self.shared);
                    let out = out_tx.clone();
                    tokio::spawn(async move {
                        guard.0.handle_line(line, out).await;
                        drop(guard);
                    });
                }
                Ok(Some(Err(reply))) => {
                    let _ = out_tx.send(reply.to_line());
                }
                Ok(None) => {
                    info!("Local input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read local input");
                    break;
                }
            }
        }

        self.shared.drain().await;
        stop_tx.send_replace(true);
        let _ = listener.await;
        drop(out_tx);
        writer_task.await??;

        info!("Bridge stopped");
        Ok(())
    }

    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    pub fn endpoint(&self) -> Option<Url> {
        self.shared.endpoint.borrow().clone()
    }
}

impl Shared {
    async fn drain(&self) {
        loop {
            let notified = self.drained.notified();
            let remaining = self.in_flight.load(Ordering::SeqCst);
            if remaining == 0 {
                return;
            }
            debug!(remaining, "Waiting for in-flight requests");
            notified.await;
        }
    }

    async fn handle_line(&self, line: String, out: mpsc::UnboundedSender<String>) {
        let message: Value = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Malformed local input");
                let reply = JsonRpcResponse::error(Value::Null, PARSE_ERROR, format!("Parse error: {e}"));
                let _ = out.send(reply.to_line());
                return;
            }
        };

        match classify(&message) {
            MessageKind::Request { id } => {
                let reply = match self.request(&id, &line).await {
                    Ok(reply) => reply,
                    Err(err) => {
                        warn!(request_id = %id, error = %err, "Request failed");
                        JsonRpcResponse::error(id, INTERNAL_ERROR, err.to_string()).to_line()
                    }
                };
                let _ = out.send(reply);
            }
            MessageKind::Notification | MessageKind::Response { .. } => {
                if let Err(err) = self.forward(&line).await {
                    warn!(error = %err, "Dropped notification");
                }
            }
            MessageKind::Invalid => {
                let reply = JsonRpcResponse::error(Value::Null, INVALID_REQUEST, "Invalid request");
                let _ = out.send(reply.to_line());
            }
        }
    }

    async fn request(&self, id: &Value, body: &str) -> Result<String, BridgeError> {
        let endpoint = self.wait_for_endpoint().await?;
        let key = id_key(id);

        // Registered before sending: the reply may beat the POST response.
        let (tx, rx) = oneshot::channel();
        self.pending_slots().insert(key.clone(), tx);

        debug!(request_id = %id, "Posting request");
        if let Err(err) = self.poster.post(&endpoint, body).await {
            self.pending_slots().remove(&key);
            return Err(err);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(BridgeError::Network("reply slot was replaced".to_string())),
            Err(_) => {
                self.pending_slots().remove(&key);
                Err(BridgeError::Timeout(self.request_timeout.as_secs()))
            }
        }
    }

    async fn forward(&self, body: &str) -> Result<(), BridgeError> {
        let endpoint = self.wait_for_endpoint().await?;
        self.poster.post(&endpoint, body).await
    }

    async fn wait_for_endpoint(&self) -> Result<Url, BridgeError> {
        let mut rx = self.endpoint.subscribe();
        let wait = async {
            loop {
                let current = rx.borrow_and_update().clone();
                if let Some(url) = current {
                    return Some(url);
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };

        match tokio::time::timeout(self.endpoint_timeout, wait).await {
            Ok(Some(url)) => Ok(url),
            Ok(None) | Err(_) => Err(BridgeError::EndpointTimeout),
        }
    }

    fn pending_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<String>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// One event-stream session. Errors before the stream opens are returned;
    /// a stream that opened and later broke counts as a completed session.
    async fn stream_events(&self, out: &mpsc::UnboundedSender<String>) -> Result<(), BridgeError> {
        let mut request = self
            .http
            .get(self.sse_url.clone())
            .header(ACCEPT, "text/event-stream");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Status {
                status: status.as_u16(),
                body,
            });
        }
        info!(url = %self.sse_url, "Event stream connected");

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(chunk) => {
                    for event in decoder.feed(&chunk) {
                        self.handle_event(event, out);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Event stream interrupted");
                    return Ok(());
                }
            }
        }
        warn!("Event stream closed by server");
        Ok(())
    }

    fn handle_event(&self, event: SseEvent, out: &mpsc::UnboundedSender<String>) {
        match event.event.as_str() {
            "endpoint" => match self.base_url.join(event.data.trim()) {
                Ok(url) => {
                    let changed = self.endpoint.send_if_modified(|current| {
                        if current.as_ref() == Some(&url) {
                            false
                        } else {
                            *current = Some(url.clone());
                            true
                        }
                    });
                    if changed {
                        info!(endpoint = %url, "Endpoint announced");
                    }
                }
                Err(e) => warn!(data = %event.data, error = %e, "Unusable endpoint announcement"),
            },
            "message" => self.route_message(event.data, out),
            other => debug!(event = other, "Ignoring event"),
        }
    }

    fn route_message(&self, data: String, out: &mpsc::UnboundedSender<String>) {
        let message: Value = match serde_json::from_str(&data) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Discarding malformed message event");
                return;
            }
        };

        match classify(&message) {
            MessageKind::Response { id } => {
                let slot = self.pending_slots().remove(&id_key(&id));
                match slot {
                    Some(tx) => {
                        let _ = tx.send(data);
                    }
                    None => debug!(request_id = %id, "Dropping reply with no waiting request"),
                }
            }
            MessageKind::Request { .. } | MessageKind::Notification => {
                debug!(message = %scrub(&data), "Forwarding server message");
                let _ = out.send(data);
            }
            MessageKind::Invalid => warn!("Discarding message event without id or method"),
        }
    }
}

/// Keep an event stream open, reconnecting with capped backoff until stopped.
async fn listen(
    shared: Arc<Shared>,
    out: mpsc::UnboundedSender<String>,
    mut stop: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    loop {
        let session = tokio::select! {
            result = shared.stream_events(&out) => result,
            _ = stop.changed() => return,
        };
        match session {
            Ok(()) => attempt = 0,
            Err(err) => warn!(error = %err, "Event stream connection failed"),
        }

        let delay = shared.reconnect.calculate_backoff(attempt);
        attempt = attempt.saturating_add(1);
        debug!(?delay, "Reconnecting event stream");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = stop.changed() => return,
        }
    }
}
