//! Multiplexing backend RPC client.
//!
//! One physical connection carries any number of concurrent calls. Callers
//! take the connection lock only to (re)establish the link; sending takes
//! the writer lock for a single frame; waiting for a reply holds no lock at
//! all. A single read loop per connection routes replies to the pending
//! slot registered under the reply's id.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::phase::{Phase, PhaseEvent};
use super::protocol::{encode, ConnectFrame, Inbound, InboundFrame, MethodFrame, PongFrame, LOGIN_METHOD};
use super::transport::{Connector, FrameSink, FrameStream, WebSocketConnector};
use crate::domain::models::BackendConfig;
use crate::domain::ports::{call_as, BackendClient, BackendError};
use crate::infrastructure::logging::scrub;

type Reply = Result<Value, BackendError>;
type SharedSink = Arc<Mutex<FrameSink>>;

/// Reply slot for one in-flight call.
struct Pending {
    generation: u64,
    tx: oneshot::Sender<Reply>,
}

/// State shared with the read loops.
struct Shared {
    pending: StdMutex<HashMap<String, Pending>>,
    seq: AtomicU64,
    /// Generation of the most recently established connection.
    current: AtomicU64,
    phase: watch::Sender<Phase>,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> String {
        (self.seq.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn register(&self, id: &str, generation: u64) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id.to_string(), Pending { generation, tx });
        rx
    }

    fn forget(&self, id: &str) {
        self.pending().remove(id);
    }

    fn deliver(&self, id: &str, reply: Reply) {
        match self.pending().remove(id) {
            // The caller may have timed out between removal and send.
            Some(slot) => {
                let _ = slot.tx.send(reply);
            }
            None => debug!(request_id = id, "dropping reply with no pending caller"),
        }
    }

    /// Fail every call still waiting on the given connection.
    fn fail_generation(&self, generation: u64) -> usize {
        let failed: Vec<Pending> = {
            let mut pending = self.pending();
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, slot)| slot.generation == generation)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| pending.remove(id)).collect()
        };
        let count = failed.len();
        for slot in failed {
            let _ = slot.tx.send(Err(BackendError::ConnectionClosed));
        }
        count
    }

    fn advance(&self, event: PhaseEvent) -> Result<Phase, BackendError> {
        let mut outcome = Ok(Phase::Disconnected);
        self.phase.send_modify(|phase| {
            outcome = phase.apply(event);
            if let Ok(next) = outcome {
                *phase = next;
            }
        });
        outcome
    }

    /// Start a new connection generation from a clean `Disconnected` phase.
    fn begin(&self, generation: u64) -> Result<Phase, BackendError> {
        self.current.store(generation, Ordering::Release);
        self.phase.send_replace(Phase::Disconnected);
        self.advance(PhaseEvent::Dial)
    }

    /// Drop to `Disconnected` unless a newer connection already replaced this one.
    fn lose(&self, generation: u64) {
        if self.current.load(Ordering::Acquire) == generation {
            let _ = self.advance(PhaseEvent::Fail);
        }
    }
}

/// One established connection.
struct Link {
    generation: u64,
    writer: SharedSink,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Link {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn handle(&self) -> LinkHandle {
        LinkHandle {
            generation: self.generation,
            writer: self.writer.clone(),
            alive: self.alive.clone(),
        }
    }

    fn shutdown(self) {
        self.alive.store(false, Ordering::Release);
        self.reader.abort();
    }
}

/// What a caller needs to send on a link without holding the connection lock.
#[derive(Clone)]
struct LinkHandle {
    generation: u64,
    writer: SharedSink,
    alive: Arc<AtomicBool>,
}

impl LinkHandle {
    async fn send(&self, frame: String) -> Result<(), BackendError> {
        let mut writer = self.writer.lock().await;
        writer.send(frame).await
    }
}

#[derive(Default)]
struct ConnState {
    link: Option<Link>,
    generation: u64,
}

/// Backend client multiplexing concurrent calls over one connection.
pub struct RpcClient {
    connector: Arc<dyn Connector>,
    api_key: Option<String>,
    call_timeout: Duration,
    connect_timeout: Duration,
    conn: Mutex<ConnState>,
    shared: Arc<Shared>,
}

impl RpcClient {
    pub fn new(
        connector: Arc<dyn Connector>,
        api_key: Option<String>,
        call_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Disconnected);
        Self {
            connector,
            api_key,
            call_timeout,
            connect_timeout,
            conn: Mutex::new(ConnState::default()),
            shared: Arc::new(Shared {
                pending: StdMutex::new(HashMap::new()),
                seq: AtomicU64::new(0),
                current: AtomicU64::new(0),
                phase,
            }),
        }
    }

    /// Client for the configured TLS WebSocket endpoint.
    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        let connector = WebSocketConnector::new(config)?;
        if config.api_key.is_none() {
            warn!("no backend api_key configured; calls will run unauthenticated");
        }
        Ok(Self::new(
            Arc::new(connector),
            config.api_key.clone(),
            config.call_timeout(),
            config.connect_timeout(),
        ))
    }

    /// Current connection phase.
    pub fn phase(&self) -> Phase {
        *self.shared.phase.borrow()
    }

    /// Watch connection phase changes.
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> {
        self.shared.phase.subscribe()
    }

    /// Number of calls currently waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending().len()
    }

    /// Typed call; a reply of the wrong shape surfaces as `BackendError::Decode`.
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, BackendError> {
        call_as(self, method, params).await
    }

    /// Tear down the live connection, failing its pending calls.
    pub async fn close(&self) {
        let mut conn = self.conn.lock().await;
        if let Some(link) = conn.link.take() {
            let generation = link.generation;
            link.shutdown();
            self.shared.fail_generation(generation);
            self.shared.lose(generation);
            info!(generation, "backend connection closed");
        }
    }

    async fn attempt(&self, method: &str, params: &[Value]) -> Reply {
        let link = self.ensure_ready().await?;
        self.exchange(&link, method, params).await
    }

    /// Send one call on `link` and wait for its reply, outside the connection lock.
    async fn exchange(&self, link: &LinkHandle, method: &str, params: &[Value]) -> Reply {
        let id = self.shared.next_id();
        let frame = encode(&MethodFrame::new(&id, method, params))?;
        let rx = self.shared.register(&id, link.generation);

        debug!(request_id = %id, method, frame = %scrub(&frame), "sending backend call");
        if let Err(err) = link.send(frame).await {
            self.shared.forget(&id);
            warn!(request_id = %id, method, error = %err, "send failed; dropping connection");
            link.alive.store(false, Ordering::Release);
            self.shared.fail_generation(link.generation);
            self.shared.lose(link.generation);
            return Err(err);
        }

        match timeout(self.call_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(BackendError::ConnectionClosed),
            Err(_) => {
                self.shared.forget(&id);
                warn!(request_id = %id, method, "backend call timed out; dropping connection");
                // An unanswered call means the socket cannot be trusted.
                link.alive.store(false, Ordering::Release);
                self.shared.fail_generation(link.generation);
                self.shared.lose(link.generation);
                Err(BackendError::Timeout(self.call_timeout.as_secs()))
            }
        }
    }

    /// Return a ready link, connecting and authenticating if needed.
    async fn ensure_ready(&self) -> Result<LinkHandle, BackendError> {
        let mut conn = self.conn.lock().await;
        if let Some(link) = conn.link.as_ref().filter(|link| link.is_alive()) {
            return Ok(link.handle());
        }
        if let Some(stale) = conn.link.take() {
            let generation = stale.generation;
            stale.shutdown();
            self.shared.fail_generation(generation);
            self.shared.lose(generation);
        }

        conn.generation += 1;
        let generation = conn.generation;
        match self.establish(generation).await {
            Ok(link) => {
                let handle = link.handle();
                conn.link = Some(link);
                Ok(handle)
            }
            Err(err) => {
                let _ = self.shared.advance(PhaseEvent::Fail);
                Err(err)
            }
        }
    }

    async fn establish(&self, generation: u64) -> Result<Link, BackendError> {
        self.shared.begin(generation)?;

        let (writer, stream) = timeout(self.connect_timeout, self.open())
            .await
            .map_err(|_| BackendError::Connect(format!(
                "handshake did not finish within {}s",
                self.connect_timeout.as_secs()
            )))??;

        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(read_loop(
            stream,
            self.shared.clone(),
            writer.clone(),
            generation,
            alive.clone(),
        ));
        let link = Link {
            generation,
            writer,
            alive,
            reader,
        };

        self.shared.advance(PhaseEvent::Handshake {
            credential: self.api_key.is_some(),
        })?;
        if let Some(api_key) = self.api_key.as_deref() {
            if let Err(err) = self.authenticate(&link.handle(), api_key).await {
                link.shutdown();
                self.shared.fail_generation(generation);
                return Err(err);
            }
            self.shared.advance(PhaseEvent::Authenticated)?;
        }

        info!(generation, phase = %self.phase(), "backend connection ready");
        Ok(link)
    }

    /// Open the transport and complete the protocol handshake.
    async fn open(&self) -> Result<(SharedSink, FrameStream), BackendError> {
        let mut channel = self.connector.connect().await?;
        channel.sink.send(encode(&ConnectFrame::default())?).await?;

        loop {
            let text = match channel.stream.next().await {
                Some(frame) => frame?,
                None => return Err(BackendError::Connect("closed during handshake".to_string())),
            };
            match InboundFrame::parse(&text)? {
                Inbound::Connected => break,
                Inbound::Refused(reason) => {
                    return Err(BackendError::Connect(format!("handshake refused: {reason}")))
                }
                other => debug!(frame = ?other, "ignoring frame before handshake"),
            }
        }

        Ok((Arc::new(Mutex::new(channel.sink)), channel.stream))
    }

    async fn authenticate(&self, link: &LinkHandle, api_key: &str) -> Result<(), BackendError> {
        match self
            .exchange(link, LOGIN_METHOD, &[Value::String(api_key.to_string())])
            .await
        {
            Ok(Value::Bool(true)) => {
                debug!("backend session authenticated");
                Ok(())
            }
            Ok(other) => Err(BackendError::Auth(format!("login returned {other}"))),
            Err(BackendError::Backend { code, message, .. }) => {
                Err(BackendError::Auth(format!("{message} (code {code})")))
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl BackendClient for RpcClient {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, BackendError> {
        match self.attempt(method, &params).await {
            Err(err) if err.is_connection_level() => {
                warn!(method, error = %err, "connection-level failure; reconnecting and retrying once");
                self.attempt(method, &params).await
            }
            outcome => outcome,
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        if let Some(link) = self.conn.get_mut().link.take() {
            link.shutdown();
        }
    }
}

async fn read_loop(
    mut stream: FrameStream,
    shared: Arc<Shared>,
    writer: SharedSink,
    generation: u64,
    alive: Arc<AtomicBool>,
) {
    let cause = loop {
        let text = match stream.next().await {
            Some(Ok(text)) => text,
            Some(Err(err)) => break err.to_string(),
            None => break "stream ended".to_string(),
        };

        match InboundFrame::parse(&text) {
            Ok(Inbound::Reply { id, outcome }) => shared.deliver(&id, outcome),
            Ok(Inbound::Ping { id }) => {
                let pong = match encode(&PongFrame::answering(id)) {
                    Ok(pong) => pong,
                    Err(err) => break err.to_string(),
                };
                if let Err(err) = writer.lock().await.send(pong).await {
                    break err.to_string();
                }
            }
            Ok(other) => debug!(generation, frame = ?other, "ignoring backend frame"),
            Err(err) => warn!(generation, error = %err, frame = %scrub(&text), "discarding malformed frame"),
        }
    };

    alive.store(false, Ordering::Release);
    let failed = shared.fail_generation(generation);
    shared.lose(generation);
    warn!(generation, cause = %cause, failed_calls = failed, "backend connection lost");
}
