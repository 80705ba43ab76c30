//! Event-stream hub: the HTTP side of the stdio/SSE bridge.
//!
//! Subscribers hold a `GET /sse` stream whose first event announces the POST
//! endpoint. Requests POSTed to `/messages` are dispatched through the tool
//! registry and every reply is broadcast to all connected subscribers;
//! correlation is left to the request id carried in the payload.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{get, post},
    Router,
};
use futures::future::join_all;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::auth::{require_bearer, BearerToken};
use super::handler::{McpHandler, SERVER_NAME};
use crate::domain::models::HubConfig;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Live subscribers, each with a bounded outbound queue.
pub struct SubscriberRegistry {
    subscribers: RwLock<HashMap<String, mpsc::Sender<String>>>,
    capacity: usize,
    done: watch::Sender<bool>,
}

impl SubscriberRegistry {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            done,
        })
    }

    /// Register a subscriber; it is removed again when the subscription drops.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = Uuid::new_v4().to_string();
        let (tx, receiver) = mpsc::channel(self.capacity);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), tx);
        info!(subscriber_id = %id, "Subscriber connected");

        Subscription {
            id: id.clone(),
            receiver,
            done: self.done.subscribe(),
            _guard: SubscriptionGuard {
                registry: Arc::clone(self),
                id,
            },
        }
    }

    fn remove(&self, id: &str) {
        let removed = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed.is_some() {
            info!(subscriber_id = %id, "Subscriber disconnected");
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `message` for every subscriber, waiting at most `timeout` on any
    /// one full queue. Returns how many subscribers accepted it.
    pub async fn broadcast(&self, message: &str, timeout: Duration) -> usize {
        let targets: Vec<(String, mpsc::Sender<String>)> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, tx)| (id.clone(), tx.clone()))
            .collect();

        let sends = targets.into_iter().map(|(id, tx)| {
            let message = message.to_string();
            async move {
                match tx.send_timeout(message, timeout).await {
                    Ok(()) => true,
                    Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                        warn!(subscriber_id = %id, ?timeout, "Subscriber queue full, dropping message");
                        false
                    }
                    Err(mpsc::error::SendTimeoutError::Closed(_)) => {
                        debug!(subscriber_id = %id, "Subscriber closed before delivery");
                        false
                    }
                }
            }
        });

        join_all(sends).await.into_iter().filter(|sent| *sent).count()
    }

    /// End every open subscriber stream.
    pub fn close_all(&self) {
        self.done.send_replace(true);
    }
}

/// Receiving half of one subscriber.
pub struct Subscription {
    pub id: String,
    receiver: mpsc::Receiver<String>,
    done: watch::Receiver<bool>,
    _guard: SubscriptionGuard,
}

impl Subscription {
    /// Next queued message, or `None` once the hub closes.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            let closed = *self.done.borrow_and_update();
            if closed {
                return None;
            }
            tokio::select! {
                message = self.receiver.recv() => return message,
                changed = self.done.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

struct SubscriptionGuard {
    registry: Arc<SubscriberRegistry>,
    id: String,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

pub struct HubState {
    handler: McpHandler,
    subscribers: Arc<SubscriberRegistry>,
    broadcast_timeout: Duration,
}

pub struct EventStreamHub {
    state: Arc<HubState>,
    config: HubConfig,
}

impl EventStreamHub {
    pub fn new(handler: McpHandler, config: HubConfig) -> Self {
        let state = HubState {
            handler,
            subscribers: SubscriberRegistry::new(config.queue_capacity),
            broadcast_timeout: Duration::from_secs(config.broadcast_timeout_secs),
        };
        Self {
            state: Arc::new(state),
            config,
        }
    }

    pub fn subscribers(&self) -> Arc<SubscriberRegistry> {
        Arc::clone(&self.state.subscribers)
    }

    /// Build the router; `/health` stays reachable without a token.
    pub fn router(&self) -> Router {
        let token = BearerToken::new(self.config.api_key.as_deref());

        let mut router = Router::new()
            .route("/sse", get(open_stream))
            .route("/messages", post(post_message))
            .route_layer(middleware::from_fn_with_state(token, require_bearer))
            .route("/health", get(health_check))
            .with_state(Arc::clone(&self.state))
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        router
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port).parse()?;
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener, shutdown).await
    }

    /// Serve on an already-bound listener until `shutdown` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let subscribers = self.subscribers();

        info!("Event-stream hub listening on {}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                // Open streams would otherwise hold the graceful shutdown forever.
                subscribers.close_all();
            })
            .await?;

        info!("Event-stream hub stopped");
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    subscriber_count: usize,
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

async fn open_stream(
    State(state): State<Arc<HubState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.subscribers.subscribe();
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?sessionId={}", subscription.id));

    let messages = stream::unfold(subscription, |mut subscription| async move {
        let message = subscription.recv().await?;
        Some((Ok(Event::default().event("message").data(message)), subscription))
    });

    let stream = stream::once(async move { Ok(endpoint) }).chain(messages);
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

async fn post_message(
    State(state): State<Arc<HubState>>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> StatusCode {
    let session_id = query.session_id.unwrap_or_default();
    tokio::spawn(async move {
        let text = String::from_utf8_lossy(&body);
        let Some(response) = state.handler.handle_message(&text).await else {
            return;
        };
        let delivered = state
            .subscribers
            .broadcast(&response.to_line(), state.broadcast_timeout)
            .await;
        debug!(session_id = %session_id, delivered, "Reply broadcast");
    });
    StatusCode::ACCEPTED
}

async fn health_check(State(state): State<Arc<HubState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVER_NAME,
        version: env!("CARGO_PKG_VERSION"),
        subscriber_count: state.subscribers.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_subscription_drop_unregisters() {
        let registry = SubscriberRegistry::new(4);
        let first = registry.subscribe();
        let _second = registry.subscribe();
        assert_eq!(registry.len(), 2);

        drop(first);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_subscriber() {
        let registry = SubscriberRegistry::new(4);
        let mut a = registry.subscribe();
        let mut b = registry.subscribe();

        assert_eq!(registry.broadcast("hello", Duration::from_secs(1)).await, 2);
        assert_eq!(a.recv().await.as_deref(), Some("hello"));
        assert_eq!(b.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_times_out_for_that_subscriber_only() {
        let registry = SubscriberRegistry::new(1);
        let _stalled = registry.subscribe();
        let mut live = registry.subscribe();

        assert_eq!(registry.broadcast("first", Duration::from_secs(30)).await, 2);
        assert_eq!(live.recv().await.as_deref(), Some("first"));

        let started = Instant::now();
        assert_eq!(registry.broadcast("second", Duration::from_secs(30)).await, 1);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
        assert_eq!(live.recv().await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        let registry = SubscriberRegistry::new(4);
        let mut subscription = registry.subscribe();
        registry.close_all();
        assert_eq!(subscription.recv().await, None);
    }
}
