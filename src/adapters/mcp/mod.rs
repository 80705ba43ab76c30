//! Tool-invocation protocol surfaces: stdio server, event-stream hub and the
//! stdio-to-hub bridge, all speaking JSON-RPC 2.0.

pub mod auth;
pub mod bridge;
pub mod handler;
pub mod protocol;
pub mod sse;
pub mod sse_hub;
pub mod stdio_server;

pub use bridge::{Bridge, BridgeError, MessagePoster};
pub use handler::McpHandler;
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use sse::{SseDecoder, SseEvent};
pub use sse_hub::{EventStreamHub, SubscriberRegistry, Subscription};
pub use stdio_server::StdioServer;
