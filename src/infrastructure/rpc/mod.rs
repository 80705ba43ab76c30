//! Backend JSON-RPC client
//!
//! - `protocol`: wire frames and inbound classification
//! - `phase`: connection lifecycle state machine
//! - `transport`: frame channels (TLS WebSocket in production)
//! - `client`: the multiplexing client itself

pub mod client;
pub mod phase;
pub mod protocol;
pub mod transport;

pub use client::RpcClient;
pub use phase::{Phase, PhaseEvent};
pub use transport::{Connector, FrameChannel, WebSocketConnector};
