//! Infrastructure layer module
//!
//! External integrations and ambient plumbing:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Backend JSON-RPC client over TLS WebSocket
//! - Exponential backoff retry policy
//!
//! Infrastructure implementations satisfy the port traits defined in the domain layer.

pub mod config;
pub mod logging;
pub mod retry;
pub mod rpc;
