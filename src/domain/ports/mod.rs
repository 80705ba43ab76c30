//! Port trait definitions (Hexagonal Architecture)
//!
//! - BackendClient: calls against the storage appliance backend
//!
//! The task manager and tool handlers depend on this trait rather than the
//! WebSocket client so they can be exercised against in-memory fakes.

pub mod backend_client;

pub use backend_client::{call_as, BackendClient, BackendError};
