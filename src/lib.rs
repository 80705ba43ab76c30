//! nas-mcp - tool server and stdio/SSE bridge for a storage appliance
//!
//! Exposes storage-appliance operations as tools over the JSON-RPC based
//! tool-invocation protocol, backed by a multiplexing WebSocket client for the
//! appliance's own RPC API.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): task and job models, configuration, ports
//! - **Service Layer** (`services`): task store, task manager, tool registry
//! - **Infrastructure Layer** (`infrastructure`): config loading, logging,
//!   retry policy and the backend RPC client
//! - **Adapters** (`adapters`): stdio server, event-stream hub and bridge
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use adapters::mcp::{Bridge, EventStreamHub, McpHandler, StdioServer};
pub use domain::models::{Config, JobRecord, JobState, Task, TaskOperation, TaskStatus};
pub use domain::ports::{BackendClient, BackendError};
pub use domain::{TaskError, TaskResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use infrastructure::rpc::{Phase, RpcClient};
pub use services::{TaskManager, TaskStore, ToolRegistry};
