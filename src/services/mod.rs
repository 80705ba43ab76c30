//! Service layer
//!
//! - `task_store`: in-memory task table with expiry
//! - `task_manager`: background job polling and task lifecycle
//! - `tool_registry`: tool definitions and dispatch
//! - `tools`: built-in tools

pub mod task_manager;
pub mod task_store;
pub mod tool_registry;
pub mod tools;

pub use task_manager::{PollReport, TaskManager, TaskManagerConfig};
pub use task_store::{TaskPage, TaskStore};
pub use tool_registry::{ToolDefinition, ToolError, ToolHandler, ToolRegistry};
