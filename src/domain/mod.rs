//! Domain layer for nas-mcp
//!
//! Core models (tasks, backend jobs, configuration), the error types shared
//! across layers, and the port traits infrastructure adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{TaskError, TaskResult};
