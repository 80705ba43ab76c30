//! Domain errors for the task subsystem.

use thiserror::Error;

use super::models::TaskStatus;

/// Errors raised by the task store and task manager.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task {id} is already {status}")]
    AlreadyTerminal { id: String, status: TaskStatus },

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),
}

pub type TaskResult<T> = Result<T, TaskError>;
