//! Task domain model.
//!
//! Tasks are short-lived, pollable handles for long-running backend work.
//! A tool that starts a backend job returns a task immediately; the caller
//! checks back later through `tasks_get` instead of holding the protocol
//! round-trip open.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Upper bound applied to TTLs so expiry arithmetic cannot overflow.
const MAX_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

/// Status of a task as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Backend work is still in progress
    Working,
    /// Backend is waiting on input from the caller
    InputRequired,
    /// Work finished successfully; `result` is populated
    Completed,
    /// Work failed; `error` is populated
    Failed,
    /// Work was cancelled by the caller or aborted by the backend
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Working
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::InputRequired => "input_required",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the task manager polls to refresh a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOperation {
    /// A backend job, queried by its numeric handle.
    Job { job_id: i64 },
    /// A backend status method invoked with fixed params on every poll.
    StatusMethod { method: String, params: Vec<Value> },
}

impl TaskOperation {
    pub fn job_id(&self) -> Option<i64> {
        match self {
            Self::Job { job_id } => Some(*job_id),
            Self::StatusMethod { .. } => None,
        }
    }
}

/// A caller-visible record of a long-running backend operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub task_id: String,
    pub status: TaskStatus,
    pub status_message: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    /// Time-to-live in seconds, measured from `created_at`
    pub ttl: u64,
    /// Suggested client poll interval in seconds
    pub poll_interval: u64,
    pub operation: TaskOperation,
    pub tool_name: String,
    pub arguments: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Number of poll attempts made so far
    #[serde(default)]
    pub poll_attempts: u32,
}

impl Task {
    /// Create a new working task with a fresh identifier.
    pub fn new(
        tool_name: impl Into<String>,
        arguments: Value,
        operation: TaskOperation,
        ttl: u64,
        poll_interval: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id: Uuid::new_v4().to_string(),
            status: TaskStatus::Working,
            status_message: "Task created".to_string(),
            created_at: now,
            last_updated_at: now,
            ttl,
            poll_interval,
            operation,
            tool_name: tool_name.into(),
            arguments,
            result: None,
            error: None,
            poll_attempts: 0,
        }
    }

    /// Instant after which the task is no longer retrievable.
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.ttl)
            .unwrap_or(MAX_TTL_SECS)
            .min(MAX_TTL_SECS);
        self.created_at + Duration::seconds(ttl)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to a new status, stamping `last_updated_at`.
    pub fn transition(&mut self, status: TaskStatus, message: impl Into<String>) {
        self.status = status;
        self.status_message = message.into();
        self.last_updated_at = Utc::now();
    }

    pub fn complete(&mut self, result: Value) {
        self.result = Some(result);
        self.transition(TaskStatus::Completed, "Task completed");
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.transition(TaskStatus::Failed, format!("Task failed: {error}"));
        self.error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskStatus::Working.is_terminal());
        assert!(!TaskStatus::InputRequired.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_display_matches_wire_name() {
        for status in [
            TaskStatus::Working,
            TaskStatus::InputRequired,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(serde_json::to_value(status).unwrap(), json!(status.to_string()));
        }
    }

    #[test]
    fn test_new_task_is_working() {
        let task = Task::new("pool_scrub", json!({"pool": "tank"}), TaskOperation::Job { job_id: 7 }, 60, 5);
        assert_eq!(task.status, TaskStatus::Working);
        assert_eq!(task.operation.job_id(), Some(7));
        assert_eq!(task.expires_at(), task.created_at + Duration::seconds(60));
        assert!(task.result.is_none());
    }

    #[test]
    fn test_fail_records_error() {
        let mut task = Task::new("x", json!({}), TaskOperation::Job { job_id: 1 }, 60, 5);
        task.fail("disk offline");
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("disk offline"));
        assert!(task.status_message.contains("disk offline"));
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let task = Task::new("x", json!({}), TaskOperation::Job { job_id: 3 }, 10, 5);
        let value = serde_json::to_value(&task).unwrap();
        assert!(value.get("taskId").is_some());
        assert!(value.get("statusMessage").is_some());
        assert_eq!(value["status"], "working");
        assert_eq!(value["operation"]["kind"], "job");
        assert!(value.get("result").is_none());
    }
}
