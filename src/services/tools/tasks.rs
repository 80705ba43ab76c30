use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::services::task_manager::TaskManager;
use crate::services::tool_registry::{parse_arguments, ToolDefinition, ToolError, ToolHandler};

#[derive(Debug, Deserialize)]
struct TaskIdArgs {
    task_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListArgs {
    #[serde(default)]
    cursor: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

fn task_id_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "task_id": { "type": "string", "description": description }
        },
        "required": ["task_id"]
    })
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::Execution(e.to_string()))
}

/// `tasks_get`: current state of one task.
pub struct TasksGet {
    manager: Arc<TaskManager>,
}

impl TasksGet {
    pub fn new(manager: Arc<TaskManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ToolHandler for TasksGet {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "tasks_get".to_string(),
            description: "Get the status of a long-running operation by task id. Poll this after a tool returns a task; once the status is completed the result field holds the outcome, and failed tasks carry an error.".to_string(),
            input_schema: task_id_schema("Task id returned by the tool that started the operation"),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: TaskIdArgs = parse_arguments(arguments)?;
        let task = self.manager.get(&args.task_id)?;
        to_value(&task)
    }
}

/// `tasks_list`: newest-first page of tasks.
pub struct TasksList {
    manager: Arc<TaskManager>,
}

impl TasksList {
    pub fn new(manager: Arc<TaskManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ToolHandler for TasksList {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "tasks_list".to_string(),
            description: "List tracked operations, newest first. Pass the returned nextCursor to fetch the following page.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "cursor": { "type": "string", "description": "nextCursor from a previous page" },
                    "limit": { "type": "integer", "minimum": 1, "description": "Maximum tasks to return (default: 50)" }
                }
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: ListArgs = parse_arguments(arguments)?;
        let page = self
            .manager
            .list(args.cursor.as_deref(), args.limit.unwrap_or_default())?;
        to_value(&page)
    }
}

/// `tasks_cancel`: stop tracking a task and abort its backend job.
pub struct TasksCancel {
    manager: Arc<TaskManager>,
}

impl TasksCancel {
    pub fn new(manager: Arc<TaskManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl ToolHandler for TasksCancel {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "tasks_cancel".to_string(),
            description: "Cancel a running operation. Job-backed operations are also aborted on the appliance.".to_string(),
            input_schema: task_id_schema("Task id to cancel"),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: TaskIdArgs = parse_arguments(arguments)?;
        let task = self.manager.cancel(&args.task_id).await?;
        to_value(&task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{BackendClient, BackendError};
    use crate::services::task_manager::TaskManagerConfig;
    use crate::services::task_store::TaskStore;

    struct Idle;

    #[async_trait]
    impl BackendClient for Idle {
        async fn call(&self, _method: &str, _params: Vec<Value>) -> Result<Value, BackendError> {
            Ok(Value::Bool(true))
        }
    }

    fn manager() -> Arc<TaskManager> {
        Arc::new(TaskManager::new(
            Arc::new(TaskStore::new()),
            Arc::new(Idle),
            TaskManagerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_get_and_cancel() {
        let manager = manager();
        let task = manager.create_job_task("pool_scrub", json!({}), 1, None);

        let got = TasksGet::new(manager.clone())
            .call(json!({"task_id": task.task_id}))
            .await
            .unwrap();
        assert_eq!(got["status"], "working");

        let cancelled = TasksCancel::new(manager.clone())
            .call(json!({"task_id": task.task_id}))
            .await
            .unwrap();
        assert_eq!(cancelled["status"], "cancelled");
    }

    #[tokio::test]
    async fn test_get_unknown_task_is_execution_error() {
        let err = TasksGet::new(manager())
            .call(json!({"task_id": "nope"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(ref m) if m.contains("nope")));
    }

    #[tokio::test]
    async fn test_list_requires_no_arguments() {
        let manager = manager();
        manager.create_job_task("pool_scrub", json!({}), 1, None);
        manager.create_job_task("pool_scrub", json!({}), 2, None);

        let page = TasksList::new(manager).call(Value::Null).await.unwrap();
        assert_eq!(page["tasks"].as_array().unwrap().len(), 2);
        assert!(page.get("nextCursor").is_none());
    }

    #[tokio::test]
    async fn test_missing_task_id_is_invalid_arguments() {
        let err = TasksGet::new(manager()).call(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
