use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::domain::ports::{call_as, BackendClient};
use crate::services::task_manager::TaskManager;
use crate::services::tool_registry::{parse_arguments, ToolDefinition, ToolError, ToolHandler};

/// Days since the last scrub below which the backend skips a new one.
const DEFAULT_THRESHOLD_DAYS: u32 = 35;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScrubAction {
    #[default]
    Start,
    Stop,
    Pause,
}

#[derive(Debug, Deserialize)]
struct ScrubArgs {
    pool: String,
    #[serde(default)]
    action: ScrubAction,
    #[serde(default)]
    threshold: Option<u32>,
    #[serde(default)]
    ttl_seconds: Option<u64>,
}

/// `pool_scrub`: start, stop or pause a pool scrub.
///
/// Starting a scrub is a backend job; the tool returns a task to poll with
/// `tasks_get` instead of waiting for the scrub to finish.
pub struct PoolScrub {
    backend: Arc<dyn BackendClient>,
    manager: Arc<TaskManager>,
}

impl PoolScrub {
    pub fn new(backend: Arc<dyn BackendClient>, manager: Arc<TaskManager>) -> Self {
        Self { backend, manager }
    }
}

fn validate_pool_name(pool: &str) -> Result<(), ToolError> {
    if pool.is_empty() {
        return Err(ToolError::InvalidArguments("pool must not be empty".to_string()));
    }
    if pool.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(ToolError::InvalidArguments(format!(
            "pool name {pool:?} must not contain whitespace or '/'"
        )));
    }
    Ok(())
}

#[async_trait]
impl ToolHandler for PoolScrub {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "pool_scrub".to_string(),
            description: "Start, stop or pause a scrub of a storage pool. Starting returns a task id; poll it with tasks_get until the scrub completes.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "pool": { "type": "string", "description": "Pool name (e.g., 'tank')" },
                    "action": { "type": "string", "enum": ["START", "STOP", "PAUSE"], "description": "Default: START" },
                    "threshold": { "type": "integer", "minimum": 0, "description": "Skip the scrub if the last one finished fewer than this many days ago (default: 35)" },
                    "ttl_seconds": { "type": "integer", "minimum": 1, "description": "How long the task stays retrievable (default: 48 hours)" }
                },
                "required": ["pool"]
            }),
        }
    }

    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: ScrubArgs = parse_arguments(arguments.clone())?;
        validate_pool_name(&args.pool)?;
        if args.ttl_seconds == Some(0) {
            return Err(ToolError::InvalidArguments(
                "ttl_seconds must be at least 1".to_string(),
            ));
        }

        if args.action != ScrubAction::Start {
            let action = match args.action {
                ScrubAction::Stop => "STOP",
                _ => "PAUSE",
            };
            self.backend
                .call("pool.scrub.scrub", vec![json!(args.pool), json!(action)])
                .await?;
            return Ok(json!({
                "pool": args.pool,
                "action": action,
                "message": format!("Scrub {} requested for pool {}", action.to_lowercase(), args.pool),
            }));
        }

        let threshold = args.threshold.unwrap_or(DEFAULT_THRESHOLD_DAYS);
        let job_id: i64 = call_as(
            self.backend.as_ref(),
            "pool.scrub.run",
            vec![json!(args.pool), json!(threshold)],
        )
        .await?;

        let task = self
            .manager
            .create_job_task("pool_scrub", arguments, job_id, args.ttl_seconds);
        Ok(json!({
            "task": task,
            "message": format!(
                "Scrub of pool {} started as job {job_id}; poll task {} with tasks_get",
                args.pool, task.task_id
            ),
        }))
    }
}
