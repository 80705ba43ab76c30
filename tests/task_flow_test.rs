//! End-to-end task flow: a tool starts a backend job, the task manager polls
//! it to completion and callers read the outcome through the task tools.

mod common;

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nas_mcp::adapters::mcp::McpHandler;
use nas_mcp::domain::models::TaskStatus;
use nas_mcp::domain::ports::BackendClient;
use nas_mcp::infrastructure::rpc::RpcClient;
use nas_mcp::services::{TaskManager, TaskManagerConfig, TaskStore, ToolRegistry};

const FORTY_EIGHT_HOURS: u64 = 48 * 60 * 60;

struct Harness {
    manager: Arc<TaskManager>,
    handler: McpHandler,
    job_queries: Arc<AtomicUsize>,
}

fn harness() -> Harness {
    let (connector, sessions) = common::MemoryConnector::new();
    let job_queries = Arc::new(AtomicUsize::new(0));
    let queries = Arc::clone(&job_queries);
    common::spawn_backend(sessions, move |call| match call.method.as_str() {
        "pool.scrub.run" => json!(42),
        "core.get_jobs" => {
            assert_eq!(call.params, json!([[["id", "=", 42]]]));
            match queries.fetch_add(1, Ordering::SeqCst) {
                0 => json!([{
                    "id": 42,
                    "method": "pool.scrub.run",
                    "state": "RUNNING",
                    "progress": {"percent": 40, "description": "Scrubbing tank"}
                }]),
                _ => json!([{
                    "id": 42,
                    "state": "SUCCESS",
                    "result": {"errors": 0}
                }]),
            }
        }
        "core.job_abort" => Value::Null,
        other => panic!("unexpected backend call {other}"),
    });

    let backend: Arc<dyn BackendClient> = Arc::new(RpcClient::new(
        connector,
        None,
        Duration::from_secs(30),
        Duration::from_secs(5),
    ));
    let manager = Arc::new(TaskManager::new(
        Arc::new(TaskStore::new()),
        Arc::clone(&backend),
        TaskManagerConfig::default(),
    ));
    let registry = ToolRegistry::with_builtin_tools(Arc::clone(&manager), backend);

    Harness {
        manager,
        handler: McpHandler::new(Arc::new(registry)),
        job_queries,
    }
}

async fn call_tool(handler: &McpHandler, name: &str, arguments: Value) -> Value {
    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": {"name": name, "arguments": arguments}
    });
    let response = handler.handle_value(request).await.expect("requests get a reply");
    let result = response.result.expect("tool call succeeded");
    let text = result["content"][0]["text"].as_str().expect("text content");
    serde_json::from_str(text).expect("tool output is JSON")
}

#[tokio::test]
async fn test_scrub_job_runs_to_completion_then_is_skipped() {
    let h = harness();

    let started = call_tool(&h.handler, "pool_scrub", json!({"pool": "tank"})).await;
    let task_id = started["task"]["taskId"].as_str().unwrap().to_string();
    assert_eq!(started["task"]["status"], "working");
    assert_eq!(started["task"]["ttl"], FORTY_EIGHT_HOURS);

    let first = h.manager.poll_once().await;
    assert_eq!(first.polled, 1);
    assert_eq!(first.settled, 0);
    let running = h.manager.get(&task_id).unwrap();
    assert_eq!(running.status, TaskStatus::Working);
    assert_eq!(running.status_message, "Job 42 running (40%): Scrubbing tank");

    let second = h.manager.poll_once().await;
    assert_eq!(second.settled, 1);
    let done = call_tool(&h.handler, "tasks_get", json!({"task_id": task_id})).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["result"], json!({"errors": 0}));

    // Terminal tasks are no longer polled.
    let third = h.manager.poll_once().await;
    assert_eq!(third.polled, 0);
    assert_eq!(h.job_queries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_cancel_stops_polling_and_lists_newest_first() {
    let h = harness();

    let older = call_tool(&h.handler, "pool_scrub", json!({"pool": "tank"})).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newer = call_tool(&h.handler, "pool_scrub", json!({"pool": "backup"})).await;
    let older_id = older["task"]["taskId"].as_str().unwrap();
    let newer_id = newer["task"]["taskId"].as_str().unwrap();

    let cancelled = call_tool(&h.handler, "tasks_cancel", json!({"task_id": older_id})).await;
    assert_eq!(cancelled["status"], "cancelled");

    let page = call_tool(&h.handler, "tasks_list", json!({"limit": 1})).await;
    assert_eq!(page["tasks"][0]["taskId"], newer_id);
    let next = page["nextCursor"].as_str().unwrap();
    let rest = call_tool(&h.handler, "tasks_list", json!({"cursor": next})).await;
    assert_eq!(rest["tasks"][0]["taskId"], older_id);
    assert!(rest.get("nextCursor").is_none());

    let report = h.manager.poll_once().await;
    assert_eq!(report.polled, 1, "only the uncancelled task is polled");
}
