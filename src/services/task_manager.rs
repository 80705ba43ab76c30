//! Background polling of long-running backend work.
//!
//! Tools that start a backend job hand the job handle to the manager and
//! return a task immediately. A single loop refreshes every active task on
//! a fixed period and sweeps expired tasks on a separate period.

use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::errors::{TaskError, TaskResult};
use crate::domain::models::{JobRecord, JobState, Task, TaskConfig, TaskOperation, TaskStatus};
use crate::domain::ports::{call_as, BackendClient, BackendError};
use crate::services::task_store::{TaskPage, TaskStore};

/// Backend method listing jobs by filter.
pub const JOB_QUERY_METHOD: &str = "core.get_jobs";
/// Backend method aborting a running job.
pub const JOB_ABORT_METHOD: &str = "core.job_abort";

/// Configuration for the task manager.
#[derive(Debug, Clone)]
pub struct TaskManagerConfig {
    /// Period of the poll cycle.
    pub poll_interval: Duration,
    /// Period of the expired-task sweep.
    pub cleanup_interval: Duration,
    /// TTL in seconds for tasks created without one.
    pub default_ttl: u64,
    /// Poll attempts before a task is failed; 0 means unlimited.
    pub max_poll_attempts: u32,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self::from(&TaskConfig::default())
    }
}

impl From<&TaskConfig> for TaskManagerConfig {
    fn from(config: &TaskConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs),
            default_ttl: config.default_ttl_secs,
            max_poll_attempts: config.max_poll_attempts,
        }
    }
}

/// Outcome counts of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PollReport {
    pub polled: usize,
    /// Tasks that reached a terminal state this cycle.
    pub settled: usize,
    /// Polls that hit a transient backend error and will be retried.
    pub transient_errors: usize,
}

pub struct TaskManager {
    store: Arc<TaskStore>,
    backend: Arc<dyn BackendClient>,
    config: TaskManagerConfig,
    stop: watch::Sender<bool>,
}

impl TaskManager {
    pub fn new(
        store: Arc<TaskStore>,
        backend: Arc<dyn BackendClient>,
        config: TaskManagerConfig,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            store,
            backend,
            config,
            stop,
        }
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    fn poll_interval_secs(&self) -> u64 {
        self.config.poll_interval.as_secs().max(1)
    }

    /// Register a task backed by a backend job handle. No polling happens here.
    pub fn create_job_task(
        &self,
        tool_name: &str,
        arguments: Value,
        job_id: i64,
        ttl: Option<u64>,
    ) -> Task {
        let task = Task::new(
            tool_name,
            arguments,
            TaskOperation::Job { job_id },
            ttl.unwrap_or(self.config.default_ttl),
            self.poll_interval_secs(),
        );
        info!(task_id = %task.task_id, job_id, tool = tool_name, "created job task");
        self.store.add(task)
    }

    /// Register a task polled by invoking a backend status method.
    pub fn create_status_task(
        &self,
        tool_name: &str,
        arguments: Value,
        method: &str,
        params: Vec<Value>,
        ttl: Option<u64>,
    ) -> Task {
        let task = Task::new(
            tool_name,
            arguments,
            TaskOperation::StatusMethod {
                method: method.to_string(),
                params,
            },
            ttl.unwrap_or(self.config.default_ttl),
            self.poll_interval_secs(),
        );
        info!(task_id = %task.task_id, method, tool = tool_name, "created status task");
        self.store.add(task)
    }

    pub fn get(&self, task_id: &str) -> TaskResult<Task> {
        self.store.get(task_id)
    }

    pub fn list(&self, cursor: Option<&str>, limit: usize) -> TaskResult<TaskPage> {
        self.store.list(cursor, limit)
    }

    /// Cancel a non-terminal task. For job tasks the backend is asked to
    /// abort the job; an abort failure is logged, not surfaced.
    pub async fn cancel(&self, task_id: &str) -> TaskResult<Task> {
        let mut task = self.store.get(task_id)?;
        if task.is_terminal() {
            return Err(TaskError::AlreadyTerminal {
                id: task.task_id,
                status: task.status,
            });
        }

        task.transition(TaskStatus::Cancelled, "Cancelled by caller");
        let task = self.store.update(task)?;
        info!(task_id, "task cancelled");

        if let Some(job_id) = task.operation.job_id() {
            if let Err(err) = self.backend.call(JOB_ABORT_METHOD, vec![json!(job_id)]).await {
                warn!(task_id, job_id, error = %err, "backend refused to abort job");
            }
        }
        Ok(task)
    }

    /// Refresh every active task once. Tasks are polled concurrently.
    pub async fn poll_once(&self) -> PollReport {
        let active = self.store.get_active();
        let mut report = PollReport {
            polled: active.len(),
            ..PollReport::default()
        };
        if active.is_empty() {
            return report;
        }

        let outcomes = join_all(active.into_iter().map(|task| self.poll_task(task))).await;
        for outcome in outcomes {
            match outcome {
                PollOutcome::Settled => report.settled += 1,
                PollOutcome::Transient => report.transient_errors += 1,
                PollOutcome::Pending => {}
            }
        }
        debug!(?report, "poll cycle finished");
        report
    }

    async fn poll_task(&self, mut task: Task) -> PollOutcome {
        task.poll_attempts = task.poll_attempts.saturating_add(1);

        let mut outcome = match self.refresh(&mut task).await {
            Ok(()) => PollOutcome::Pending,
            Err(err) if err.is_connection_level() => {
                let message = format!("Status check failed, will retry: {err}");
                task.transition(task.status, message);
                warn!(task_id = %task.task_id, error = %err, "transient poll failure");
                PollOutcome::Transient
            }
            Err(err) => {
                task.fail(err.to_string());
                PollOutcome::Pending
            }
        };

        let limit = self.config.max_poll_attempts;
        if !task.is_terminal() && limit > 0 && task.poll_attempts >= limit {
            task.fail(format!("Timed out after {limit} poll attempts"));
        }
        if task.is_terminal() {
            outcome = PollOutcome::Settled;
        }

        let task_id = task.task_id.clone();
        let status = task.status;
        match self.store.update(task) {
            Ok(_) if status.is_terminal() => info!(task_id = %task_id, %status, "task settled"),
            Ok(_) => {}
            // A concurrent cancel wins over this cycle's result.
            Err(TaskError::AlreadyTerminal { status, .. }) => {
                debug!(task_id = %task_id, %status, "task settled while polling");
                return PollOutcome::Pending;
            }
            Err(err) => {
                debug!(task_id = %task_id, error = %err, "dropping poll result");
                return PollOutcome::Pending;
            }
        }
        outcome
    }

    async fn refresh(&self, task: &mut Task) -> Result<(), BackendError> {
        match task.operation.clone() {
            TaskOperation::Job { job_id } => {
                let filter = json!([["id", "=", job_id]]);
                let jobs: Vec<JobRecord> =
                    call_as(self.backend.as_ref(), JOB_QUERY_METHOD, vec![filter]).await?;
                match jobs.into_iter().find(|job| job.id == job_id) {
                    Some(job) => apply_job(task, &job),
                    None => task.fail(format!("Job {job_id} not found on backend")),
                }
            }
            TaskOperation::StatusMethod { method, params } => {
                let reply = self.backend.call(&method, params).await?;
                apply_status(task, &method, reply);
            }
        }
        Ok(())
    }

    /// Run the poll and sweep loop until `stop` is called.
    pub async fn run(self: Arc<Self>) {
        let mut stop = self.stop.subscribe();
        let mut poll = interval(self.config.poll_interval);
        let mut cleanup = interval(self.config.cleanup_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Both intervals fire immediately; the first cycle waits a full period.
        poll.tick().await;
        cleanup.tick().await;

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            cleanup_interval_secs = self.config.cleanup_interval.as_secs(),
            "task manager started"
        );

        loop {
            if *stop.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = poll.tick() => {
                    self.poll_once().await;
                }
                _ = cleanup.tick() => {
                    let removed = self.store.clean_expired();
                    if removed > 0 {
                        info!(removed, "swept expired tasks");
                    }
                }
            }
        }

        info!("task manager stopped");
    }

    /// Spawn `run` on the runtime.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// Ask the loop to stop at its next suspension point.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Pending,
    Settled,
    Transient,
}

fn apply_job(task: &mut Task, job: &JobRecord) {
    match job.state.task_status() {
        TaskStatus::Completed => task.complete(job.result.clone().unwrap_or(Value::Null)),
        TaskStatus::Failed => task.fail(job.failure_detail()),
        TaskStatus::Cancelled => {
            task.transition(TaskStatus::Cancelled, format!("Job {} aborted on backend", job.id))
        }
        status => task.transition(status, job.progress_message()),
    }
}

/// Status replies that carry a job-shaped `state` are mapped like jobs;
/// any other non-null reply is the final result.
fn apply_status(task: &mut Task, method: &str, reply: Value) {
    if reply.is_null() {
        task.transition(TaskStatus::Working, format!("Waiting on {method}"));
        return;
    }

    let state = reply
        .get("state")
        .cloned()
        .and_then(|state| serde_json::from_value::<JobState>(state).ok());
    match state {
        Some(JobState::Success) => task.complete(reply.get("result").cloned().unwrap_or(reply)),
        Some(JobState::Failed) => {
            let detail = reply
                .get("error")
                .and_then(Value::as_str)
                .map_or_else(|| format!("{method} reported failure"), str::to_string);
            task.fail(detail);
        }
        Some(state) => {
            let status = state.task_status();
            task.transition(status, format!("{method} reports {status}"));
        }
        None => task.complete(reply),
    }
}
