//! In-memory task table with per-entry expiry.
//!
//! Entries are never deleted explicitly once terminal: they stay readable
//! until their TTL elapses so a caller has a window to fetch the outcome.
//! An expired entry reads as not-found even before the sweep removes it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::errors::{TaskError, TaskResult};
use crate::domain::models::Task;

/// Page size used when a caller asks for zero items.
pub const DEFAULT_PAGE_SIZE: usize = 50;

struct Entry {
    task: Task,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One page of a newest-first listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    /// Id of the last task returned when more remain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Default)]
pub struct TaskStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a new task, returning a copy of what was stored.
    pub fn add(&self, task: Task) -> Task {
        let expires_at = task.expires_at();
        self.write().insert(
            task.task_id.clone(),
            Entry {
                task: task.clone(),
                expires_at,
            },
        );
        task
    }

    pub fn get(&self, task_id: &str) -> TaskResult<Task> {
        self.get_at(task_id, Utc::now())
    }

    /// Look up a task as of `now`; expired entries read as not found.
    pub fn get_at(&self, task_id: &str, now: DateTime<Utc>) -> TaskResult<Task> {
        self.read()
            .get(task_id)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.task.clone())
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    /// Replace a stored task. A task that already reached a terminal state is
    /// never overwritten.
    pub fn update(&self, task: Task) -> TaskResult<Task> {
        let now = Utc::now();
        let mut entries = self.write();
        let entry = entries
            .get_mut(&task.task_id)
            .filter(|entry| !entry.is_expired(now))
            .ok_or_else(|| TaskError::NotFound(task.task_id.clone()))?;

        if entry.task.is_terminal() {
            return Err(TaskError::AlreadyTerminal {
                id: task.task_id,
                status: entry.task.status,
            });
        }

        entry.task = task.clone();
        Ok(task)
    }

    /// Non-terminal, unexpired tasks.
    pub fn get_active(&self) -> Vec<Task> {
        let now = Utc::now();
        self.read()
            .values()
            .filter(|entry| !entry.is_expired(now) && !entry.task.is_terminal())
            .map(|entry| entry.task.clone())
            .collect()
    }

    pub fn list(&self, cursor: Option<&str>, limit: usize) -> TaskResult<TaskPage> {
        self.list_at(cursor, limit, Utc::now())
    }

    /// Newest-first page of unexpired tasks, starting after `cursor`.
    pub fn list_at(
        &self,
        cursor: Option<&str>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> TaskResult<TaskPage> {
        let limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit };

        let mut tasks: Vec<Task> = self
            .read()
            .values()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.task.clone())
            .collect();
        // Newest first; the id breaks ties so the order is total.
        tasks.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.task_id.cmp(&a.task_id))
        });

        let start = match cursor.filter(|c| !c.is_empty()) {
            None => 0,
            Some(cursor) => {
                tasks
                    .iter()
                    .position(|t| t.task_id == cursor)
                    .ok_or_else(|| TaskError::InvalidCursor(cursor.to_string()))?
                    + 1
            }
        };

        let remaining = tasks.len().saturating_sub(start);
        let page: Vec<Task> = tasks.into_iter().skip(start).take(limit).collect();
        let next_cursor = if remaining > page.len() {
            page.last().map(|t| t.task_id.clone())
        } else {
            None
        };

        Ok(TaskPage {
            tasks: page,
            next_cursor,
        })
    }

    pub fn clean_expired(&self) -> usize {
        self.clean_expired_at(Utc::now())
    }

    /// Physically remove every entry expired as of `now`, whatever its status.
    pub fn clean_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{TaskOperation, TaskStatus};
    use chrono::Duration;
    use serde_json::json;

    fn job_task(job_id: i64, ttl: u64) -> Task {
        Task::new("pool_scrub", json!({"pool": "tank"}), TaskOperation::Job { job_id }, ttl, 5)
    }

    #[test]
    fn test_add_then_get_returns_same_task() {
        let store = TaskStore::new();
        let task = store.add(job_task(1, 60));
        assert_eq!(store.get(&task.task_id).unwrap(), task);
    }

    #[test]
    fn test_expired_task_is_not_found_then_swept() {
        let store = TaskStore::new();
        let task = store.add(job_task(1, 60));
        let later = task.created_at + Duration::seconds(60);

        assert_eq!(
            store.get_at(&task.task_id, later),
            Err(TaskError::NotFound(task.task_id.clone()))
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.clean_expired_at(later), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_clean_expired_keeps_live_entries() {
        let store = TaskStore::new();
        let short = store.add(job_task(1, 10));
        let long = store.add(job_task(2, 3600));
        let at = short.created_at + Duration::seconds(30);

        assert_eq!(store.clean_expired_at(at), 1);
        assert!(store.get_at(&long.task_id, at).is_ok());
    }

    #[test]
    fn test_update_refuses_terminal_task() {
        let store = TaskStore::new();
        let mut task = store.add(job_task(1, 60));
        task.transition(TaskStatus::Cancelled, "Cancelled by caller");
        store.update(task.clone()).unwrap();

        let mut stale = task.clone();
        stale.complete(json!({"done": true}));
        assert_eq!(
            store.update(stale),
            Err(TaskError::AlreadyTerminal {
                id: task.task_id.clone(),
                status: TaskStatus::Cancelled
            })
        );
        assert_eq!(store.get(&task.task_id).unwrap().status, TaskStatus::Cancelled);
    }

    #[test]
    fn test_update_unknown_task() {
        let store = TaskStore::new();
        assert!(matches!(store.update(job_task(1, 60)), Err(TaskError::NotFound(_))));
    }

    #[test]
    fn test_get_active_excludes_terminal() {
        let store = TaskStore::new();
        let running = store.add(job_task(1, 60));
        let mut done = store.add(job_task(2, 60));
        done.complete(json!(null));
        store.update(done).unwrap();

        let active = store.get_active();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].task_id, running.task_id);
    }

    #[test]
    fn test_list_pages_newest_first() {
        let store = TaskStore::new();
        let base = Utc::now();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut task = job_task(i, 3600);
            task.created_at = base + Duration::seconds(i);
            ids.push(store.add(task).task_id);
        }
        ids.reverse();

        let first = store.list_at(None, 2, base).unwrap();
        assert_eq!(
            first.tasks.iter().map(|t| t.task_id.clone()).collect::<Vec<_>>(),
            ids[..2].to_vec()
        );
        assert_eq!(first.next_cursor.as_deref(), Some(ids[1].as_str()));

        let second = store.list_at(first.next_cursor.as_deref(), 2, base).unwrap();
        assert_eq!(second.tasks[0].task_id, ids[2]);

        let last = store.list_at(second.next_cursor.as_deref(), 2, base).unwrap();
        assert_eq!(last.tasks.len(), 1);
        assert_eq!(last.tasks[0].task_id, ids[4]);
        assert!(last.next_cursor.is_none());
    }

    #[test]
    fn test_list_unknown_cursor() {
        let store = TaskStore::new();
        store.add(job_task(1, 60));
        assert_eq!(
            store.list(Some("missing"), 10).unwrap_err(),
            TaskError::InvalidCursor("missing".to_string())
        );
    }
}
