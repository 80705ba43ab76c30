//! Built-in tools.
//!
//! The task tools expose the task store to callers; `system_info` and
//! `pool_scrub` show the two handler shapes against the backend: a plain
//! typed call, and a job start that returns a pollable task.

mod pool;
mod system;
mod tasks;

pub use pool::{PoolScrub, ScrubAction};
pub use system::{SystemInfo, SystemInfoTool};
pub use tasks::{TasksCancel, TasksGet, TasksList};
