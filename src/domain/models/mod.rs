pub mod config;
pub mod job;
pub mod task;

pub use config::{BackendConfig, BridgeConfig, Config, HubConfig, LoggingConfig, TaskConfig};
pub use job::{JobProgress, JobRecord, JobState};
pub use task::{Task, TaskOperation, TaskStatus};
