//! Backend job records.
//!
//! Long-running backend operations are tracked by the backend as jobs and
//! identified by a numeric handle. These types are the decoded shape of a
//! `core.get_jobs` entry.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::task::TaskStatus;

/// Backend-side state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Waiting,
    Running,
    Success,
    Failed,
    Aborted,
    /// The job paused and needs caller input before continuing.
    InputRequired,
    /// Any state this client does not know about.
    #[serde(other)]
    Unknown,
}

impl JobState {
    /// Map a backend job state onto the caller-visible task status.
    ///
    /// Unknown states are reported as still working; the poll cycle keeps
    /// checking until the backend settles or the attempt budget runs out.
    pub fn task_status(self) -> TaskStatus {
        match self {
            Self::Waiting | Self::Running | Self::Unknown => TaskStatus::Working,
            Self::Success => TaskStatus::Completed,
            Self::Failed => TaskStatus::Failed,
            Self::Aborted => TaskStatus::Cancelled,
            Self::InputRequired => TaskStatus::InputRequired,
        }
    }
}

/// Progress report attached to a running job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    #[serde(default)]
    pub percent: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
}

/// A single backend job as returned by `core.get_jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: i64,
    #[serde(default)]
    pub method: Option<String>,
    pub state: JobState,
    #[serde(default)]
    pub progress: Option<JobProgress>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub exception: Option<String>,
}

impl JobRecord {
    /// Human readable progress line for the task status message.
    pub fn progress_message(&self) -> String {
        let state = match self.state {
            JobState::Waiting => "waiting",
            JobState::Running => "running",
            JobState::Unknown => "in an unknown state",
            JobState::InputRequired => "waiting for input",
            JobState::Success => "finished",
            JobState::Failed => "failed",
            JobState::Aborted => "aborted",
        };
        let mut message = format!("Job {} {}", self.id, state);
        if let Some(progress) = &self.progress {
            if let Some(percent) = progress.percent {
                message.push_str(&format!(" ({percent:.0}%)"));
            }
            if let Some(description) = progress.description.as_deref().filter(|d| !d.is_empty()) {
                message.push_str(": ");
                message.push_str(description);
            }
        }
        message
    }

    /// Error detail for a failed job, falling back to the exception text.
    pub fn failure_detail(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.exception.clone())
            .unwrap_or_else(|| format!("Job {} failed without an error message", self.id))
    }
}
