//! Run and Check records — execution history linked to a Task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CheckId, RunId, TaskId};

/// Outcome of a single agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Failure,
}

/// An execution record. Immutable once `status` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    #[serde(default)]
    pub schema_version: u32,
    pub id: RunId,
    pub task_id: TaskId,
    pub agent_type: String,
    pub model: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: Option<RunStatus>,
    pub error_message: Option<String>,
    pub log_path: String,
}

impl Run {
    /// Start a new, still in-flight run.
    pub fn start(
        id: RunId,
        task_id: TaskId,
        agent_type: impl Into<String>,
        model: impl Into<String>,
        log_path: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: 1,
            id,
            task_id,
            agent_type: agent_type.into(),
            model: model.into(),
            started_at: now,
            finished_at: None,
            status: None,
            error_message: None,
            log_path: log_path.into(),
        }
    }

    /// Finish the run with a terminal status. Consumes and returns `self`,
    /// matching the builder-style state transitions idiom used elsewhere
    /// for immutable-once-set records.
    pub fn finish(mut self, status: RunStatus, error_message: Option<String>, now: DateTime<Utc>) -> Self {
        self.finished_at = Some(now);
        self.status = Some(status);
        self.error_message = error_message;
        self
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_some()
    }
}

/// A validator result linked to a Task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Check {
    #[serde(default)]
    pub schema_version: u32,
    pub id: CheckId,
    pub task_id: TaskId,
    pub success: bool,
    pub details: String,
}
