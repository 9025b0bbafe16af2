//! The Task record — the central mutable entity of the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ids::{BranchName, RepoPath, RunId, TaskId, WorkerId};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Ready,
    Running,
    NeedsContinuation,
    Blocked,
    Done,
    Skipped,
    Cancelled,
    ReplacedByReplan,
}

impl TaskState {
    /// Terminal states are never picked by the scheduler again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::Skipped | Self::Cancelled | Self::ReplacedByReplan
        )
    }
}

/// Broad category of work a task represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Implementation,
    Documentation,
    Investigation,
    Integration,
}

/// Accumulated judge feedback across continuation attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgementFeedback {
    pub iteration: u32,
    pub max_iterations: u32,
    pub last_judgement: LastJudgement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastJudgement {
    pub reason: String,
    pub missing_requirements: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// Bookkeeping for a task that has been (or may yet be) replanned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplanningInfo {
    pub iteration: u32,
    pub max_iterations: u32,
    pub original_task_id: TaskId,
    #[serde(default)]
    pub replaced_by: Vec<TaskId>,
    pub replan_reason: Option<String>,
}

/// The central mutable entity of the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub schema_version: u32,
    pub id: TaskId,
    pub state: TaskState,
    pub version: u64,
    pub owner: Option<WorkerId>,
    pub repo: RepoPath,
    pub branch: BranchName,
    pub scope_paths: Vec<String>,
    pub acceptance: String,
    pub context: String,
    pub summary: Option<String>,
    pub task_type: TaskType,
    pub dependencies: BTreeSet<TaskId>,
    pub latest_run_id: Option<RunId>,
    pub judgement_feedback: Option<JudgementFeedback>,
    pub replanning_info: Option<ReplanningInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Construct a fresh, unpersisted task in `READY` state with `version = 0`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TaskId,
        repo: RepoPath,
        branch: BranchName,
        scope_paths: Vec<String>,
        acceptance: impl Into<String>,
        context: impl Into<String>,
        task_type: TaskType,
        dependencies: BTreeSet<TaskId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: 1,
            id,
            state: TaskState::Ready,
            version: 0,
            owner: None,
            repo,
            branch,
            scope_paths,
            acceptance: acceptance.into(),
            context: context.into(),
            summary: None,
            task_type,
            dependencies,
            latest_run_id: None,
            judgement_feedback: None,
            replanning_info: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Invariant 1: RUNNING implies an owner; every other state implies none.
    pub fn owner_invariant_holds(&self) -> bool {
        match self.state {
            TaskState::Running => self.owner.is_some(),
            _ => self.owner.is_none(),
        }
    }
}
