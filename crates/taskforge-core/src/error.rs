//! Error taxonomy for the task lifecycle engine.

use crate::ids::TaskId;

/// All errors produced by the task lifecycle engine.
///
/// Kinds are orthogonal to transport: store, runner and VCS calls all
/// return this type rather than raising exceptions for control flow.
#[derive(Debug, thiserror::Error)]
pub enum TaskforgeError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("version conflict on {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("lock held for {0}")]
    LockHeld(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("agent execution error: {0}")]
    AgentExecutionError(String),

    #[error("agent rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("parse error: {0}")]
    ParseError(String),

    #[error("timeout exceeded after {0}s")]
    TimeoutExceeded(u64),

    #[error("max retries exceeded for task {task_id}")]
    MaxRetriesExceeded { task_id: TaskId },

    #[error("escalation limit reached for target {target}")]
    EscalationLimitReached { target: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaskforgeError>;
