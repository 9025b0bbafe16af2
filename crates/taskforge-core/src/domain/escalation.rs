//! Escalation record shape — the audit trail of handing decision authority
//! to another role (user, planner, validator, advisor).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{EscalationId, TaskId};

/// Who decision authority is handed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationTarget {
    User,
    Planner,
    LogicValidator,
    ExternalAdvisor,
}

impl std::fmt::Display for EscalationTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "USER"),
            Self::Planner => write!(f, "PLANNER"),
            Self::LogicValidator => write!(f, "LOGIC_VALIDATOR"),
            Self::ExternalAdvisor => write!(f, "EXTERNAL_ADVISOR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRecord {
    #[serde(default)]
    pub schema_version: u32,
    pub id: EscalationId,
    pub target: EscalationTarget,
    pub reason: String,
    pub related_task_id: Option<TaskId>,
    pub escalated_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
}

impl EscalationRecord {
    pub fn new(
        id: EscalationId,
        target: EscalationTarget,
        reason: impl Into<String>,
        related_task_id: Option<TaskId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: 1,
            id,
            target,
            reason: reason.into(),
            related_task_id,
            escalated_at: now,
            resolved: false,
            resolved_at: None,
            resolution: None,
        }
    }

    /// Plumb an external resolution string into the record and mark it
    /// resolved. This is the operation named but only partially specified
    /// in the source material (resolved as Open Question 4 in DESIGN.md).
    pub fn resolve(&mut self, resolution: impl Into<String>, now: DateTime<Utc>) {
        self.resolved = true;
        self.resolved_at = Some(now);
        self.resolution = Some(resolution.into());
    }
}
