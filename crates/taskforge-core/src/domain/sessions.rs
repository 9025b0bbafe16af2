//! Session records for the Planning / Planner / Leader state machines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::escalation::EscalationRecord;
use crate::ids::{SessionId, TaskId};

/// A single conversational turn persisted with a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
    pub at: DateTime<Utc>,
}

/// Phase of a `PlanningSession`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanningStatus {
    Discovery,
    Design,
    Review,
    Approved,
    Cancelled,
    Failed,
}

impl PlanningStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Cancelled | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningQuestion {
    pub id: String,
    pub text: String,
    pub important: bool,
    pub answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionPoint {
    pub id: String,
    pub text: String,
    pub decision: Option<String>,
}

/// Interactive Discovery→Design→Review→Approved phase machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanningSession {
    #[serde(default)]
    pub schema_version: u32,
    pub session_id: SessionId,
    pub instruction: String,
    pub status: PlanningStatus,
    pub questions: Vec<PlanningQuestion>,
    pub decision_points: Vec<DecisionPoint>,
    pub reject_count: u32,
    pub current_question_index: usize,
    pub current_decision_index: usize,
    pub planner_session_id: Option<SessionId>,
    pub conversation_history: Vec<ConversationTurn>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlanningSession {
    pub fn new(session_id: SessionId, instruction: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: 1,
            session_id,
            instruction: instruction.into(),
            status: PlanningStatus::Discovery,
            questions: Vec::new(),
            decision_points: Vec::new(),
            reject_count: 0,
            current_question_index: 0,
            current_decision_index: 0,
            planner_session_id: None,
            conversation_history: Vec::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a conversation turn, pruning to the last `limit` entries.
    pub fn push_turn(&mut self, turn: ConversationTurn, limit: usize) {
        self.conversation_history.push(turn);
        if self.conversation_history.len() > limit {
            let overflow = self.conversation_history.len() - limit;
            self.conversation_history.drain(0..overflow);
        }
    }
}

/// A task-decomposition conversation, generating the final TaskBreakdown set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerSession {
    #[serde(default)]
    pub schema_version: u32,
    pub session_id: SessionId,
    pub instruction: String,
    pub generated_tasks: Vec<TaskId>,
    pub conversation_history: Vec<ConversationTurn>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PlannerSession {
    pub fn new(session_id: SessionId, instruction: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            schema_version: 1,
            session_id,
            instruction: instruction.into(),
            generated_tasks: Vec::new(),
            conversation_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Status of a `LeaderSession` driving the execution loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaderStatus {
    Planning,
    Executing,
    Reviewing,
    Escalating,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EscalationAttempts {
    pub user: u32,
    pub planner: u32,
    pub logic_validator: u32,
    pub external_advisor: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberTaskEvent {
    pub task_id: TaskId,
    pub event: String,
    pub at: DateTime<Utc>,
}

/// The Leader's durable view of an execution over a fixed plan file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderSession {
    #[serde(default)]
    pub schema_version: u32,
    pub session_id: SessionId,
    pub plan_file_path: String,
    pub status: LeaderStatus,
    pub member_task_history: Vec<MemberTaskEvent>,
    pub escalation_records: Vec<EscalationRecord>,
    pub active_task_ids: Vec<TaskId>,
    pub completed_task_count: u32,
    pub total_task_count: u32,
    pub escalation_attempts: EscalationAttempts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeaderSession {
    pub fn new(
        session_id: SessionId,
        plan_file_path: impl Into<String>,
        total_task_count: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: 1,
            session_id,
            plan_file_path: plan_file_path.into(),
            status: LeaderStatus::Planning,
            member_task_history: Vec::new(),
            escalation_records: Vec::new(),
            active_task_ids: Vec::new(),
            completed_task_count: 0,
            total_task_count,
            escalation_attempts: EscalationAttempts::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// An ephemeral exploration session (pre-planning scratch conversation),
/// persisted for the same reasons as the other session families: an
/// append-only audit trail of what the agent was shown before the first
/// PlanningSession phase began.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationSession {
    #[serde(default)]
    pub schema_version: u32,
    pub session_id: SessionId,
    pub instruction: String,
    pub notes: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
