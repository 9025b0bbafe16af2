//! Data model: Task, Run, Check, session families and agent-output schemas.

pub mod escalation;
pub mod schemas;
pub mod sessions;
pub mod task;
pub mod run;

pub use escalation::{EscalationRecord, EscalationTarget};
pub use run::{Check, Run, RunStatus};
pub use schemas::{FinalCompletionJudgement, Judgement, TaskBreakdown, TaskQualityJudgement};
pub use sessions::{
    ConversationTurn, DecisionPoint, EscalationAttempts, ExplorationSession, LeaderSession,
    LeaderStatus, MemberTaskEvent, PlannerSession, PlanningQuestion, PlanningSession,
    PlanningStatus,
};
pub use task::{JudgementFeedback, LastJudgement, ReplanningInfo, Task, TaskState, TaskType};
