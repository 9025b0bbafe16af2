//! Escalation Engine: policy for routing a stuck task to USER, PLANNER,
//! LOGIC_VALIDATOR or EXTERNAL_ADVISOR, with per-target counters and
//! fallback chains.
//!
//! Grounded directly on `aivcs-core::hitl_controls::engine`
//! (`submit_vote`/`evaluate_checkpoint`/`apply_intervention`): per-target
//! counters generalize the per-checkpoint vote counting, and the
//! USER-fallback-with-`[Technical difficulty]`-prefix generalizes the
//! "unimplemented tier falls back to higher oversight" shape already
//! present there.

use chrono::Utc;

use crate::config::EscalationLimits;
use crate::domain::sessions::EscalationAttempts;
use crate::domain::{EscalationRecord, EscalationTarget, LeaderStatus, Task, TaskState};
use crate::error::{Result, TaskforgeError};
use crate::ids::{EscalationId, TaskId};
use crate::store::TaskStore;

/// Outcome of one escalation attempt.
pub enum EscalationOutcome {
    /// Escalated to USER: the session should halt in ESCALATING until an
    /// external resolver calls `resolve_escalation`.
    PendingUser(EscalationRecord),
    /// PLANNER escalation succeeded: the original task was replanned and
    /// replaced. The loop may resume.
    Replanned { original: TaskId, replaced_by: Vec<TaskId> },
}

pub struct EscalationEngine<'a> {
    limits: &'a EscalationLimits,
}

impl<'a> EscalationEngine<'a> {
    pub fn new(limits: &'a EscalationLimits) -> Self {
        Self { limits }
    }

    fn limit_for(&self, target: EscalationTarget) -> u32 {
        match target {
            EscalationTarget::User => self.limits.user,
            EscalationTarget::Planner => self.limits.planner,
            EscalationTarget::LogicValidator => self.limits.logic_validator,
            EscalationTarget::ExternalAdvisor => self.limits.external_advisor,
        }
    }

    fn attempts_for(&self, attempts: &EscalationAttempts, target: EscalationTarget) -> u32 {
        match target {
            EscalationTarget::User => attempts.user,
            EscalationTarget::Planner => attempts.planner,
            EscalationTarget::LogicValidator => attempts.logic_validator,
            EscalationTarget::ExternalAdvisor => attempts.external_advisor,
        }
    }

    fn increment(&self, attempts: &mut EscalationAttempts, target: EscalationTarget) {
        match target {
            EscalationTarget::User => attempts.user += 1,
            EscalationTarget::Planner => attempts.planner += 1,
            EscalationTarget::LogicValidator => attempts.logic_validator += 1,
            EscalationTarget::ExternalAdvisor => attempts.external_advisor += 1,
        }
    }

    /// Check whether `target` still has budget; returns
    /// `EscalationLimitReached` if the counter is already at its limit.
    pub fn check_limit(&self, attempts: &EscalationAttempts, target: EscalationTarget) -> Result<()> {
        if self.attempts_for(attempts, target) >= self.limit_for(target) {
            return Err(TaskforgeError::EscalationLimitReached {
                target: target.to_string(),
            });
        }
        Ok(())
    }

    /// Record an escalation attempt against `target`, applying the policy:
    /// USER appends a record and halts; LOGIC_VALIDATOR/EXTERNAL_ADVISOR
    /// are unimplemented and always fall back to USER with a
    /// `[Technical difficulty]` prefix. PLANNER is handled by the caller
    /// via `escalate_planner`, since it needs a replan callback.
    pub fn escalate_user(
        &self,
        attempts: &mut EscalationAttempts,
        task_id: Option<TaskId>,
        reason: impl Into<String>,
        now: chrono::DateTime<Utc>,
    ) -> Result<EscalationRecord> {
        self.check_limit(attempts, EscalationTarget::User)?;
        self.increment(attempts, EscalationTarget::User);
        Ok(EscalationRecord::new(
            EscalationId::new(uuid::Uuid::new_v4().to_string()),
            EscalationTarget::User,
            reason,
            task_id,
            now,
        ))
    }

    /// LOGIC_VALIDATOR / EXTERNAL_ADVISOR are not implemented; they always
    /// fall back to USER with a `[Technical difficulty]` prefix, counting
    /// only against USER's budget (the unimplemented target's own counter
    /// is left untouched since no real attempt was made against it).
    pub fn escalate_unimplemented(
        &self,
        attempts: &mut EscalationAttempts,
        target: EscalationTarget,
        task_id: Option<TaskId>,
        reason: impl Into<String>,
        now: chrono::DateTime<Utc>,
    ) -> Result<EscalationRecord> {
        debug_assert!(matches!(
            target,
            EscalationTarget::LogicValidator | EscalationTarget::ExternalAdvisor
        ));
        let wrapped = format!("[Technical difficulty] {}", reason.into());
        self.escalate_user(attempts, task_id, wrapped, now)
    }

    /// Plumb an external resolution into the record and flip the session
    /// back to EXECUTING in one update (spec.md §9 Open Question 4).
    pub fn resolve_escalation(
        &self,
        record: &mut EscalationRecord,
        resolution: impl Into<String>,
        now: chrono::DateTime<Utc>,
    ) -> LeaderStatus {
        record.resolve(resolution, now);
        LeaderStatus::Executing
    }
}

/// PLANNER escalation: given the already-awaited outcome of a replan
/// attempt, on success mark the original task REPLACED_BY_REPLAN via CAS.
/// On failure or limit-reached, fall back to USER with a wrapped reason —
/// the caller is expected to then emit that fallback record via
/// `escalate_user`. Split this way (rather than taking an async replan
/// callback) because the replan itself calls the out-of-scope Agent
/// Runner and must be awaited by the caller first.
pub fn apply_planner_replan(
    engine: &EscalationEngine<'_>,
    store: &TaskStore,
    attempts: &mut EscalationAttempts,
    task: &Task,
    replan_result: Result<Vec<TaskId>>,
) -> std::result::Result<Vec<TaskId>, String> {
    if engine.check_limit(attempts, EscalationTarget::Planner).is_err() {
        return Err(format!("planner escalation limit reached for task {}", task.id));
    }
    match replan_result {
        Ok(replaced_by) => {
            engine.increment(attempts, EscalationTarget::Planner);
            let original_id = task
                .replanning_info
                .as_ref()
                .map(|r| r.original_task_id.clone())
                .unwrap_or_else(|| task.id.clone());
            let mark = store.update_task_cas(&task.id, task.version, |t| {
                t.state = TaskState::ReplacedByReplan;
                t.owner = None;
                t.replanning_info = Some(crate::domain::task::ReplanningInfo {
                    iteration: t.replanning_info.as_ref().map(|r| r.iteration + 1).unwrap_or(1),
                    max_iterations: 3,
                    original_task_id: original_id,
                    replaced_by: replaced_by.clone(),
                    replan_reason: Some("shouldReplan judgement".to_string()),
                });
            });
            match mark {
                Ok(_) => Ok(replaced_by),
                Err(err) => Err(err.to_string()),
            }
        }
        Err(err) => Err(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_escalation_increments_counter() {
        let limits = EscalationLimits::default();
        let engine = EscalationEngine::new(&limits);
        let mut attempts = EscalationAttempts::default();
        let record = engine
            .escalate_user(&mut attempts, Some(TaskId::new("task-1")), "judge said stop", Utc::now())
            .unwrap();
        assert_eq!(attempts.user, 1);
        assert_eq!(record.target, EscalationTarget::User);
    }

    #[test]
    fn user_escalation_fails_at_limit() {
        let limits = EscalationLimits {
            user: 1,
            ..EscalationLimits::default()
        };
        let engine = EscalationEngine::new(&limits);
        let mut attempts = EscalationAttempts { user: 1, ..Default::default() };
        let err = engine.escalate_user(&mut attempts, None, "x", Utc::now()).unwrap_err();
        assert!(matches!(err, TaskforgeError::EscalationLimitReached { .. }));
    }

    #[test]
    fn unimplemented_targets_fall_back_to_user_with_prefix() {
        let limits = EscalationLimits::default();
        let engine = EscalationEngine::new(&limits);
        let mut attempts = EscalationAttempts::default();
        let record = engine
            .escalate_unimplemented(&mut attempts, EscalationTarget::LogicValidator, None, "unclear acceptance", Utc::now())
            .unwrap();
        assert_eq!(record.target, EscalationTarget::User);
        assert!(record.reason.starts_with("[Technical difficulty]"));
        assert_eq!(attempts.user, 1);
        assert_eq!(attempts.logic_validator, 0);
    }

    #[test]
    fn resolve_escalation_flips_to_executing() {
        let limits = EscalationLimits::default();
        let engine = EscalationEngine::new(&limits);
        let mut record = EscalationRecord::new(
            EscalationId::new("esc-1"),
            EscalationTarget::User,
            "stuck",
            None,
            Utc::now(),
        );
        let status = engine.resolve_escalation(&mut record, "approved by operator", Utc::now());
        assert_eq!(status, LeaderStatus::Executing);
        assert!(record.resolved);
    }
}
