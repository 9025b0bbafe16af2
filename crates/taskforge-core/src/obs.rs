//! Structured observability events for the task lifecycle, mirroring
//! `aivcs-core::obs`'s `tracing::info!(event = "...", field = %val)`
//! convention and its `RunSpan` RAII guard.

use tracing::span::EnteredSpan;

use crate::ids::TaskId;

/// RAII guard entering a span for the lifetime of one task attempt.
pub struct TaskSpan {
    _span: EnteredSpan,
}

impl TaskSpan {
    pub fn enter(task_id: &TaskId) -> Self {
        let span = tracing::info_span!("taskforge.task", task_id = %task_id).entered();
        Self { _span: span }
    }
}

pub fn emit_task_created(task_id: &TaskId, task_type: &str) {
    tracing::info!(event = "task_created", task_id = %task_id, task_type, "task created");
}

pub fn emit_task_state_changed(task_id: &TaskId, from: &str, to: &str) {
    tracing::info!(event = "task_state_changed", task_id = %task_id, from, to, "task state changed");
}

pub fn emit_run_started(task_id: &TaskId, agent_type: &str) {
    tracing::info!(event = "run_started", task_id = %task_id, agent_type, "run started");
}

pub fn emit_run_finished(task_id: &TaskId, success: bool, duration_ms: i64) {
    tracing::info!(event = "run_finished", task_id = %task_id, success, duration_ms, "run finished");
}

pub fn emit_judgement(task_id: &TaskId, success: bool, should_continue: bool, should_replan: bool) {
    tracing::info!(
        event = "judgement",
        task_id = %task_id,
        success,
        should_continue,
        should_replan,
        "judgement recorded"
    );
}

pub fn emit_escalation_raised(task_id: Option<&TaskId>, target: &str, reason: &str) {
    tracing::warn!(
        event = "escalation_raised",
        task_id = ?task_id.map(|t| t.to_string()),
        target,
        reason,
        "escalation raised"
    );
}

pub fn emit_escalation_resolved(escalation_id: &str) {
    tracing::info!(event = "escalation_resolved", escalation_id, "escalation resolved");
}
