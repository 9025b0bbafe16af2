//! Judge Operations: read the run log, build a prompt, parse the verdict,
//! and drive the Task Store's state-transition helpers.
//!
//! The balanced-JSON extractor and log truncation are small pure
//! functions, grounded on the corpus convention of separately-unit-tested
//! pure helpers (e.g. `aivcs-cli::main`'s `build_spec_diff`/`truncate`).

use std::sync::Arc;

use crate::agent_runner::{AgentRequest, AgentRunner, RunLog};
use crate::domain::schemas::Judgement;
use crate::domain::{Task, TaskState};
use crate::error::{Result, TaskforgeError};
use crate::ids::RunId;
use crate::store::TaskStore;

/// Truncate `log` to `budget` bytes, preserving `head` bytes from the
/// start and the remainder from the tail, respecting UTF-8 boundaries (no
/// mid-codepoint cuts). Idempotent: truncating an already-short log is a
/// no-op copy.
pub fn truncate_log(log: &str, budget: usize, head: usize) -> String {
    if log.len() <= budget {
        return log.to_string();
    }
    let head = head.min(budget);
    let tail_budget = budget - head;

    let head_end = floor_char_boundary(log, head);
    let tail_start_min = log.len().saturating_sub(tail_budget);
    let tail_start = ceil_char_boundary(log, tail_start_min);

    let marker = "\n...[truncated]...\n";
    format!("{}{}{}", &log[..head_end], marker, &log[tail_start..])
}

pub(crate) fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Extract the first balanced JSON object from `text`, tolerating fenced
/// code blocks (```json ... ``` or ``` ... ```) and ignoring braces inside
/// string literals.
pub fn extract_balanced_json(text: &str) -> Option<String> {
    let search_space = strip_fence(text);
    let bytes = search_space.as_bytes();
    let start = bytes.iter().position(|b| *b == b'{')?;

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(search_space[start..end].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_fence(text: &str) -> String {
    if let Some(start) = text.find("```") {
        let after_opening = &text[start + 3..];
        let after_opening = after_opening.strip_prefix("json").unwrap_or(after_opening);
        let after_opening = after_opening.strip_prefix('\n').unwrap_or(after_opening);
        if let Some(end) = after_opening.find("```") {
            return after_opening[..end].to_string();
        }
        return after_opening.to_string();
    }
    text.to_string()
}

/// Parse an Agent Runner response into a `Judgement`, falling back to the
/// conservative accept on any parse/validation failure (availability over
/// strictness — see spec §9).
pub fn parse_judgement(response: &str) -> Judgement {
    let Some(candidate) = extract_balanced_json(response) else {
        return Judgement::parse_fallback();
    };
    serde_json::from_str(&candidate).unwrap_or_else(|_| Judgement::parse_fallback())
}

pub fn build_judge_prompt(task: &Task, truncated_log: &str) -> String {
    format!(
        "## Acceptance criteria\n{}\n\n## Run log\n{}\n\nRespond with a single JSON object: {{\"success\":bool,\"reason\":string,\"shouldContinue\":bool,\"shouldReplan\":bool,\"alreadySatisfied\":bool,\"missingRequirements\":[string]}}",
        task.acceptance, truncated_log
    )
}

pub struct Judge {
    runner: Arc<dyn AgentRunner>,
    run_log: RunLog,
    log_budget_bytes: usize,
    log_head_bytes: usize,
}

impl Judge {
    pub fn new(runner: Arc<dyn AgentRunner>, run_log: RunLog, log_budget_bytes: usize, log_head_bytes: usize) -> Self {
        Self {
            runner,
            run_log,
            log_budget_bytes,
            log_head_bytes,
        }
    }

    /// Read the Task, reject unless RUNNING, read+truncate the run log,
    /// call the Agent Runner, and return the parsed verdict.
    pub async fn judge(&self, store: &TaskStore, task_id: &crate::ids::TaskId, run_id: &RunId, model: &str) -> Result<Judgement> {
        let task = store.read_task(task_id)?;
        if task.state != TaskState::Running {
            return Err(TaskforgeError::ValidationError(format!(
                "cannot judge task {task_id}: not RUNNING"
            )));
        }
        let log = self.run_log.read_log(run_id)?;
        let truncated = truncate_log(&log, self.log_budget_bytes, self.log_head_bytes);
        let prompt = build_judge_prompt(&task, &truncated);

        let req = AgentRequest {
            agent_type: "judge".to_string(),
            model: model.to_string(),
            prompt,
            cwd: std::path::PathBuf::from("."),
            run_id: Some(run_id.clone()),
        };

        match self.runner.run_agent(req).await {
            Ok(resp) => Ok(parse_judgement(&resp.final_response)),
            Err(_) => Ok(Judgement::parse_fallback()),
        }
    }
}

/// `markTaskAsCompleted` — DONE, owner cleared.
pub fn mark_task_as_completed(store: &TaskStore, task_id: &crate::ids::TaskId, expected_version: u64) -> Result<Task> {
    store.update_task_cas(task_id, expected_version, |t| {
        t.state = TaskState::Done;
        t.owner = None;
    })
}

/// `markTaskAsSkipped` — SKIPPED, owner cleared.
pub fn mark_task_as_skipped(store: &TaskStore, task_id: &crate::ids::TaskId, expected_version: u64) -> Result<Task> {
    store.update_task_cas(task_id, expected_version, |t| {
        t.state = TaskState::Skipped;
        t.owner = None;
    })
}

/// `markTaskAsBlocked` — BLOCKED, owner cleared.
pub fn mark_task_as_blocked(
    store: &TaskStore,
    task_id: &crate::ids::TaskId,
    expected_version: u64,
    reason: Option<String>,
) -> Result<Task> {
    store.update_task_cas(task_id, expected_version, |t| {
        t.state = TaskState::Blocked;
        t.owner = None;
        if let Some(reason) = reason {
            t.summary = Some(reason);
        }
    })
}

/// `markTaskForContinuation` — increments the continuation counter; fails
/// with `MaxRetriesExceeded` instead of silently re-queuing once
/// `max_iter` would be exceeded, so the caller can BLOCK the task.
pub fn mark_task_for_continuation(
    store: &TaskStore,
    task_id: &crate::ids::TaskId,
    expected_version: u64,
    judgement: &Judgement,
    max_iter: u32,
) -> Result<Task> {
    let current = store.read_task(task_id)?;
    let next_iteration = current.judgement_feedback.as_ref().map(|f| f.iteration + 1).unwrap_or(1);
    if next_iteration >= max_iter {
        return Err(TaskforgeError::MaxRetriesExceeded { task_id: task_id.clone() });
    }
    store.update_task_cas(task_id, expected_version, |t| {
        t.judgement_feedback = Some(crate::domain::task::JudgementFeedback {
            iteration: next_iteration,
            max_iterations: max_iter,
            last_judgement: crate::domain::task::LastJudgement {
                reason: judgement.reason.clone(),
                missing_requirements: judgement.missing_requirements.clone().unwrap_or_default(),
                evaluated_at: chrono::Utc::now(),
            },
        });
        t.state = TaskState::Ready;
        t.owner = None;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_log_is_noop_under_budget() {
        let log = "short log";
        assert_eq!(truncate_log(log, 150 * 1024, 10 * 1024), log);
    }

    #[test]
    fn truncate_log_preserves_head_and_tail() {
        let log = "A".repeat(100) + &"B".repeat(100) + &"C".repeat(100);
        let truncated = truncate_log(&log, 120, 40);
        assert!(truncated.starts_with(&"A".repeat(40)));
        assert!(truncated.ends_with(&"C".repeat(80)));
    }

    #[test]
    fn truncate_log_respects_utf8_boundaries() {
        let log = "é".repeat(200);
        let truncated = truncate_log(&log, 50, 11);
        assert!(String::from_utf8(truncated.clone().into_bytes()).is_ok());
        assert!(truncated.chars().all(|c| c != '\u{FFFD}'));
    }

    #[test]
    fn truncate_log_is_idempotent() {
        let log = "x".repeat(1000);
        let once = truncate_log(&log, 120, 40);
        let twice = truncate_log(&once, 120, 40);
        assert_eq!(once, twice);
    }

    #[test]
    fn extract_json_from_fenced_block() {
        let resp = "here is my answer:\n```json\n{\"success\": true, \"reason\": \"ok\"}\n```\nthanks";
        let json = extract_balanced_json(resp).unwrap();
        assert_eq!(json, "{\"success\": true, \"reason\": \"ok\"}");
    }

    #[test]
    fn extract_json_ignores_braces_in_strings() {
        let resp = r#"{"success": true, "reason": "contains { a brace } inside"}"#;
        let json = extract_balanced_json(resp).unwrap();
        let parsed: Judgement = serde_json::from_str(&json).unwrap();
        assert!(parsed.success);
    }

    #[test]
    fn extract_json_handles_nested_objects() {
        let resp = r#"prefix garbage {"success": false, "reason": "x", "nested": {"a": 1}} suffix"#;
        let json = extract_balanced_json(resp).unwrap();
        assert!(serde_json::from_str::<serde_json::Value>(&json).is_ok());
    }

    #[test]
    fn parse_judgement_falls_back_on_garbage() {
        let j = parse_judgement("not json at all");
        assert!(j.success);
        assert_eq!(j.reason, "parse fallback");
    }

    #[test]
    fn parse_judgement_parses_a_well_formed_verdict() {
        let j = parse_judgement(r#"{"success": false, "reason": "missing tests", "shouldContinue": true}"#);
        assert!(!j.success);
        assert!(j.should_continue);
    }
}
