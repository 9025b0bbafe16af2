//! Agent-output JSON schemas. Names and shapes are contractual: the Agent
//! Runner is an out-of-scope collaborator, but the shape of what it must
//! return is part of this crate's boundary and is validated on every
//! decode — this is the "runtime schema at the trust boundary" design
//! note: every decoder returns a sum type, never a partially-constructed
//! value.

use serde::{Deserialize, Serialize};

use crate::domain::task::TaskType;

/// One task produced by the Planner's decomposition step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBreakdown {
    pub id: String,
    pub description: String,
    pub branch: String,
    #[serde(default)]
    pub scope_paths: Vec<String>,
    pub acceptance: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub estimated_duration: f64,
    pub context: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl TaskBreakdown {
    /// Validate the fields that cannot be expressed in the wire type alone.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id must not be empty".to_string());
        }
        if self.description.trim().is_empty() {
            return Err(format!("task {}: description must not be empty", self.id));
        }
        if self.acceptance.trim().is_empty() {
            return Err(format!("task {}: acceptance must not be empty", self.id));
        }
        if !(0.5..=8.0).contains(&self.estimated_duration) {
            return Err(format!(
                "task {}: estimatedDuration {} out of range [0.5, 8]",
                self.id, self.estimated_duration
            ));
        }
        Ok(())
    }
}

/// The per-task Judge verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Judgement {
    pub success: bool,
    pub reason: String,
    #[serde(default)]
    pub should_continue: bool,
    #[serde(default)]
    pub should_replan: bool,
    #[serde(default)]
    pub already_satisfied: bool,
    #[serde(default)]
    pub missing_requirements: Option<Vec<String>>,
}

impl Judgement {
    /// The conservative fallback used when the Judge's output cannot be
    /// parsed or validated: availability over strictness.
    pub fn parse_fallback() -> Self {
        Self {
            success: true,
            reason: "parse fallback".to_string(),
            should_continue: false,
            should_replan: false,
            already_satisfied: false,
            missing_requirements: None,
        }
    }
}

/// Quality self-evaluation of a just-generated task breakdown set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQualityJudgement {
    pub is_acceptable: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub overall_score: Option<u32>,
}

impl TaskQualityJudgement {
    pub fn accept_fallback() -> Self {
        Self {
            is_acceptable: true,
            issues: Vec::new(),
            suggestions: Vec::new(),
            overall_score: None,
        }
    }

    pub fn is_accepted(&self, threshold: u32) -> bool {
        self.is_acceptable || self.overall_score.is_some_and(|s| s >= threshold)
    }
}

/// Verdict on whether the original instruction has been satisfied once all
/// tasks reach a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalCompletionJudgement {
    pub is_complete: bool,
    #[serde(default)]
    pub missing_aspects: Vec<String>,
    #[serde(default)]
    pub additional_task_suggestions: Vec<String>,
    pub completion_score: Option<u32>,
}

impl FinalCompletionJudgement {
    pub fn complete_fallback() -> Self {
        Self {
            is_complete: true,
            missing_aspects: Vec::new(),
            additional_task_suggestions: Vec::new(),
            completion_score: None,
        }
    }
}
