//! Planning Operations: the interactive Discovery→Design→Review→Approved
//! phase machine that feeds the Planner.
//!
//! Grounded on `aivcs-core::hitl_controls::checkpoint`/`engine`'s
//! status-enum-with-terminal-check pattern (`CheckpointStatus::is_terminal`)
//! generalized to `PlanningStatus`, and the reject-counter-to-terminal
//! transition mirrors `RiskTier`-gated approval counting in
//! `hitl_controls::engine::evaluate_checkpoint`.

use std::sync::Arc;

use chrono::Utc;

use crate::agent_runner::{AgentRequest, AgentRunner};
use crate::domain::sessions::{ConversationTurn, DecisionPoint, PlanningQuestion};
use crate::domain::{PlanningSession, PlanningStatus};
use crate::error::{Result, TaskforgeError};

pub struct PlanningOpsConfig {
    pub history_limit: usize,
    pub enhanced_instruction_char_budget: usize,
}

pub struct PlanningOps {
    runner: Arc<dyn AgentRunner>,
    config: PlanningOpsConfig,
}

impl PlanningOps {
    pub fn new(runner: Arc<dyn AgentRunner>, config: PlanningOpsConfig) -> Self {
        Self { runner, config }
    }

    /// DISCOVERY → generate clarifying questions. One automatic retry on
    /// malformed JSON; a second failure transitions the session to FAILED.
    pub async fn generate_questions(&self, session: &mut PlanningSession, model: &str) -> Result<()> {
        if session.status.is_terminal() {
            return Err(TaskforgeError::ValidationError(format!(
                "planning session {} is already terminal",
                session.session_id
            )));
        }
        let prompt = format!(
            "Generate clarifying questions (JSON array of {{id,text,important}}) for: {}",
            session.instruction
        );
        let questions: Vec<PlanningQuestion> = self.run_with_one_retry(session, &prompt, model).await?;
        session.questions = questions;
        session.status = PlanningStatus::Design;
        session.updated_at = Utc::now();
        Ok(())
    }

    /// DESIGN → record decision points once every important question is
    /// answered.
    pub async fn record_decisions(&self, session: &mut PlanningSession, model: &str) -> Result<()> {
        if session.status != PlanningStatus::Design {
            return Err(TaskforgeError::ValidationError(format!(
                "cannot record decisions: session {} is not in DESIGN",
                session.session_id
            )));
        }
        let unanswered_important = session.questions.iter().any(|q| q.important && q.answer.is_none());
        if unanswered_important {
            return Err(TaskforgeError::ValidationError("important questions remain unanswered".to_string()));
        }
        let prompt = format!(
            "Given these answered questions, produce decision points (JSON array of {{id,text}}): {:?}",
            session.questions
        );
        let decisions: Vec<DecisionPoint> = self.run_with_one_retry(session, &prompt, model).await?;
        session.decision_points = decisions;
        session.status = PlanningStatus::Review;
        session.updated_at = Utc::now();
        Ok(())
    }

    /// REVIEW → APPROVED. Emits the enhanced instruction.
    pub fn approve(&self, session: &mut PlanningSession) -> Result<String> {
        if session.status != PlanningStatus::Review {
            return Err(TaskforgeError::ValidationError(format!(
                "cannot approve: session {} is not in REVIEW",
                session.session_id
            )));
        }
        session.status = PlanningStatus::Approved;
        session.updated_at = Utc::now();
        Ok(build_enhanced_instruction(session, self.config.enhanced_instruction_char_budget))
    }

    /// REVIEW → DESIGN (rejectCount < 3) or CANCELLED (rejectCount == 3).
    pub fn reject(&self, session: &mut PlanningSession) -> Result<()> {
        if session.status != PlanningStatus::Review {
            return Err(TaskforgeError::ValidationError(format!(
                "cannot reject: session {} is not in REVIEW",
                session.session_id
            )));
        }
        session.reject_count += 1;
        session.status = if session.reject_count >= 3 {
            PlanningStatus::Cancelled
        } else {
            PlanningStatus::Design
        };
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn run_with_one_retry<T: serde::de::DeserializeOwned>(
        &self,
        session: &mut PlanningSession,
        prompt: &str,
        model: &str,
    ) -> Result<T> {
        for attempt in 0..2 {
            let req = AgentRequest {
                agent_type: "planning".to_string(),
                model: model.to_string(),
                prompt: prompt.to_string(),
                cwd: std::path::PathBuf::from("."),
                run_id: None,
            };
            let response = self
                .runner
                .run_agent(req)
                .await
                .map_err(|e| TaskforgeError::AgentExecutionError(e.to_string()))?;
            session.push_turn(
                ConversationTurn {
                    role: "assistant".to_string(),
                    content: response.final_response.clone(),
                    at: Utc::now(),
                },
                self.config.history_limit,
            );
            match serde_json::from_str::<T>(&response.final_response) {
                Ok(value) => return Ok(value),
                Err(e) if attempt == 0 => {
                    tracing::warn!(event = "planning_parse_retry", session_id = %session.session_id, error = %e, "retrying after malformed JSON");
                    continue;
                }
                Err(e) => {
                    session.status = PlanningStatus::Failed;
                    session.error_message = Some(e.to_string());
                    session.updated_at = Utc::now();
                    return Err(TaskforgeError::ParseError(e.to_string()));
                }
            }
        }
        unreachable!("loop always returns within two attempts")
    }
}

/// Concatenate the original instruction, answered important questions and
/// decisions, capped at `char_budget` (~2000 tokens at 4 chars/token).
fn build_enhanced_instruction(session: &PlanningSession, char_budget: usize) -> String {
    let mut out = session.instruction.clone();
    for q in session.questions.iter().filter(|q| q.important) {
        if let Some(answer) = &q.answer {
            out.push_str(&format!("\nQ: {}\nA: {}", q.text, answer));
        }
    }
    for d in &session.decision_points {
        if let Some(decision) = &d.decision {
            out.push_str(&format!("\nDecision: {} -> {}", d.text, decision));
        }
    }
    if out.len() > char_budget {
        out.truncate(crate::judge::floor_char_boundary(&out, char_budget));
    }
    out
}
