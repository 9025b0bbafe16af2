//! Planner Operations: decompose an instruction into tasks with a
//! quality-guarded retry loop, replan failed tasks, and judge final
//! completion.
//!
//! Grounded on `aivcs-core::role_orchestration::router::build_execution_plan`'s
//! "validate then build steps, fail fast with a named error variant"
//! shape; the deterministic id scheme generalizes
//! `oxidized-state::schema::CommitId::short()`'s "first 8 hex chars"
//! convention to "first 8 chars of the session uuid".

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;

use crate::agent_runner::{AgentRequest, AgentRunner};
use crate::dependency::DependencyGraph;
use crate::domain::schemas::{FinalCompletionJudgement, TaskBreakdown, TaskQualityJudgement};
use crate::domain::{PlannerSession, Task};
use crate::error::{Result, TaskforgeError};
use crate::ids::{BranchName, RepoPath, SessionId, TaskId};
use crate::store::TaskStore;

pub struct PlannerConfig {
    pub max_quality_retries: u32,
    pub max_consecutive_json_errors: u32,
    pub quality_threshold: u32,
    pub max_replan_iterations: u32,
}

pub struct Planner {
    runner: Arc<dyn AgentRunner>,
    config: PlannerConfig,
}

/// First 8 characters of a session id, the deterministic prefix shared by
/// every task generated from that session.
pub fn session_short(session_id: &SessionId) -> String {
    session_id.as_str().chars().take(8).collect()
}

/// Translate a TaskBreakdown's raw id/dependency references into
/// deterministic, session-scoped task ids. Must run *before* persisting,
/// so stored dependencies always reference real task ids (spec.md §9).
pub fn breakdown_to_task(
    breakdown: &TaskBreakdown,
    session_short: &str,
    repo: &RepoPath,
    now: chrono::DateTime<Utc>,
) -> Task {
    let id = TaskId::new(format!("task-{session_short}-{}", breakdown.id));
    let dependencies: BTreeSet<TaskId> = breakdown
        .dependencies
        .iter()
        .map(|raw| TaskId::new(format!("task-{session_short}-{raw}")))
        .collect();
    Task::new(
        id,
        repo.clone(),
        BranchName::new(breakdown.branch.clone()),
        breakdown.scope_paths.clone(),
        breakdown.acceptance.clone(),
        breakdown.context.clone(),
        breakdown.task_type,
        dependencies,
        now,
    )
}

fn validate_breakdowns(breakdowns: &[TaskBreakdown]) -> std::result::Result<(), Vec<String>> {
    let errors: Vec<String> = breakdowns.iter().filter_map(|b| b.validate().err()).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_dependency_graph(breakdowns: &[TaskBreakdown], session_short: &str) -> Result<()> {
    let now = Utc::now();
    let repo = RepoPath::new("/repo");
    let tasks: Vec<Task> = breakdowns
        .iter()
        .map(|b| breakdown_to_task(b, session_short, &repo, now))
        .collect();
    let known: std::collections::HashSet<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();
    for task in &tasks {
        for dep in &task.dependencies {
            if !known.contains(dep) {
                return Err(TaskforgeError::ValidationError(format!(
                    "task {} references unknown dependency {dep}",
                    task.id
                )));
            }
        }
    }
    let graph = DependencyGraph::from_tasks(&tasks);
    if let Some(cycle) = graph.find_cycle() {
        return Err(TaskforgeError::ValidationError(format!(
            "dependency cycle in generated plan: {}",
            cycle.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(" -> ")
        )));
    }
    Ok(())
}

impl Planner {
    pub fn new(runner: Arc<dyn AgentRunner>, config: PlannerConfig) -> Self {
        Self { runner, config }
    }

    /// `planTasks` — quality-guarded generation loop, up to
    /// `max_quality_retries`. JSON syntax errors don't consume a quality
    /// retry; they're bounded separately by `max_consecutive_json_errors`.
    pub async fn plan_tasks(
        &self,
        store: &TaskStore,
        session: &mut PlannerSession,
        repo: &RepoPath,
        model: &str,
    ) -> Result<Vec<Task>> {
        let session_short = session_short(&session.session_id);
        let mut quality_attempts = 0u32;
        let mut json_errors = 0u32;
        let mut feedback = String::new();

        loop {
            let prompt = build_decomposition_prompt(&session.instruction, &feedback);
            let req = AgentRequest {
                agent_type: "planner".to_string(),
                model: model.to_string(),
                prompt,
                cwd: std::path::PathBuf::from("."),
                run_id: None,
            };
            let response = self
                .runner
                .run_agent(req)
                .await
                .map_err(|e| TaskforgeError::AgentExecutionError(e.to_string()))?;

            let breakdowns: std::result::Result<Vec<TaskBreakdown>, _> = serde_json::from_str(&response.final_response);
            let breakdowns = match breakdowns {
                Ok(b) => {
                    json_errors = 0;
                    b
                }
                Err(e) => {
                    json_errors += 1;
                    if json_errors >= self.config.max_consecutive_json_errors {
                        return Err(TaskforgeError::ParseError(format!(
                            "planner produced unparseable JSON {json_errors} times: {e}"
                        )));
                    }
                    feedback = format!("previous output was not valid JSON: {e}");
                    continue;
                }
            };

            if let Err(field_errors) = validate_breakdowns(&breakdowns) {
                quality_attempts += 1;
                if quality_attempts >= self.config.max_quality_retries {
                    return Err(TaskforgeError::ValidationError(format!(
                        "planner output failed validation after {quality_attempts} attempts: {}",
                        field_errors.join("; ")
                    )));
                }
                feedback = format!("fix these issues: {}", field_errors.join("; "));
                continue;
            }

            if let Err(e) = validate_dependency_graph(&breakdowns, &session_short) {
                quality_attempts += 1;
                if quality_attempts >= self.config.max_quality_retries {
                    return Err(e);
                }
                feedback = format!("fix the dependency graph: {e}");
                continue;
            }

            let quality = self.run_quality_judge(&breakdowns, model).await;
            if quality.is_accepted(self.config.quality_threshold) {
                let now = Utc::now();
                let tasks: Vec<Task> = breakdowns
                    .iter()
                    .map(|b| breakdown_to_task(b, &session_short, repo, now))
                    .collect();
                for task in &tasks {
                    store.create_task(task.clone())?;
                    session.generated_tasks.push(task.id.clone());
                }
                return Ok(tasks);
            }

            quality_attempts += 1;
            if quality_attempts >= self.config.max_quality_retries {
                return Err(TaskforgeError::ValidationError(format!(
                    "planner quality judge rejected output {quality_attempts} times: {}",
                    quality.issues.join("; ")
                )));
            }
            feedback = format!(
                "previous tasks: {:?}\njudge critique: {}",
                breakdowns.iter().map(|b| &b.id).collect::<Vec<_>>(),
                quality.issues.join("; ")
            );
        }
    }

    /// Quality self-evaluation of a generated breakdown; defaults to
    /// accept on agent/parse failure (conservative-accept, §9).
    async fn run_quality_judge(&self, breakdowns: &[TaskBreakdown], model: &str) -> TaskQualityJudgement {
        let prompt = format!(
            "Evaluate this task breakdown for completeness and quality:\n{}",
            serde_json::to_string_pretty(breakdowns).unwrap_or_default()
        );
        let req = AgentRequest {
            agent_type: "quality-judge".to_string(),
            model: model.to_string(),
            prompt,
            cwd: std::path::PathBuf::from("."),
            run_id: None,
        };
        match self.runner.run_agent(req).await {
            Ok(resp) => serde_json::from_str(&resp.final_response).unwrap_or_else(|_| TaskQualityJudgement::accept_fallback()),
            Err(_) => TaskQualityJudgement::accept_fallback(),
        }
    }

    /// `replanFailedTask` — build a replanning prompt, generate new
    /// sub-tasks, and return them (creation + CAS marking of the original
    /// is the caller's job via the Escalation Engine).
    pub async fn replan_failed_task(
        &self,
        task: &Task,
        truncated_log: &str,
        missing_requirements: &[String],
        session_short_prefix: &str,
        model: &str,
    ) -> Result<Vec<Task>> {
        let prompt = format!(
            "## Original task\n{}\n\n## Run log (truncated)\n{}\n\n## Missing requirements\n{}\n\nDecompose this into smaller sub-tasks as a JSON array of TaskBreakdown records.",
            task.context,
            truncated_log,
            missing_requirements.join("; "),
        );
        let req = AgentRequest {
            agent_type: "planner".to_string(),
            model: model.to_string(),
            prompt,
            cwd: std::path::PathBuf::from("."),
            run_id: None,
        };
        let response = self
            .runner
            .run_agent(req)
            .await
            .map_err(|e| TaskforgeError::AgentExecutionError(e.to_string()))?;
        let breakdowns: Vec<TaskBreakdown> = serde_json::from_str(&response.final_response)
            .map_err(|e| TaskforgeError::ParseError(e.to_string()))?;
        validate_breakdowns(&breakdowns).map_err(|errs| TaskforgeError::ValidationError(errs.join("; ")))?;
        let now = Utc::now();
        Ok(breakdowns
            .iter()
            .map(|b| breakdown_to_task(b, session_short_prefix, &task.repo, now))
            .collect())
    }

    /// `judgeFinalCompletion` — ask whether the original instruction is
    /// satisfied once every task has reached a terminal state.
    pub async fn judge_final_completion(&self, instruction: &str, terminal_tasks: &[Task], model: &str) -> FinalCompletionJudgement {
        let summary: Vec<&str> = terminal_tasks.iter().filter_map(|t| t.summary.as_deref()).collect();
        let prompt = format!(
            "## Original instruction\n{instruction}\n\n## Completed work summaries\n{}\n\nIs the instruction fully satisfied?",
            summary.join("\n")
        );
        let req = AgentRequest {
            agent_type: "final-completion-judge".to_string(),
            model: model.to_string(),
            prompt,
            cwd: std::path::PathBuf::from("."),
            run_id: None,
        };
        match self.runner.run_agent(req).await {
            Ok(resp) => serde_json::from_str(&resp.final_response).unwrap_or_else(|_| FinalCompletionJudgement::complete_fallback()),
            Err(_) => FinalCompletionJudgement::complete_fallback(),
        }
    }
}

fn build_decomposition_prompt(instruction: &str, feedback: &str) -> String {
    if feedback.is_empty() {
        format!("Decompose this instruction into a JSON array of TaskBreakdown records:\n{instruction}")
    } else {
        format!(
            "Decompose this instruction into a JSON array of TaskBreakdown records:\n{instruction}\n\n## Feedback from previous attempt\n{feedback}"
        )
    }
}

/// Applies `markTaskAsReplanned` semantics at the call site: crossing
/// `max_replan_iterations` is a `ValidationError`, and the caller must
/// BLOCK the task instead of replanning further.
pub fn check_replan_budget(task: &Task, max_replan_iterations: u32) -> Result<()> {
    if let Some(info) = &task.replanning_info {
        if info.iteration + 1 > max_replan_iterations {
            return Err(TaskforgeError::ValidationError(format!(
                "task {} exceeded max replan iterations ({max_replan_iterations})",
                task.id
            )));
        }
    }
    Ok(())
}
