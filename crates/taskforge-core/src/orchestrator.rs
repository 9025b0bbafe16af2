//! Orchestrator Entrypoint: wire an instruction through planning, the
//! Leader loop, and an optional post-integration evaluation pass that can
//! enqueue additional tasks.
//!
//! Grounded on `aivcs-cli::main`'s top-level `cmd_*` dispatch functions,
//! which wrap a sequence of domain calls and surface failures with
//! `anyhow::Context`; here the same shape lives in the library so both the
//! CLI and any other caller share it.

use std::sync::Arc;

use anyhow::{Context, Result as AnyhowResult};

use crate::config::TaskforgeConfig;
use crate::domain::{LeaderSession, LeaderStatus, PlannerSession, PlanningSession};
use crate::escalation_engine::EscalationEngine;
use crate::ids::{RepoPath, SessionId};
use crate::judge::Judge;
use crate::leader::{LeaderLoop, LeaderRunResult};
use crate::planner_ops::{Planner, PlannerConfig};
use crate::planning_ops::{PlanningOps, PlanningOpsConfig};
use crate::store::TaskStore;
use crate::worker::Worker;

pub struct Orchestrator {
    pub planning: PlanningOps,
    pub planner: Arc<Planner>,
    pub leader: LeaderLoop,
    pub config: TaskforgeConfig,
}

/// Outcome of one full orchestrator pass.
pub struct OrchestratorRunResult {
    pub leader_result: LeaderRunResult,
    pub additional_tasks_suggested: Vec<String>,
}

impl Orchestrator {
    pub fn new(worker: Worker, judge: Judge, planner: Arc<Planner>, planning: PlanningOps, config: TaskforgeConfig) -> Self {
        let leader = LeaderLoop::new(worker, judge, planner.clone(), config.clone());
        Self {
            planning,
            planner,
            leader,
            config,
        }
    }

    /// Take an already-approved planning session's enhanced instruction,
    /// decompose it into tasks, and drive the Leader loop to completion
    /// (or escalation). This is the non-interactive entrypoint used once
    /// planning has produced an `APPROVED` session.
    pub async fn run_instruction(
        &self,
        store: &TaskStore,
        planner_session: &mut PlannerSession,
        leader_session: &mut LeaderSession,
        repo: &RepoPath,
        model: &str,
    ) -> AnyhowResult<OrchestratorRunResult> {
        self.planner
            .plan_tasks(store, planner_session, repo, model)
            .await
            .context("failed to decompose instruction into tasks")?;

        let leader_result = self
            .leader
            .run(store, leader_session, model)
            .await
            .context("leader execution loop failed")?;

        let mut additional_tasks_suggested = Vec::new();
        if leader_session.status == LeaderStatus::Completed {
            let terminal_tasks = store
                .list_tasks()
                .context("failed to list tasks for post-integration evaluation")?
                .into_iter()
                .filter(|t| leader_result.completed_task_ids.contains(&t.id))
                .collect::<Vec<_>>();
            let completion = self
                .planner
                .judge_final_completion(&planner_session.instruction, &terminal_tasks, model)
                .await;
            if !completion.is_complete {
                additional_tasks_suggested = completion.additional_task_suggestions;
            }
        }

        Ok(OrchestratorRunResult {
            leader_result,
            additional_tasks_suggested,
        })
    }

    /// Drive an interactive planning session from DISCOVERY through to
    /// APPROVED without human input — used by non-interactive callers
    /// (smoke tests, scripted runs) that want the default question flow.
    pub async fn auto_approve_planning(&self, session: &mut PlanningSession, model: &str) -> AnyhowResult<String> {
        self.planning
            .generate_questions(session, model)
            .await
            .context("failed to generate clarifying questions")?;
        self.planning
            .record_decisions(session, model)
            .await
            .context("failed to record decision points")?;
        self.planning.approve(session).context("failed to approve planning session")
    }

    pub fn resolve_escalation(
        &self,
        leader_session: &mut LeaderSession,
        escalation_index: usize,
        resolution: impl Into<String>,
    ) -> AnyhowResult<()> {
        let limits = self.config.escalation_limits;
        let engine = EscalationEngine::new(&limits);
        let record = leader_session
            .escalation_records
            .get_mut(escalation_index)
            .context("no such escalation on this session")?;
        leader_session.status = engine.resolve_escalation(record, resolution, chrono::Utc::now());
        Ok(())
    }

    pub fn new_session_id() -> SessionId {
        SessionId::new(uuid::Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::{RunLog, ScriptedAgentRunner};
    use crate::domain::{TaskState, TaskType};
    use crate::ids::{BranchName, TaskId};
    use crate::vcs::GitVcsAdapter;
    use chrono::Utc;

    fn make_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            std::process::Command::new("git").args(args).current_dir(dir.path()).output().unwrap();
        };
        run(&["init", "-b", "main"]);
        run(&["config", "user.name", "t"]);
        run(&["config", "user.email", "t@example.com"]);
        run(&["commit", "--allow-empty", "-m", "init"]);
        dir
    }

    #[tokio::test]
    async fn run_instruction_decomposes_and_drives_the_leader_loop() {
        let coord = tempfile::tempdir().unwrap();
        let store = TaskStore::open(coord.path()).unwrap();
        let repo_dir = make_repo();
        let repo = RepoPath::new(repo_dir.path().to_str().unwrap());

        let planner_runner = Arc::new(ScriptedAgentRunner::new());
        planner_runner.push_text(
            r#"[{"id":"t1","description":"add widget","branch":"task-a1b2c3d4e5","scopePaths":["src/lib.rs"],"acceptance":"tests pass","type":"implementation","estimatedDuration":1.0,"context":"ctx","dependencies":[]}]"#,
        );
        planner_runner.push_text(r#"{"isAcceptable": true, "issues": [], "suggestions": [], "overallScore": 90}"#);
        planner_runner.push_text(r#"{"isComplete": true, "missingAspects": [], "additionalTaskSuggestions": [], "completionScore": 100}"#);

        let worker_runner = Arc::new(ScriptedAgentRunner::new());
        worker_runner.push_text("done");
        let judge_runner = Arc::new(ScriptedAgentRunner::new());
        judge_runner.push_text(r#"{"success": true, "reason": "looks good"}"#);

        let worker = Worker::new(Arc::new(GitVcsAdapter::new()), worker_runner, RunLog::new(coord.path()).unwrap());
        let judge = Judge::new(judge_runner, RunLog::new(coord.path()).unwrap(), 150 * 1024, 10 * 1024);
        let planner = Arc::new(Planner::new(
            planner_runner,
            PlannerConfig {
                max_quality_retries: 5,
                max_consecutive_json_errors: 3,
                quality_threshold: 60,
                max_replan_iterations: 3,
            },
        ));
        let planning = PlanningOps::new(
            Arc::new(ScriptedAgentRunner::new()),
            PlanningOpsConfig {
                history_limit: 100,
                enhanced_instruction_char_budget: 8000,
            },
        );
        let config = TaskforgeConfig::default();
        let orchestrator = Orchestrator::new(worker, judge, planner, planning, config);

        let mut planner_session = PlannerSession::new(SessionId::new("plan-1"), "build a widget", Utc::now());
        let mut leader_session = LeaderSession::new(SessionId::new("lead-1"), "plan.json", 1, Utc::now());

        let result = orchestrator
            .run_instruction(&store, &mut planner_session, &mut leader_session, &repo, "model-x")
            .await
            .unwrap();

        assert_eq!(leader_session.status, LeaderStatus::Completed);
        assert_eq!(result.leader_result.completed_task_ids.len(), 1);
        let prefix = crate::planner_ops::session_short(&planner_session.session_id);
        let stored = store.read_task(&TaskId::new(format!("task-{prefix}-t1"))).unwrap();
        assert_eq!(stored.state, TaskState::Done);
        assert_eq!(stored.branch, BranchName::new("task-a1b2c3d4e5"));
        assert_eq!(stored.task_type, TaskType::Implementation);
    }
}
