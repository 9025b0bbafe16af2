//! Worker Operations: set up a worktree, run the coding agent, commit,
//! push. Grounded on `aivcs-core::git`'s `Command`-shelled primitives and
//! `aivcs-ci::pipeline::CiPipeline::run`'s stage-with-event-recording
//! containment (catch execution errors into a result value instead of
//! propagating, so one failed attempt never corrupts the store).

use chrono::Utc;
use std::sync::Arc;

use crate::agent_runner::{AgentRequest, AgentRunner, RunLog};
use crate::domain::{Run, RunStatus, Task};
use crate::error::Result;
use crate::ids::{RunId, WorktreePath};
use crate::vcs::VcsAdapter;

/// Outcome of one Worker attempt on a task.
pub struct WorkerOutcome {
    pub run: Run,
    pub worktree: WorktreePath,
    pub success: bool,
}

pub struct Worker {
    vcs: Arc<dyn VcsAdapter>,
    runner: Arc<dyn AgentRunner>,
    run_log: RunLog,
}

impl Worker {
    pub fn new(vcs: Arc<dyn VcsAdapter>, runner: Arc<dyn AgentRunner>, run_log: RunLog) -> Self {
        Self { vcs, runner, run_log }
    }

    /// Set up a worktree for `task` at `worktree_path`, on a new branch
    /// derived from `task.branch` if none is reused (first task of a
    /// chain), or pass an already-existing worktree to skip creation
    /// (continuation, or a later task in a serial chain).
    pub fn setup_worktree(&self, task: &Task, worktree_path: &WorktreePath, reuse: bool) -> Result<()> {
        if reuse {
            return Ok(());
        }
        self.vcs.create_worktree(&task.repo, worktree_path, &task.branch)
    }

    /// Build the agent prompt from the task's acceptance criteria, context
    /// and prior judge feedback, call the Agent Runner, and record a Run.
    pub async fn execute(
        &self,
        task: &Task,
        run_id: RunId,
        worktree_path: &WorktreePath,
        model: &str,
    ) -> Result<WorkerOutcome> {
        let prompt = build_worker_prompt(task);
        self.run_log.ensure_runs_dir()?;
        self.run_log.initialize_log_file(&run_id)?;

        let req = AgentRequest {
            agent_type: task_agent_type(task).to_string(),
            model: model.to_string(),
            prompt,
            cwd: std::path::PathBuf::from(worktree_path.as_str()),
            run_id: Some(run_id.clone()),
        };

        let started_at = Utc::now();
        let log_path = format!("runs/{run_id}.log");
        let run = Run::start(run_id.clone(), task.id.clone(), task_agent_type(task), model, log_path, started_at);

        match self.runner.run_agent(req).await {
            Ok(resp) => {
                self.run_log.append_log(&run_id, &resp.final_response)?;
                let finished = run.finish(RunStatus::Success, None, Utc::now());
                self.run_log.save_run_metadata(&finished)?;
                Ok(WorkerOutcome {
                    run: finished,
                    worktree: worktree_path.clone(),
                    success: true,
                })
            }
            Err(err) => {
                let finished = run.finish(RunStatus::Failure, Some(err.to_string()), Utc::now());
                self.run_log.save_run_metadata(&finished)?;
                Ok(WorkerOutcome {
                    run: finished,
                    worktree: worktree_path.clone(),
                    success: false,
                })
            }
        }
    }

    /// Stage all worktree changes and commit. `Ok(None)` when nothing
    /// changed — not an error.
    pub fn commit(&self, worktree_path: &WorktreePath, task: &Task) -> Result<Option<String>> {
        let message = format!("taskforge: {}", task.id);
        self.vcs.commit_changes(worktree_path, &message)
    }

    /// Push the chain's branch to the default remote, at the end of a
    /// chain (or a single-task run).
    pub fn push(&self, task: &Task) -> Result<()> {
        self.vcs.push_branch(&task.repo, &task.branch, "origin")
    }
}

fn task_agent_type(task: &Task) -> &'static str {
    use crate::domain::TaskType;
    match task.task_type {
        TaskType::Implementation => "coder",
        TaskType::Documentation => "writer",
        TaskType::Investigation => "researcher",
        TaskType::Integration => "integrator",
    }
}

fn build_worker_prompt(task: &Task) -> String {
    let mut prompt = format!(
        "## Task\n{}\n\n## Acceptance criteria\n{}\n\n## Scope\n{}\n",
        task.context,
        task.acceptance,
        task.scope_paths.join("\n"),
    );
    if let Some(feedback) = &task.judgement_feedback {
        prompt.push_str(&format!(
            "\n## Prior feedback (attempt {}/{})\n{}\n",
            feedback.iteration + 1,
            feedback.max_iterations,
            feedback.last_judgement.reason,
        ));
        if !feedback.last_judgement.missing_requirements.is_empty() {
            prompt.push_str(&format!(
                "Missing requirements: {}\n",
                feedback.last_judgement.missing_requirements.join("; ")
            ));
        }
    }
    prompt
}
