//! Serial Executor: execute a dependency chain inside one shared
//! worktree, feeding each task's output as a hint to the next.
//!
//! Grounded on `aivcs-ci::pipeline::CiPipeline::run`'s sequential
//! stage-execution-with-shared-context shape, generalized from CI stages
//! to chained tasks that share one worktree instead of one sandbox.

use std::sync::Arc;

use crate::domain::TaskState;
use crate::error::Result;
use crate::ids::{RunId, TaskId, WorkerId, WorktreePath};
use crate::judge::{mark_task_as_blocked, mark_task_as_completed, mark_task_for_continuation, Judge};
use crate::store::TaskStore;
use crate::vcs::VcsAdapter;
use crate::worker::Worker;

pub struct SerialExecutionResult {
    pub completed: Vec<TaskId>,
    pub blocked: Option<TaskId>,
}

pub struct SerialExecutor<'a> {
    vcs: Arc<dyn VcsAdapter>,
    worker: &'a Worker,
    judge: &'a Judge,
    serial_chain_task_retries: u32,
    judgement_max_iterations: u32,
}

impl<'a> SerialExecutor<'a> {
    pub fn new(
        vcs: Arc<dyn VcsAdapter>,
        worker: &'a Worker,
        judge: &'a Judge,
        serial_chain_task_retries: u32,
        judgement_max_iterations: u32,
    ) -> Self {
        Self {
            vcs,
            worker,
            judge,
            serial_chain_task_retries,
            judgement_max_iterations,
        }
    }

    /// Execute `chain` in order, sharing one worktree across the whole
    /// chain. Any failure (worker error, max continuation retries, or a
    /// replan verdict) blocks that task and aborts the remaining chain.
    /// The branch is pushed once, after the last successful task.
    pub async fn run(&self, store: &TaskStore, chain: &[TaskId], worktree_path: &WorktreePath, model: &str) -> Result<SerialExecutionResult> {
        let mut completed = Vec::new();

        for (index, task_id) in chain.iter().enumerate() {
            let task = store.read_task(task_id)?;
            let worker_id = WorkerId::new(uuid::Uuid::new_v4().to_string());
            let mut claimed = store.update_task_cas(task_id, task.version, |t| {
                t.state = TaskState::Running;
                t.owner = Some(worker_id.clone());
            })?;

            self.worker.setup_worktree(&claimed, worktree_path, index > 0)?;

            // Chain branch continuity: a prior task in the chain may have
            // landed the worktree on a different branch than this task
            // records; keep the Task Store's view in sync via CAS.
            if index > 0 {
                if let Ok(actual_branch) = self.vcs.get_current_branch(&claimed.repo) {
                    if actual_branch != claimed.branch {
                        claimed = store.update_task_cas(task_id, claimed.version, |t| {
                            t.branch = actual_branch.clone();
                        })?;
                    }
                }
            }

            let Some((task_after, run_id)) = self.run_with_continuation(store, &claimed, worktree_path, model).await? else {
                return Ok(SerialExecutionResult {
                    completed,
                    blocked: Some(task_id.clone()),
                });
            };

            self.worker.commit(worktree_path, &task_after)?;

            let judgement = self.judge.judge(store, task_id, &run_id, model).await?;
            let current = store.read_task(task_id)?;

            if judgement.already_satisfied || judgement.success {
                mark_task_as_completed(store, task_id, current.version)?;
                completed.push(task_id.clone());
            } else if judgement.should_continue {
                match mark_task_for_continuation(store, task_id, current.version, &judgement, self.judgement_max_iterations) {
                    Ok(_) => {
                        // Task stays READY for a later chain run to pick up;
                        // this chain stops here since the task isn't done.
                        return Ok(SerialExecutionResult {
                            completed,
                            blocked: Some(task_id.clone()),
                        });
                    }
                    Err(crate::error::TaskforgeError::MaxRetriesExceeded { .. }) => {
                        mark_task_as_blocked(store, task_id, current.version, Some("max continuation retries exceeded".to_string()))?;
                        return Ok(SerialExecutionResult {
                            completed,
                            blocked: Some(task_id.clone()),
                        });
                    }
                    Err(e) => return Err(e),
                }
            } else {
                // should_replan or an unrecognised verdict both abort the
                // chain; the caller routes to the Escalation Engine.
                mark_task_as_blocked(store, task_id, current.version, Some(judgement.reason.clone()))?;
                return Ok(SerialExecutionResult {
                    completed,
                    blocked: Some(task_id.clone()),
                });
            }
        }

        if let Some(last_id) = chain.last() {
            let last = store.read_task(last_id)?;
            self.worker.push(&last)?;
        }

        Ok(SerialExecutionResult { completed, blocked: None })
    }

    /// Retry the worker's execution attempt for one task up to
    /// `serial_chain_task_retries` times. Returns `None` once the budget
    /// is exhausted, having already marked the task BLOCKED.
    async fn run_with_continuation(
        &self,
        store: &TaskStore,
        task: &crate::domain::Task,
        worktree_path: &WorktreePath,
        model: &str,
    ) -> Result<Option<(crate::domain::Task, RunId)>> {
        for attempt in 0..self.serial_chain_task_retries.max(1) {
            let run_id = RunId::new(uuid::Uuid::new_v4().to_string());
            let result = self.worker.execute(task, run_id.clone(), worktree_path, model).await?;
            if result.success {
                return Ok(Some((task.clone(), run_id)));
            }
            if attempt + 1 >= self.serial_chain_task_retries.max(1) {
                mark_task_as_blocked(store, &task.id, task.version, Some("worker failed after retries".to_string()))?;
                return Ok(None);
            }
        }
        Ok(None)
    }
}
