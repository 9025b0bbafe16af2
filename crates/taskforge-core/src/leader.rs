//! Leader Execution Loop: drives ready tasks through Worker + Judge and
//! routes judgements to continuation, replanning, or escalation.
//!
//! Grounded on `aivcs-ci::pipeline::CiPipeline::run`'s iterate-stages-
//! with-per-stage-event-recording loop shape.

use std::sync::Arc;

use chrono::Utc;

use crate::config::TaskforgeConfig;
use crate::dependency::DependencyGraph;
use crate::domain::sessions::MemberTaskEvent;
use crate::domain::{EscalationRecord, LeaderSession, LeaderStatus, TaskState};
use crate::escalation_engine::{apply_planner_replan, EscalationEngine};
use crate::error::Result;
use crate::ids::{RunId, TaskId, WorkerId, WorktreePath};
use crate::judge::{mark_task_as_blocked, mark_task_as_completed, mark_task_as_skipped, mark_task_for_continuation, Judge};
use crate::loop_detector::{LoopDetector, LoopDetectorConfig};
use crate::obs;
use crate::planner_ops::{check_replan_budget, session_short, Planner};
use crate::store::TaskStore;
use crate::worker::Worker;

pub struct LeaderRunResult {
    pub completed_task_ids: Vec<TaskId>,
    pub failed_task_ids: Vec<TaskId>,
    pub pending_escalation: Option<EscalationRecord>,
}

pub struct LeaderLoop {
    pub worker: Worker,
    pub judge: Judge,
    pub planner: Arc<Planner>,
    pub config: TaskforgeConfig,
}

impl LeaderLoop {
    pub fn new(worker: Worker, judge: Judge, planner: Arc<Planner>, config: TaskforgeConfig) -> Self {
        Self {
            worker,
            judge,
            planner,
            config,
        }
    }

    /// Procedure exactly as in spec.md §4.J, with a hard iteration wall
    /// (`config.leader_max_iterations`, default 1000) guarding against
    /// infinite loops.
    pub async fn run(&self, store: &TaskStore, session: &mut LeaderSession, model: &str) -> Result<LeaderRunResult> {
        session.status = LeaderStatus::Executing;
        session.updated_at = Utc::now();

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        let mut loop_detector = LoopDetector::new(LoopDetectorConfig {
            similarity_threshold: self.config.similarity_threshold,
            ..Default::default()
        });
        let engine = EscalationEngine::new(&self.config.escalation_limits);

        for _iteration in 0..self.config.leader_max_iterations {
            let tasks = store.list_tasks()?;
            if tasks.iter().all(|t| t.state.is_terminal()) {
                session.status = LeaderStatus::Completed;
                session.completed_task_count = completed.len() as u32;
                break;
            }

            let graph = DependencyGraph::from_tasks(&tasks);
            let ready = graph.ready_set(&tasks);
            if ready.is_empty() {
                session.status = LeaderStatus::Reviewing;
                break;
            }

            let task_id = ready[0].clone();
            loop_detector.record_step_execution("leader_iteration");

            let task = store.read_task(&task_id)?;
            let worker_id = WorkerId::new(uuid::Uuid::new_v4().to_string());
            let claimed = match store.update_task_cas(&task_id, task.version, |t| {
                t.state = TaskState::Running;
                t.owner = Some(worker_id.clone());
            }) {
                Ok(t) => t,
                Err(crate::error::TaskforgeError::VersionConflict { .. }) => continue,
                Err(e) => return Err(e),
            };
            obs::emit_task_state_changed(&task_id, "READY", "RUNNING");
            session.active_task_ids.push(task_id.clone());

            let worktree = WorktreePath::new(format!("/tmp/taskforge-worktrees/{task_id}"));
            let run_id = RunId::new(uuid::Uuid::new_v4().to_string());

            self.worker.setup_worktree(&claimed, &worktree, false)?;
            let outcome = self.worker.execute(&claimed, run_id.clone(), &worktree, model).await?;

            if !outcome.success {
                mark_task_as_blocked(store, &task_id, claimed.version, Some("worker execution failed".to_string()))?;
                failed.push(task_id.clone());
                record_event(session, &task_id, "worker_failed");
                continue;
            }
            self.worker.commit(&worktree, &claimed)?;
            self.worker.push(&claimed)?;

            let judgement = self.judge.judge(store, &task_id, &run_id, model).await?;
            let sim_result = loop_detector.record_response("judge", &judgement.reason);
            if !matches!(sim_result, crate::loop_detector::LoopDetectionResult::Ok) {
                tracing::warn!(event = "loop_detector_flag", task_id = %task_id, ?sim_result, "loop detector raised a flag");
            }
            obs::emit_judgement(&task_id, judgement.success, judgement.should_continue, judgement.should_replan);

            let current = store.read_task(&task_id)?;
            if judgement.already_satisfied {
                mark_task_as_skipped(store, &task_id, current.version)?;
                record_event(session, &task_id, "skipped");
            } else if judgement.success {
                mark_task_as_completed(store, &task_id, current.version)?;
                completed.push(task_id.clone());
                record_event(session, &task_id, "completed");
            } else if judgement.should_continue {
                match mark_task_for_continuation(store, &task_id, current.version, &judgement, self.config.judgement_max_iterations) {
                    Ok(_) => record_event(session, &task_id, "continuation"),
                    Err(crate::error::TaskforgeError::MaxRetriesExceeded { .. }) => {
                        mark_task_as_blocked(store, &task_id, current.version, Some("max continuation retries exceeded".to_string()))?;
                        failed.push(task_id.clone());
                        record_event(session, &task_id, "blocked_max_retries");
                    }
                    Err(e) => return Err(e),
                }
            } else if judgement.should_replan {
                if check_replan_budget(&current, self.config.max_replan_iterations).is_err() {
                    mark_task_as_blocked(store, &task_id, current.version, Some("max replan iterations exceeded".to_string()))?;
                    failed.push(task_id.clone());
                    record_event(session, &task_id, "blocked_max_replans");
                    continue;
                }
                let prefix = session_short(&session.session_id);
                let log = String::new();
                let replan_result = self
                    .planner
                    .replan_failed_task(&current, &log, judgement.missing_requirements.as_deref().unwrap_or(&[]), &prefix, model)
                    .await
                    .map(|sub_tasks| {
                        sub_tasks
                            .into_iter()
                            .filter_map(|t| store.create_task(t).ok())
                            .map(|t| t.id)
                            .collect::<Vec<TaskId>>()
                    });
                match apply_planner_replan(&engine, store, &mut session.escalation_attempts, &current, replan_result) {
                    Ok(_new_ids) => {
                        session.status = LeaderStatus::Executing;
                        record_event(session, &task_id, "replanned");
                    }
                    Err(reason) => {
                        let record = engine.escalate_user(
                            &mut session.escalation_attempts,
                            Some(task_id.clone()),
                            format!("replan failed: {reason}"),
                            Utc::now(),
                        )?;
                        session.escalation_records.push(record.clone());
                        session.status = LeaderStatus::Escalating;
                        obs::emit_escalation_raised(Some(&task_id), "USER", &record.reason);
                        return Ok(LeaderRunResult {
                            completed_task_ids: completed,
                            failed_task_ids: failed,
                            pending_escalation: Some(record),
                        });
                    }
                }
            } else {
                let record = engine.escalate_user(&mut session.escalation_attempts, Some(task_id.clone()), judgement.reason.clone(), Utc::now())?;
                session.escalation_records.push(record.clone());
                session.status = LeaderStatus::Escalating;
                obs::emit_escalation_raised(Some(&task_id), "USER", &record.reason);
                return Ok(LeaderRunResult {
                    completed_task_ids: completed,
                    failed_task_ids: failed,
                    pending_escalation: Some(record),
                });
            }
        }

        session.updated_at = Utc::now();
        Ok(LeaderRunResult {
            completed_task_ids: completed,
            failed_task_ids: failed,
            pending_escalation: None,
        })
    }
}

fn record_event(session: &mut LeaderSession, task_id: &TaskId, event: &str) {
    session.member_task_history.push(MemberTaskEvent {
        task_id: task_id.clone(),
        event: event.to_string(),
        at: Utc::now(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_runner::{RunLog, ScriptedAgentRunner};
    use crate::domain::TaskType;
    use crate::ids::{BranchName, RepoPath, SessionId};
    use crate::planner_ops::PlannerConfig;
    use crate::vcs::GitVcsAdapter;
    use std::collections::BTreeSet;

    fn make_leader(dir: &std::path::Path, judge_runner: Arc<ScriptedAgentRunner>, worker_runner: Arc<ScriptedAgentRunner>) -> LeaderLoop {
        let vcs = Arc::new(GitVcsAdapter::new());
        let run_log = RunLog::new(dir).unwrap();
        let worker = Worker::new(vcs, worker_runner, RunLog::new(dir).unwrap());
        let judge = Judge::new(judge_runner.clone(), run_log, 150 * 1024, 10 * 1024);
        let planner = Arc::new(Planner::new(
            judge_runner,
            PlannerConfig {
                max_quality_retries: 5,
                max_consecutive_json_errors: 3,
                quality_threshold: 60,
                max_replan_iterations: 3,
            },
        ));
        LeaderLoop::new(worker, judge, planner, TaskforgeConfig::default())
    }

    fn make_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::process::Command::new("git").args(["init", "-b", "main"]).current_dir(dir.path()).output().unwrap();
        std::process::Command::new("git").args(["config", "user.name", "t"]).current_dir(dir.path()).output().unwrap();
        std::process::Command::new("git").args(["config", "user.email", "t@example.com"]).current_dir(dir.path()).output().unwrap();
        std::process::Command::new("git").args(["commit", "--allow-empty", "-m", "init"]).current_dir(dir.path()).output().unwrap();
        dir
    }

    #[tokio::test]
    async fn single_task_happy_path_completes_session() {
        let coord = tempfile::tempdir().unwrap();
        let store = TaskStore::open(coord.path()).unwrap();
        let repo = make_repo();

        let task = crate::domain::Task::new(
            TaskId::new("task-1"),
            RepoPath::new(repo.path().to_str().unwrap()),
            BranchName::new("main"),
            vec![],
            "tests pass",
            "do the thing",
            TaskType::Implementation,
            BTreeSet::new(),
            Utc::now(),
        );
        store.create_task(task).unwrap();

        let worker_runner = Arc::new(ScriptedAgentRunner::new());
        worker_runner.push_text("work done");
        let judge_runner = Arc::new(ScriptedAgentRunner::new());
        judge_runner.push_text(r#"{"success": true, "reason": "looks good"}"#);

        let leader = make_leader(coord.path(), judge_runner, worker_runner);
        let mut session = LeaderSession::new(SessionId::new("lead-1"), "plan.json", 1, Utc::now());

        let result = leader.run(&store, &mut session, "model-x").await.unwrap();
        assert_eq!(result.completed_task_ids, vec![TaskId::new("task-1")]);
        assert_eq!(session.status, LeaderStatus::Completed);
        let stored = store.read_task(&TaskId::new("task-1")).unwrap();
        assert_eq!(stored.state, TaskState::Done);
    }

    #[tokio::test]
    async fn sequential_pair_executes_in_dependency_order() {
        let coord = tempfile::tempdir().unwrap();
        let store = TaskStore::open(coord.path()).unwrap();
        let repo = make_repo();

        let t1 = crate::domain::Task::new(
            TaskId::new("task-1"),
            RepoPath::new(repo.path().to_str().unwrap()),
            BranchName::new("main"),
            vec![],
            "a",
            "c",
            TaskType::Implementation,
            BTreeSet::new(),
            Utc::now(),
        );
        let mut deps = BTreeSet::new();
        deps.insert(TaskId::new("task-1"));
        let t2 = crate::domain::Task::new(
            TaskId::new("task-2"),
            RepoPath::new(repo.path().to_str().unwrap()),
            BranchName::new("main"),
            vec![],
            "a",
            "c",
            TaskType::Implementation,
            deps,
            Utc::now(),
        );
        store.create_task(t1).unwrap();
        store.create_task(t2).unwrap();

        let worker_runner = Arc::new(ScriptedAgentRunner::new());
        worker_runner.push_text("w1");
        worker_runner.push_text("w2");
        let judge_runner = Arc::new(ScriptedAgentRunner::new());
        judge_runner.push_text(r#"{"success": true, "reason": "ok"}"#);
        judge_runner.push_text(r#"{"success": true, "reason": "ok"}"#);

        let leader = make_leader(coord.path(), judge_runner, worker_runner);
        let mut session = LeaderSession::new(SessionId::new("lead-1"), "plan.json", 2, Utc::now());
        let result = leader.run(&store, &mut session, "model-x").await.unwrap();
        assert_eq!(result.completed_task_ids, vec![TaskId::new("task-1"), TaskId::new("task-2")]);
        assert_eq!(session.status, LeaderStatus::Completed);
    }

    #[tokio::test]
    async fn judge_returning_escalate_halts_with_pending_escalation() {
        let coord = tempfile::tempdir().unwrap();
        let store = TaskStore::open(coord.path()).unwrap();
        let repo = make_repo();

        let task = crate::domain::Task::new(
            TaskId::new("task-1"),
            RepoPath::new(repo.path().to_str().unwrap()),
            BranchName::new("main"),
            vec![],
            "a",
            "c",
            TaskType::Implementation,
            BTreeSet::new(),
            Utc::now(),
        );
        store.create_task(task).unwrap();

        let worker_runner = Arc::new(ScriptedAgentRunner::new());
        worker_runner.push_text("w1");
        let judge_runner = Arc::new(ScriptedAgentRunner::new());
        judge_runner.push_text(r#"{"success": false, "reason": "fundamentally unclear acceptance criteria"}"#);

        let leader = make_leader(coord.path(), judge_runner, worker_runner);
        let mut session = LeaderSession::new(SessionId::new("lead-1"), "plan.json", 1, Utc::now());
        let result = leader.run(&store, &mut session, "model-x").await.unwrap();
        assert!(result.pending_escalation.is_some());
        assert_eq!(session.status, LeaderStatus::Escalating);
    }
}
