//! taskforge CLI.
//!
//! `init`, `status`, `plan <instruction>`, `lead <planFile>`, `resolve
//! <sessionId>`, `cleanup [--execute] [--delete-remote]
//! [--integration-only|--task-only]`. Exit codes: 0 success, 1 usage, 2
//! runtime failure.
//!
//! Grounded on `aivcs-cli::main`'s `Cli`/`Commands` clap-derive shape and
//! its `cmd_*` dispatch functions wrapping domain calls with
//! `anyhow::Context`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tracing::Level;

use taskforge_core::agent_runner::{AgentRequest, AgentResponse, AgentRunner, RunLog};
use taskforge_core::branch_cleanup::{BranchCleanup, CategoryFilter};
use taskforge_core::domain::{LeaderSession, LeaderStatus, PlannerSession};
use taskforge_core::error::TaskforgeError;
use taskforge_core::ids::{RepoPath, SessionId};
use taskforge_core::judge::Judge;
use taskforge_core::orchestrator::Orchestrator;
use taskforge_core::planner_ops::{Planner, PlannerConfig};
use taskforge_core::planning_ops::{PlanningOps, PlanningOpsConfig};
use taskforge_core::store::{Stores, TaskStore};
use taskforge_core::vcs::GitVcsAdapter;
use taskforge_core::worker::Worker;
use taskforge_core::TaskforgeConfig;

#[derive(Parser)]
#[command(name = "taskforge")]
#[command(author = "Taskforge Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Multi-agent software-development orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose (debug-level) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Coordination root directory (task store, sessions, run logs)
    #[arg(long, global = true, default_value = ".taskforge", env = "TASKFORGE_COORD_ROOT")]
    coord_root: PathBuf,

    /// Coding agent model name
    #[arg(long, global = true, default_value = "claude-agent", env = "SMOKE_TEST_MODEL")]
    model: String,

    /// Agent Runner binary to shell out to for every agent call
    #[arg(long, global = true, default_value = "taskforge-agent", env = "TASKFORGE_AGENT_BIN")]
    agent_bin: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the coordination root's on-disk layout
    Init,

    /// Summarize every task's state
    Status,

    /// Run planning + decomposition for a new instruction, then drive the
    /// Leader loop to completion or the first escalation
    Plan {
        /// Natural-language instruction
        instruction: String,

        /// Repository path the generated tasks operate on
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },

    /// Resume the Leader loop over an existing planner session id
    Lead {
        /// Planner session id whose generated tasks should be driven
        plan_file: String,
    },

    /// Resolve a pending escalation on a Leader session
    Resolve {
        session_id: String,
        #[arg(long)]
        escalation_index: usize,
        #[arg(long)]
        resolution: String,
    },

    /// Detect and optionally delete stale branches
    Cleanup {
        #[arg(long)]
        execute: bool,
        #[arg(long)]
        delete_remote: bool,
        #[arg(long, conflicts_with = "task_only")]
        integration_only: bool,
        #[arg(long, conflicts_with = "integration_only")]
        task_only: bool,
        #[arg(long, default_value = ".")]
        repo: PathBuf,
    },
}

/// Shells to an external agent binary: writes the prompt to stdin, reads
/// stdout as the final response. Grounded on `GitVcsAdapter`'s
/// `Command`-shelling idiom, generalized to an async child process.
struct ProcessAgentRunner {
    binary: String,
}

#[async_trait]
impl AgentRunner for ProcessAgentRunner {
    async fn run_agent(&self, req: AgentRequest) -> taskforge_core::Result<AgentResponse> {
        let mut child = tokio::process::Command::new(&self.binary)
            .arg("--agent-type")
            .arg(&req.agent_type)
            .arg("--model")
            .arg(&req.model)
            .current_dir(&req.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(TaskforgeError::IoError)?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(req.prompt.as_bytes())
                .await
                .map_err(TaskforgeError::IoError)?;
        }

        let output = child.wait_with_output().await.map_err(TaskforgeError::IoError)?;
        if !output.status.success() {
            return Err(TaskforgeError::AgentExecutionError(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(AgentResponse {
            final_response: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            usage: None,
        })
    }
}

fn build_orchestrator(cli: &Cli) -> Result<Orchestrator> {
    let config = TaskforgeConfig::default();
    let runner: Arc<dyn AgentRunner> = Arc::new(ProcessAgentRunner {
        binary: cli.agent_bin.clone(),
    });
    let worker_run_log = RunLog::new(&cli.coord_root).context("failed to initialize run log directory")?;
    let judge_run_log = RunLog::new(&cli.coord_root).context("failed to initialize run log directory")?;
    let worker = Worker::new(Arc::new(GitVcsAdapter::new()), runner.clone(), worker_run_log);
    let judge = Judge::new(runner.clone(), judge_run_log, config.judge_log_budget_bytes, config.judge_log_head_bytes);
    let planner = Arc::new(Planner::new(
        runner.clone(),
        PlannerConfig {
            max_quality_retries: config.max_quality_retries,
            max_consecutive_json_errors: config.max_consecutive_json_errors,
            quality_threshold: config.quality_threshold,
            max_replan_iterations: config.max_replan_iterations,
        },
    ));
    let planning = PlanningOps::new(
        runner,
        PlanningOpsConfig {
            history_limit: config.planning_history_limit,
            enhanced_instruction_char_budget: config.enhanced_instruction_char_budget,
        },
    );
    Ok(Orchestrator::new(worker, judge, planner, planning, config))
}

fn cmd_init(cli: &Cli) -> Result<()> {
    Stores::open(&cli.coord_root).context("failed to initialize coordination root")?;
    println!("initialized {}", cli.coord_root.display());
    Ok(())
}

fn cmd_status(cli: &Cli) -> Result<()> {
    let store = TaskStore::open(&cli.coord_root).context("failed to open task store")?;
    let tasks = store.list_tasks().context("failed to list tasks")?;
    if tasks.is_empty() {
        println!("no tasks");
        return Ok(());
    }
    for task in tasks {
        println!("{}\t{:?}\t{}", task.id, task.state, task.summary.as_deref().unwrap_or(""));
    }
    Ok(())
}

async fn cmd_plan(cli: &Cli, instruction: &str, repo: &PathBuf) -> Result<()> {
    let store = TaskStore::open(&cli.coord_root).context("failed to open task store")?;
    let orchestrator = build_orchestrator(cli).context("failed to build orchestrator")?;

    let repo_path = RepoPath::new(repo.to_string_lossy().into_owned());
    let now = chrono::Utc::now();
    let mut planner_session = PlannerSession::new(Orchestrator::new_session_id(), instruction, now);
    let mut leader_session = LeaderSession::new(Orchestrator::new_session_id(), "plan", 0, now);

    let result = orchestrator
        .run_instruction(&store, &mut planner_session, &mut leader_session, &repo_path, &cli.model)
        .await
        .context("orchestrator run failed")?;

    println!(
        "completed {} task(s), {} escalation(s) pending",
        result.leader_result.completed_task_ids.len(),
        result.leader_result.pending_escalation.is_some() as u8,
    );
    if !result.additional_tasks_suggested.is_empty() {
        println!("additional work suggested:");
        for suggestion in &result.additional_tasks_suggested {
            println!("  - {suggestion}");
        }
    }
    if leader_session.status == LeaderStatus::Escalating {
        anyhow::bail!("session escalated to a human operator: {}", leader_session.session_id);
    }
    Ok(())
}

async fn cmd_lead(cli: &Cli, plan_session_id: &str) -> Result<()> {
    let store = TaskStore::open(&cli.coord_root).context("failed to open task store")?;
    let orchestrator = build_orchestrator(cli).context("failed to build orchestrator")?;
    let tasks = store.list_tasks().context("failed to list tasks")?;
    let mut leader_session = LeaderSession::new(SessionId::new(plan_session_id), plan_session_id, tasks.len() as u32, chrono::Utc::now());
    let result = orchestrator
        .leader
        .run(&store, &mut leader_session, &cli.model)
        .await
        .context("leader execution failed")?;
    println!("completed {} task(s)", result.completed_task_ids.len());
    if leader_session.status == LeaderStatus::Escalating {
        anyhow::bail!("session escalated to a human operator: {}", leader_session.session_id);
    }
    Ok(())
}

fn cmd_resolve(cli: &Cli, session_id: &str, escalation_index: usize, resolution: &str) -> Result<()> {
    let stores = Stores::open(&cli.coord_root).context("failed to open coordination root")?;
    let mut leader_session = stores
        .leader_sessions
        .load(session_id)
        .context("no such leader session")?;
    let limits = TaskforgeConfig::default().escalation_limits;
    let engine = taskforge_core::EscalationEngine::new(&limits);
    {
        let record = leader_session
            .escalation_records
            .get_mut(escalation_index)
            .context("no such escalation on this session")?;
        leader_session.status = engine.resolve_escalation(record, resolution, chrono::Utc::now());
    }
    let status = leader_session.status;
    stores
        .leader_sessions
        .save(leader_session)
        .context("failed to persist resolved session")?;
    println!("session {session_id} resumed as {status:?}");
    Ok(())
}

fn cmd_cleanup(execute: bool, delete_remote: bool, integration_only: bool, task_only: bool, repo: &PathBuf) -> Result<()> {
    let filter = if integration_only {
        CategoryFilter::IntegrationOnly
    } else if task_only {
        CategoryFilter::TaskOnly
    } else {
        CategoryFilter::All
    };
    let cleanup = BranchCleanup::new(Arc::new(GitVcsAdapter::new()));
    let repo_path = RepoPath::new(repo.to_string_lossy().into_owned());
    let report = cleanup.run(&repo_path, filter, execute, delete_remote).context("branch cleanup failed")?;

    for candidate in &report.candidates {
        println!("{:?}\tmerged={}\t{}", candidate.category, candidate.merged, candidate.branch);
    }
    if execute {
        println!("deleted {} branch(es), {} remote(s)", report.deleted.len(), report.remote_deleted.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    taskforge_core::telemetry::init_tracing(cli.json, if cli.verbose { Level::DEBUG } else { Level::INFO });

    let result: Result<()> = match &cli.command {
        Commands::Init => cmd_init(&cli),
        Commands::Status => cmd_status(&cli),
        Commands::Plan { instruction, repo } => cmd_plan(&cli, instruction, repo).await,
        Commands::Lead { plan_file } => cmd_lead(&cli, plan_file).await,
        Commands::Resolve {
            session_id,
            escalation_index,
            resolution,
        } => cmd_resolve(&cli, session_id, *escalation_index, resolution),
        Commands::Cleanup {
            execute,
            delete_remote,
            integration_only,
            task_only,
            repo,
        } => cmd_cleanup(*execute, *delete_remote, *integration_only, *task_only, repo),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "taskforge command failed");
        eprintln!("error: {err:#}");
        std::process::exit(2);
    }
}
