//! taskforge-core: the task lifecycle engine for a multi-agent
//! software-development orchestrator — a persistent task store with
//! optimistic concurrency, a dependency-aware scheduler, and the
//! Plan→Work→Judge→Decide control loop with replanning and escalation.

pub mod agent_runner;
pub mod branch_cleanup;
pub mod config;
pub mod dependency;
pub mod domain;
pub mod error;
pub mod escalation_engine;
pub mod ids;
pub mod judge;
pub mod leader;
pub mod loop_detector;
pub mod obs;
pub mod orchestrator;
pub mod planner_ops;
pub mod planning_ops;
pub mod scheduler;
pub mod serial_executor;
pub mod store;
pub mod telemetry;
pub mod vcs;
pub mod worker;

pub use branch_cleanup::{BranchCleanup, BranchCategory, CategoryFilter, CleanupCandidate, CleanupReport};
pub use config::{EscalationLimits, TaskforgeConfig};
pub use error::{Result, TaskforgeError};
pub use escalation_engine::{apply_planner_replan, EscalationEngine, EscalationOutcome};
pub use judge::Judge;
pub use leader::{LeaderLoop, LeaderRunResult};
pub use orchestrator::{Orchestrator, OrchestratorRunResult};
pub use planner_ops::{Planner, PlannerConfig};
pub use planning_ops::{PlanningOps, PlanningOpsConfig};
pub use serial_executor::{SerialExecutionResult, SerialExecutor};
pub use store::{Stores, TaskStore};
pub use vcs::{GitVcsAdapter, VcsAdapter};
pub use worker::{Worker, WorkerOutcome};
