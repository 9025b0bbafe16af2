//! Persistence layer: the Task Store and the per-family Session Stores.
//!
//! All records live under a single `<coord>/` root as one JSON file per
//! record, written atomically (write-to-temp + rename). The Task Store
//! additionally exposes `update_task_cas`, gated by a per-task directory
//! lock.

pub mod json_file_store;
pub mod session_store;
pub mod task_store;

pub use json_file_store::{DirLock, JsonFileStore};
pub use session_store::SessionStore;
pub use task_store::TaskStore;

use crate::domain::{ExplorationSession, LeaderSession, PlannerSession, PlanningSession};
use crate::error::Result;
use std::path::Path;

/// All stores rooted under one `<coord>/` directory, matching the
/// persistent layout in spec.md §6.
pub struct Stores {
    pub tasks: TaskStore,
    pub planning_sessions: SessionStore<PlanningSession>,
    pub planner_sessions: SessionStore<PlannerSession>,
    pub leader_sessions: SessionStore<LeaderSession>,
    pub exploration_sessions: SessionStore<ExplorationSession>,
}

impl Stores {
    pub fn open(coord_root: impl AsRef<Path>) -> Result<Self> {
        let root = coord_root.as_ref();
        Ok(Self {
            tasks: TaskStore::open(root)?,
            planning_sessions: SessionStore::new(root.join("planning-sessions"))?,
            planner_sessions: SessionStore::new(root.join("planner-sessions"))?,
            leader_sessions: SessionStore::new(root.join("leader-sessions"))?,
            exploration_sessions: SessionStore::new(root.join("exploration-sessions"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_stores_creates_the_expected_layout() {
        let dir = tempfile::tempdir().unwrap();
        let _stores = Stores::open(dir.path()).unwrap();
        for sub in [
            "tasks",
            "runs",
            "checks",
            "planning-sessions",
            "planner-sessions",
            "leader-sessions",
            "exploration-sessions",
        ] {
            assert!(dir.path().join(sub).is_dir(), "missing {sub}");
        }
    }
}
