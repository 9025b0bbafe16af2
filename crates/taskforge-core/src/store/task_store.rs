//! The Task Store: persistent typed records with optimistic CAS and a
//! per-task exclusive lock.

use chrono::Utc;
use std::path::Path;

use crate::domain::{Check, Run, Task};
use crate::error::{Result, TaskforgeError};
use crate::ids::{CheckId, RunId, TaskId};
use crate::store::json_file_store::{DirLock, JsonFileStore};

pub struct TaskStore {
    tasks: JsonFileStore<Task>,
    runs: JsonFileStore<Run>,
    checks: JsonFileStore<Check>,
    locks_root: std::path::PathBuf,
}

impl TaskStore {
    pub fn open(coord_root: impl AsRef<Path>) -> Result<Self> {
        let root = coord_root.as_ref();
        Ok(Self {
            tasks: JsonFileStore::new(root.join("tasks"))?,
            runs: JsonFileStore::new(root.join("runs"))?,
            checks: JsonFileStore::new(root.join("checks"))?,
            locks_root: root.join(".locks"),
        })
    }

    /// Fails `AlreadyExists` if `t.id` is present; otherwise persists `t`
    /// with `version = 0`.
    pub fn create_task(&self, task: Task) -> Result<Task> {
        if self.tasks.exists(task.id.as_str()) {
            return Err(TaskforgeError::AlreadyExists(task.id.to_string()));
        }
        self.tasks.write(task.id.as_str(), &task)?;
        Ok(task)
    }

    pub fn read_task(&self, id: &TaskId) -> Result<Task> {
        self.tasks.read(id.as_str())
    }

    /// Ordering is unspecified.
    pub fn list_tasks(&self) -> Result<Vec<Task>> {
        self.tasks
            .list_ids()?
            .into_iter()
            .map(|id| self.tasks.read(&id))
            .collect()
    }

    /// Terminal-only: callers are responsible for only deleting tasks in a
    /// terminal state.
    pub fn delete_task(&self, id: &TaskId) -> Result<()> {
        self.tasks.delete(id.as_str())
    }

    /// Acquire the per-task lock, read the current record, check
    /// `current.version == expected_version`, apply `mutate`, bump the
    /// version and `updated_at`, persist, release the lock on every exit
    /// path (via `DirLock`'s `Drop`).
    pub fn update_task_cas(
        &self,
        id: &TaskId,
        expected_version: u64,
        mutate: impl FnOnce(&mut Task),
    ) -> Result<Task> {
        let _lock = DirLock::acquire(&self.locks_root, id.as_str())?;
        let mut current = self.tasks.read(id.as_str())?;
        if current.version != expected_version {
            return Err(TaskforgeError::VersionConflict {
                id: id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }
        mutate(&mut current);
        current.version += 1;
        current.updated_at = Utc::now();
        self.tasks.write(id.as_str(), &current)?;
        Ok(current)
    }

    /// Append-only.
    pub fn write_run(&self, run: &Run) -> Result<()> {
        self.runs.write(run.id.as_str(), run)
    }

    pub fn read_run(&self, id: &RunId) -> Result<Run> {
        self.runs.read(id.as_str())
    }

    /// Append-only.
    pub fn write_check(&self, check: &Check) -> Result<()> {
        self.checks.write(check.id.as_str(), check)
    }

    pub fn read_check(&self, id: &CheckId) -> Result<Check> {
        self.checks.read(id.as_str())
    }
}
