//! The Agent Runner contract: an out-of-scope oracle that, given a prompt,
//! working directory and model name, produces a text response and a run
//! log. This module defines the trait boundary plus the run-log/metadata
//! persistence operations named in spec.md §6, and a scripted in-memory
//! double for deterministic tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::domain::Run;
use crate::error::{Result, TaskforgeError};
use crate::ids::RunId;

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub agent_type: String,
    pub model: String,
    pub prompt: String,
    pub cwd: PathBuf,
    pub run_id: Option<RunId>,
}

#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub final_response: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Copy)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// The out-of-scope collaborator: given a prompt, working directory and
/// model name, produce a text response.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run_agent(&self, req: AgentRequest) -> Result<AgentResponse>;
}

/// Log and metadata persistence for runs, under `<coord>/runs/`.
pub struct RunLog {
    runs_dir: PathBuf,
}

impl RunLog {
    pub fn new(coord_root: impl AsRef<Path>) -> Result<Self> {
        let runs_dir = coord_root.as_ref().join("runs");
        fs::create_dir_all(&runs_dir)?;
        Ok(Self { runs_dir })
    }

    pub fn ensure_runs_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.runs_dir)?;
        Ok(())
    }

    fn log_path(&self, run_id: &RunId) -> PathBuf {
        self.runs_dir.join(format!("{run_id}.log"))
    }

    fn metadata_path(&self, run_id: &RunId) -> PathBuf {
        self.runs_dir.join(format!("{run_id}.json"))
    }

    pub fn initialize_log_file(&self, run_id: &RunId) -> Result<()> {
        fs::write(self.log_path(run_id), b"")?;
        Ok(())
    }

    pub fn append_log(&self, run_id: &RunId, text: &str) -> Result<()> {
        use std::io::Write;
        let mut f = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.log_path(run_id))?;
        f.write_all(text.as_bytes())?;
        Ok(())
    }

    pub fn read_log(&self, run_id: &RunId) -> Result<String> {
        let bytes = fs::read(self.log_path(run_id)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TaskforgeError::NotFound(run_id.to_string())
            } else {
                TaskforgeError::IoError(e)
            }
        })?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn save_run_metadata(&self, run: &Run) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(run)?;
        fs::write(self.metadata_path(&run.id), bytes)?;
        Ok(())
    }

    pub fn load_run_metadata(&self, run_id: &RunId) -> Result<Run> {
        let bytes = fs::read(self.metadata_path(run_id)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TaskforgeError::NotFound(run_id.to_string())
            } else {
                TaskforgeError::IoError(e)
            }
        })?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TaskforgeError::ValidationError(format!("run {run_id}: {e}")))
    }

    pub fn list_run_logs(&self) -> Result<Vec<RunId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.runs_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("log") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(RunId::new(stem));
                }
            }
        }
        Ok(ids)
    }
}

/// A scripted runner that replays a queue of canned responses per call,
/// for deterministic unit and scenario tests — the in-memory-double idiom
/// used throughout the reference corpus instead of a live network call in
/// tests.
pub struct ScriptedAgentRunner {
    queue: Mutex<VecDeque<Result<AgentResponse>>>,
}

impl ScriptedAgentRunner {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.queue.lock().unwrap().push_back(Ok(AgentResponse {
            final_response: text.into(),
            usage: None,
        }));
    }

    pub fn push_error(&self, err: TaskforgeError) {
        self.queue.lock().unwrap().push_back(Err(err));
    }
}

impl Default for ScriptedAgentRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRunner for ScriptedAgentRunner {
    async fn run_agent(&self, _req: AgentRequest) -> Result<AgentResponse> {
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(AgentResponse {
                final_response: String::new(),
                usage: None,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::ids::TaskId;

    #[tokio::test]
    async fn scripted_runner_replays_in_order() {
        let runner = ScriptedAgentRunner::new();
        runner.push_text("first");
        runner.push_text("second");
        let req = AgentRequest {
            agent_type: "coder".into(),
            model: "test-model".into(),
            prompt: "do it".into(),
            cwd: PathBuf::from("/tmp"),
            run_id: None,
        };
        let r1 = runner.run_agent(req.clone()).await.unwrap();
        assert_eq!(r1.final_response, "first");
        let r2 = runner.run_agent(req).await.unwrap();
        assert_eq!(r2.final_response, "second");
    }

    #[test]
    fn run_log_initialize_then_append_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::new(dir.path()).unwrap();
        let run_id = RunId::new("run-1");
        log.initialize_log_file(&run_id).unwrap();
        log.append_log(&run_id, "line one\n").unwrap();
        log.append_log(&run_id, "line two\n").unwrap();
        let content = log.read_log(&run_id).unwrap();
        assert_eq!(content, "line one\nline two\n");
    }

    #[test]
    fn run_metadata_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::new(dir.path()).unwrap();
        let run = Run::start(
            RunId::new("run-1"),
            TaskId::new("task-1"),
            "coder",
            "model-x",
            "runs/run-1.log",
            Utc::now(),
        );
        log.save_run_metadata(&run).unwrap();
        let back = log.load_run_metadata(&run.id).unwrap();
        assert_eq!(back.id, run.id);
    }

    #[test]
    fn list_run_logs_finds_every_initialized_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = RunLog::new(dir.path()).unwrap();
        log.initialize_log_file(&RunId::new("run-1")).unwrap();
        log.initialize_log_file(&RunId::new("run-2")).unwrap();
        let mut ids: Vec<String> = log.list_run_logs().unwrap().iter().map(|r| r.to_string()).collect();
        ids.sort();
        assert_eq!(ids, vec!["run-1".to_string(), "run-2".to_string()]);
    }
}
