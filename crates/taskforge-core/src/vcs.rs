//! The VCS adapter contract: worktree create/remove, branch create/
//! checkout/delete/list, merged-branch query, current-branch, commit,
//! push. Out of scope per spec.md §1 (a collaborator), specified only by
//! this interface; `GitVcsAdapter` shells to the `git` binary exactly as
//! `aivcs-core::git::capture_head_sha`/`is_git_repo` do.

use async_trait::async_trait;
use std::path::Path;
use std::process::Command;

use crate::error::{Result, TaskforgeError};
use crate::ids::{BranchName, RepoPath, WorktreePath};

#[async_trait]
pub trait VcsAdapter: Send + Sync {
    fn get_current_branch(&self, repo: &RepoPath) -> Result<BranchName>;
    fn list_branches(&self, repo: &RepoPath) -> Result<Vec<BranchName>>;
    fn create_worktree(&self, repo: &RepoPath, path: &WorktreePath, branch: &BranchName) -> Result<()>;
    fn remove_worktree(&self, repo: &RepoPath, path: &WorktreePath) -> Result<()>;
    fn branch_exists(&self, repo: &RepoPath, branch: &BranchName) -> Result<bool>;
    fn create_branch(&self, repo: &RepoPath, branch: &BranchName) -> Result<()>;
    fn checkout_branch(&self, repo: &RepoPath, branch: &BranchName) -> Result<()>;
    fn delete_branch(&self, repo: &RepoPath, branch: &BranchName, force: bool) -> Result<()>;
    /// Stage and commit every change in `worktree`; `Ok(None)` if there
    /// was nothing to commit — that is not an error.
    fn commit_changes(&self, worktree: &WorktreePath, message: &str) -> Result<Option<String>>;
    fn push_branch(&self, repo: &RepoPath, branch: &BranchName, remote: &str) -> Result<()>;
    fn merge_branch(&self, repo: &RepoPath, target: &BranchName, source: &BranchName) -> Result<()>;
    fn is_merged(&self, repo: &RepoPath, branch: &BranchName, into: &BranchName) -> Result<bool>;
    fn raw(&self, repo: &RepoPath, args: &[&str]) -> Result<String>;
}

/// Shells to the `git` binary via `std::process::Command`.
pub struct GitVcsAdapter;

impl GitVcsAdapter {
    pub fn new() -> Self {
        Self
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(TaskforgeError::IoError)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TaskforgeError::AgentExecutionError(format!(
                "git {args:?} failed: {stderr}"
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for GitVcsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VcsAdapter for GitVcsAdapter {
    fn get_current_branch(&self, repo: &RepoPath) -> Result<BranchName> {
        let out = self.run(Path::new(repo.as_str()), &["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(BranchName::new(out))
    }

    fn list_branches(&self, repo: &RepoPath) -> Result<Vec<BranchName>> {
        let out = self.run(
            Path::new(repo.as_str()),
            &["for-each-ref", "--format=%(refname:short)", "refs/heads/"],
        )?;
        Ok(out.lines().map(BranchName::new).collect())
    }

    fn create_worktree(&self, repo: &RepoPath, path: &WorktreePath, branch: &BranchName) -> Result<()> {
        self.run(
            Path::new(repo.as_str()),
            &["worktree", "add", "-B", branch.as_str(), path.as_str()],
        )?;
        Ok(())
    }

    fn remove_worktree(&self, repo: &RepoPath, path: &WorktreePath) -> Result<()> {
        self.run(Path::new(repo.as_str()), &["worktree", "remove", "--force", path.as_str()])?;
        Ok(())
    }

    fn branch_exists(&self, repo: &RepoPath, branch: &BranchName) -> Result<bool> {
        let ref_name = format!("refs/heads/{}", branch.as_str());
        Ok(Command::new("git")
            .args(["show-ref", "--verify", "--quiet", &ref_name])
            .current_dir(Path::new(repo.as_str()))
            .status()
            .map(|s| s.success())
            .unwrap_or(false))
    }

    fn create_branch(&self, repo: &RepoPath, branch: &BranchName) -> Result<()> {
        self.run(Path::new(repo.as_str()), &["branch", branch.as_str()])?;
        Ok(())
    }

    fn checkout_branch(&self, repo: &RepoPath, branch: &BranchName) -> Result<()> {
        self.run(Path::new(repo.as_str()), &["checkout", branch.as_str()])?;
        Ok(())
    }

    fn delete_branch(&self, repo: &RepoPath, branch: &BranchName, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        self.run(Path::new(repo.as_str()), &["branch", flag, branch.as_str()])?;
        Ok(())
    }

    fn commit_changes(&self, worktree: &WorktreePath, message: &str) -> Result<Option<String>> {
        let dir = Path::new(worktree.as_str());
        self.run(dir, &["add", "-A"])?;
        let status = self.run(dir, &["status", "--porcelain"])?;
        if status.trim().is_empty() {
            return Ok(None);
        }
        self.run(dir, &["commit", "-m", message])?;
        let sha = self.run(dir, &["rev-parse", "HEAD"])?;
        Ok(Some(sha))
    }

    fn push_branch(&self, repo: &RepoPath, branch: &BranchName, remote: &str) -> Result<()> {
        self.run(Path::new(repo.as_str()), &["push", remote, branch.as_str()])?;
        Ok(())
    }

    fn merge_branch(&self, repo: &RepoPath, target: &BranchName, source: &BranchName) -> Result<()> {
        let dir = Path::new(repo.as_str());
        self.run(dir, &["checkout", target.as_str()])?;
        self.run(dir, &["merge", "--no-ff", source.as_str()])?;
        Ok(())
    }

    fn is_merged(&self, repo: &RepoPath, branch: &BranchName, into: &BranchName) -> Result<bool> {
        let out = self.run(
            Path::new(repo.as_str()),
            &["branch", "--merged", into.as_str()],
        )?;
        Ok(out.lines().any(|l| l.trim_start_matches("* ").trim() == branch.as_str()))
    }

    fn raw(&self, repo: &RepoPath, args: &[&str]) -> Result<String> {
        self.run(Path::new(repo.as_str()), args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_git(dir: &Path, args: &[&str]) {
        let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
        assert!(output.status.success(), "git {:?} failed", args);
    }

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "-b", "main"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }

    #[test]
    fn current_branch_is_main_after_init() {
        let repo = make_git_repo();
        let adapter = GitVcsAdapter::new();
        let branch = adapter
            .get_current_branch(&RepoPath::new(repo.path().to_str().unwrap()))
            .unwrap();
        assert_eq!(branch.as_str(), "main");
    }

    #[test]
    fn create_and_check_branch_existence() {
        let repo = make_git_repo();
        let adapter = GitVcsAdapter::new();
        let repo_path = RepoPath::new(repo.path().to_str().unwrap());
        let branch = BranchName::new("feature/x");
        assert!(!adapter.branch_exists(&repo_path, &branch).unwrap());
        adapter.create_branch(&repo_path, &branch).unwrap();
        assert!(adapter.branch_exists(&repo_path, &branch).unwrap());
    }

    #[test]
    fn commit_changes_is_none_when_nothing_changed() {
        let repo = make_git_repo();
        let adapter = GitVcsAdapter::new();
        let worktree = WorktreePath::new(repo.path().to_str().unwrap());
        let result = adapter.commit_changes(&worktree, "no-op commit").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn commit_changes_creates_a_commit_when_files_changed() {
        let repo = make_git_repo();
        std::fs::write(repo.path().join("a.txt"), b"hello").unwrap();
        let adapter = GitVcsAdapter::new();
        let worktree = WorktreePath::new(repo.path().to_str().unwrap());
        let result = adapter.commit_changes(&worktree, "add a.txt").unwrap();
        assert!(result.is_some());
    }
}
