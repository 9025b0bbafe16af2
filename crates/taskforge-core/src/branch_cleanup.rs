//! Branch Cleanup: classify branches against protection rules and delete
//! the ones that are safe to remove.
//!
//! Grounded on `aivcs-core::git`'s `Command`-shelling idiom for the VCS
//! side, and on `aivcs-cli::main`'s pure render/classify helper shape for
//! `classify_branch` — a function with no I/O, unit-tested on its own.

use std::sync::Arc;

use crate::error::Result;
use crate::ids::{BranchName, RepoPath};
use crate::vcs::VcsAdapter;

const PROTECTED_EXACT: &[&str] = &["main", "master", "develop", "development", "production", "staging"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCategory {
    Protected,
    Integration,
    Task,
    Other,
}

/// Classify a branch name against the protection rules: exact protected
/// names, the `release|hotfix` regex, then integration/task/other.
pub fn classify_branch(name: &str) -> BranchCategory {
    if PROTECTED_EXACT.contains(&name) || is_release_or_hotfix(name) {
        return BranchCategory::Protected;
    }
    if name.starts_with("integration/") {
        return BranchCategory::Integration;
    }
    if is_task_branch(name) {
        return BranchCategory::Task;
    }
    BranchCategory::Other
}

fn is_release_or_hotfix(name: &str) -> bool {
    let Some((prefix, rest)) = name.split_once('/') else {
        return false;
    };
    (prefix == "release" || prefix == "hotfix") && !rest.is_empty()
}

/// `^[a-z]+-[a-zA-Z0-9]{8,}$` — a lowercase-letters prefix, a dash, then
/// at least 8 alphanumeric characters, e.g. `task-a1b2c3d4e5`.
fn is_task_branch(name: &str) -> bool {
    let Some((prefix, suffix)) = name.split_once('-') else {
        return false;
    };
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_lowercase()) {
        return false;
    }
    suffix.len() >= 8 && suffix.chars().all(|c| c.is_ascii_alphanumeric())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryFilter {
    All,
    IntegrationOnly,
    TaskOnly,
}

#[derive(Debug, Clone)]
pub struct CleanupCandidate {
    pub branch: BranchName,
    pub category: BranchCategory,
    pub merged: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    pub candidates: Vec<CleanupCandidate>,
    pub deleted: Vec<BranchName>,
    pub remote_deleted: Vec<BranchName>,
}

pub struct BranchCleanup {
    vcs: Arc<dyn VcsAdapter>,
}

impl BranchCleanup {
    pub fn new(vcs: Arc<dyn VcsAdapter>) -> Self {
        Self { vcs }
    }

    /// List every deletable branch (not PROTECTED, not the current branch)
    /// matching `filter`, with its merged-state against the current
    /// branch. When `execute` is false this is the whole operation
    /// (listing only); when true, matching branches are deleted — force
    /// if not merged — and, if `delete_remote`, also deleted on `origin`.
    pub fn run(&self, repo: &RepoPath, filter: CategoryFilter, execute: bool, delete_remote: bool) -> Result<CleanupReport> {
        let current = self.vcs.get_current_branch(repo)?;
        let all_branches = self.vcs.list_branches(repo)?;

        let mut report = CleanupReport::default();
        for branch in all_branches {
            if branch == current {
                continue;
            }
            let category = classify_branch(branch.as_str());
            if category == BranchCategory::Protected {
                continue;
            }
            if !matches_filter(category, &filter) {
                continue;
            }
            let merged = self.vcs.is_merged(repo, &branch, &current)?;
            report.candidates.push(CleanupCandidate {
                branch: branch.clone(),
                category,
                merged,
            });
        }

        if !execute {
            return Ok(report);
        }

        for candidate in &report.candidates {
            self.vcs.delete_branch(repo, &candidate.branch, !candidate.merged)?;
            report.deleted.push(candidate.branch.clone());
            if delete_remote {
                self.vcs.raw(repo, &["push", "origin", "--delete", candidate.branch.as_str()])?;
                report.remote_deleted.push(candidate.branch.clone());
            }
        }

        Ok(report)
    }
}

fn matches_filter(category: BranchCategory, filter: &CategoryFilter) -> bool {
    match filter {
        CategoryFilter::All => true,
        CategoryFilter::IntegrationOnly => category == BranchCategory::Integration,
        CategoryFilter::TaskOnly => category == BranchCategory::Task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_protected_names_are_protected() {
        for name in PROTECTED_EXACT {
            assert_eq!(classify_branch(name), BranchCategory::Protected);
        }
    }

    #[test]
    fn release_and_hotfix_prefixes_are_protected() {
        assert_eq!(classify_branch("release/1.2.0"), BranchCategory::Protected);
        assert_eq!(classify_branch("hotfix/urgent-fix"), BranchCategory::Protected);
        assert_eq!(classify_branch("release/"), BranchCategory::Other);
    }

    #[test]
    fn integration_branches_are_classified() {
        assert_eq!(classify_branch("integration/feature-x"), BranchCategory::Integration);
    }

    #[test]
    fn task_branches_match_the_id_pattern() {
        assert_eq!(classify_branch("task-a1b2c3d4e5"), BranchCategory::Task);
        assert_eq!(classify_branch("fix-deadbeef01"), BranchCategory::Task);
        assert_eq!(classify_branch("task-short"), BranchCategory::Other);
        assert_eq!(classify_branch("Task-a1b2c3d4e5"), BranchCategory::Other);
    }

    #[test]
    fn anything_else_is_other() {
        assert_eq!(classify_branch("wip/experiment"), BranchCategory::Other);
    }

    #[test]
    fn listing_mode_never_deletes() {
        use crate::vcs::GitVcsAdapter;
        let dir = tempfile::tempdir().unwrap();
        let run_git = |args: &[&str]| {
            std::process::Command::new("git").args(args).current_dir(dir.path()).output().unwrap();
        };
        run_git(&["init", "-b", "main"]);
        run_git(&["config", "user.name", "t"]);
        run_git(&["config", "user.email", "t@example.com"]);
        run_git(&["commit", "--allow-empty", "-m", "init"]);
        run_git(&["branch", "task-a1b2c3d4e5"]);

        let repo = RepoPath::new(dir.path().to_str().unwrap());
        let cleanup = BranchCleanup::new(Arc::new(GitVcsAdapter::new()));
        let report = cleanup.run(&repo, CategoryFilter::All, false, false).unwrap();
        assert_eq!(report.candidates.len(), 1);
        assert!(report.deleted.is_empty());

        let branches_after = GitVcsAdapter::new().list_branches(&repo).unwrap();
        assert!(branches_after.iter().any(|b| b.as_str() == "task-a1b2c3d4e5"));
    }

    #[test]
    fn current_branch_is_never_a_candidate() {
        use crate::vcs::GitVcsAdapter;
        let dir = tempfile::tempdir().unwrap();
        let run_git = |args: &[&str]| {
            std::process::Command::new("git").args(args).current_dir(dir.path()).output().unwrap();
        };
        run_git(&["init", "-b", "task-a1b2c3d4e5"]);
        run_git(&["config", "user.name", "t"]);
        run_git(&["config", "user.email", "t@example.com"]);
        run_git(&["commit", "--allow-empty", "-m", "init"]);

        let repo = RepoPath::new(dir.path().to_str().unwrap());
        let cleanup = BranchCleanup::new(Arc::new(GitVcsAdapter::new()));
        let report = cleanup.run(&repo, CategoryFilter::All, false, false).unwrap();
        assert!(report.candidates.is_empty());
    }
}
