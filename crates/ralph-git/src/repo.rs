//! The [`GitRepo`] trait — the single abstraction boundary between the
//! orchestrator and git.
//!
//! Per the system's scope (the AI coding tool subprocess, git, and VCS
//! hosting CLIs are external collaborators, not part of the core's hardest
//! subsystems), this trait exposes only what the Worker Pool and Pipeline
//! Engine need to isolate a worker in its own workspace and report what it
//! touched: worktree lifecycle, committing, and diffing. Content-level
//! merge, ref transactions, and remote push are deliberately not modeled
//! here — they belong to the external `git`/hosting CLIs, invoked (if at
//! all) by the CLI layer directly.
//!
//! The trait is object-safe so callers can hold `Box<dyn GitRepo>`.
use std::path::Path;

use crate::error::GitError;
use crate::types::{DiffEntry, GitOid, StatusEntry, WorktreeInfo};

/// The git abstraction trait used by the orchestrator core and CLI.
pub trait GitRepo {
    /// Resolve a revision spec (branch name, tag, `HEAD`, short OID, ...) to
    /// a full OID.
    ///
    /// Replaces: `git rev-parse <spec>`.
    fn rev_parse(&self, spec: &str) -> Result<GitOid, GitError>;

    /// Create a new branch named `branch` pointing at `start_point`.
    ///
    /// Replaces: `git branch <branch> <start_point>`.
    fn create_branch(&self, branch: &str, start_point: &str) -> Result<(), GitError>;

    /// Create a linked worktree at `path`, checking out `branch` (which must
    /// already exist, created via [`create_branch`](Self::create_branch)).
    ///
    /// Replaces: `git worktree add <path> <branch>`.
    fn worktree_add(&self, path: &Path, branch: &str) -> Result<(), GitError>;

    /// Remove a linked worktree by its path. `force` passes `--force`,
    /// discarding uncommitted changes (used during crash-recovery cleanup).
    ///
    /// Replaces: `git worktree remove [--force] <path>`.
    fn worktree_remove(&self, path: &Path, force: bool) -> Result<(), GitError>;

    /// List all linked worktrees (not the main one).
    ///
    /// Replaces: `git worktree list --porcelain`.
    fn worktree_list(&self) -> Result<Vec<WorktreeInfo>, GitError>;

    /// Stage every change under `workdir` and commit it there.
    ///
    /// Returns `Ok(None)` if there was nothing to commit (a no-op, not an
    /// error).
    ///
    /// Replaces: `git -C <workdir> add -A && git -C <workdir> commit -m <message>`.
    fn commit_all(&self, workdir: &Path, message: &str) -> Result<Option<GitOid>, GitError>;

    /// Return `true` if `workdir` has uncommitted changes (staged or not).
    ///
    /// Replaces: `git -C <workdir> status --porcelain` (non-empty check).
    fn is_dirty(&self, workdir: &Path) -> Result<bool, GitError>;

    /// Return the working-tree status of `workdir`.
    ///
    /// Replaces: `git -C <workdir> status --porcelain=v1`.
    fn status(&self, workdir: &Path) -> Result<Vec<StatusEntry>, GitError>;

    /// List files changed between `base` and `head` (or, if `head` is
    /// `None`, between `base` and the worktree's current `HEAD`).
    ///
    /// Used by the Conflict Queue (§4.F) to compute each worker's
    /// `changed_files` set.
    ///
    /// Replaces: `git diff --name-status <base> <head>`.
    fn diff_name_status(
        &self,
        workdir: &Path,
        base: &str,
        head: Option<&str>,
    ) -> Result<Vec<DiffEntry>, GitError>;
}
