//! Error types for git operations.
//!
//! [`GitError`] is the single error type returned by all [`GitRepo`](crate::GitRepo) trait
//! methods. It uses rich enum variants so callers can match on specific failure
//! modes (e.g., a worktree that already exists, a dirty worktree) without
//! parsing error messages.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by [`GitRepo`](crate::GitRepo) operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A requested ref, worktree, or commit was not found.
    #[error("not found: {message}")]
    NotFound {
        /// Human-readable description of what was missing.
        message: String,
    },

    /// A worktree with this name/path already exists.
    #[error("worktree already exists at {}", path.display())]
    WorktreeExists {
        /// The path that already has a worktree.
        path: PathBuf,
    },

    /// An operation was refused because the working tree has uncommitted changes.
    #[error("dirty worktree at {}: {message}", path.display())]
    DirtyWorktree {
        /// Path to the worktree root.
        path: PathBuf,
        /// What was dirty (untracked files, staged changes, etc.).
        message: String,
    },

    /// An OID or revision string could not be parsed or resolved.
    #[error("invalid revision `{value}`: {reason}")]
    InvalidRevision {
        /// The raw value that failed validation.
        value: String,
        /// Why validation failed.
        reason: String,
    },

    /// An I/O error occurred (file system, process spawn, etc.).
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The `git` binary exited non-zero.
    ///
    /// This is the catch-all for CLI failures: the command and captured
    /// stderr are preserved so callers can surface an actionable message
    /// (mirrors the orchestrator's `GitError` event payload shape).
    #[error("git {command} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        /// The `git` subcommand invoked (e.g. `"worktree add"`).
        command: String,
        /// The process exit code, or -1 if terminated by a signal.
        exit_code: i32,
        /// Captured stderr, possibly truncated.
        stderr: String,
    },

    /// The `git` binary itself could not be found or spawned.
    #[error("could not spawn git: {0}")]
    SpawnFailed(String),
}
