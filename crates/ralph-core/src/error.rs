//! Error types shared across the orchestrator core.
//!
//! [`RalphError`] is the unified error type for board, scheduler, lifecycle,
//! pipeline, conflict-queue, and resume-controller operations. Each variant
//! is designed to be self-contained: a caller (or an agent reading a surfaced
//! error) should understand what happened and what to do next without
//! additional context.

use std::fmt;
use std::path::PathBuf;

/// Unified error type for `ralph-core` operations.
#[derive(Debug)]
pub enum RalphError {
    /// The kanban board file does not exist.
    BoardNotFound {
        /// Path that was searched.
        path: PathBuf,
    },

    /// A task block in the board is malformed (missing a required field,
    /// a status character outside the known set, etc).
    MalformedTask {
        /// Best-effort task ID (may be empty if the ID itself couldn't be parsed).
        id: String,
        /// What was wrong.
        reason: String,
    },

    /// Two tasks in the board share the same ID.
    DuplicateTaskId {
        /// The duplicated ID.
        id: String,
    },

    /// A task declares a dependency on an ID that doesn't exist in the board.
    BadDependency {
        /// The task declaring the dependency.
        id: String,
        /// The missing dependency ID.
        dependency: String,
    },

    /// The dependency graph contains a cycle.
    Cycle {
        /// The IDs participating in the cycle, in traversal order.
        ids: Vec<String>,
    },

    /// `setStatus` was called for a task ID that isn't in the board.
    TaskNotFound {
        /// The ID that was looked up.
        id: String,
    },

    /// A lifecycle spec failed the loader's structural validation (§3, §4.C).
    InvalidLifecycleSpec {
        /// Human-readable description of the violated invariant.
        reason: String,
    },

    /// A pipeline config references a step ID that doesn't exist (a `jump:`
    /// target, a `depends_on`, or a fix step self-reference).
    InvalidPipelineConfig {
        /// Human-readable description of the violated invariant.
        reason: String,
    },

    /// A file lock could not be acquired within the configured bound.
    LockTimeout {
        /// Path to the file that could not be locked.
        path: PathBuf,
    },

    /// A config or state file could not be parsed as JSON.
    Json {
        /// Path to the offending file.
        path: PathBuf,
        /// The underlying parse error, rendered.
        detail: String,
    },

    /// An I/O error occurred.
    Io(std::io::Error),

    /// A git operation failed (worktree setup, commit, diff).
    Git {
        /// What was being attempted.
        operation: String,
        /// The underlying git error, rendered.
        detail: String,
    },
}

impl fmt::Display for RalphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BoardNotFound { path } => write!(f, "board not found at {}", path.display()),
            Self::MalformedTask { id, reason } => {
                write!(f, "malformed task '{id}': {reason}")
            }
            Self::DuplicateTaskId { id } => write!(f, "duplicate task ID '{id}'"),
            Self::BadDependency { id, dependency } => {
                write!(f, "task '{id}' depends on unknown task '{dependency}'")
            }
            Self::Cycle { ids } => write!(f, "dependency cycle: {}", ids.join(" -> ")),
            Self::TaskNotFound { id } => write!(f, "task '{id}' not found"),
            Self::InvalidLifecycleSpec { reason } => {
                write!(f, "invalid lifecycle spec: {reason}")
            }
            Self::InvalidPipelineConfig { reason } => {
                write!(f, "invalid pipeline config: {reason}")
            }
            Self::LockTimeout { path } => {
                write!(f, "timed out acquiring lock on {}", path.display())
            }
            Self::Json { path, detail } => {
                write!(f, "failed to parse {}: {detail}", path.display())
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Git { operation, detail } => write!(f, "git {operation} failed: {detail}"),
        }
    }
}

impl std::error::Error for RalphError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RalphError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Alias used throughout `ralph-core`.
pub type Result<T> = std::result::Result<T, RalphError>;
