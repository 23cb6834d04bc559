//! Core value types for the `ralph` git abstraction layer.
//!
//! These types form the vocabulary shared between the [`GitRepo`](crate::GitRepo)
//! trait and its callers. They intentionally contain no process-spawning or
//! CLI-parsing logic — that lives in the backend implementation.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// GitOid
// ---------------------------------------------------------------------------

/// A git object identifier (SHA-1 or SHA-256 hex, accepted as-is from the CLI).
///
/// Stored as the hex string git itself prints — we never need to do
/// byte-level comparison or hashing inside the orchestrator, only pass OIDs
/// back to `git` as revision specs.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GitOid(String);

impl GitOid {
    /// Create a `GitOid` from a hex string, validating its shape.
    ///
    /// # Errors
    /// Returns an error if the string is not 7-64 lowercase hex characters
    /// (short OIDs from `git rev-parse --short` are accepted).
    pub fn new(s: impl Into<String>) -> Result<Self, OidParseError> {
        let s = s.into();
        Self::validate(&s)?;
        Ok(Self(s))
    }

    /// Return the hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(s: &str) -> Result<(), OidParseError> {
        if !(7..=64).contains(&s.len()) {
            return Err(OidParseError {
                value: s.to_owned(),
                reason: format!("expected 7-64 hex characters, got {}", s.len()),
            });
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(OidParseError {
                value: s.to_owned(),
                reason: "must contain only hex characters".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for GitOid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for GitOid {
    type Err = OidParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Error from parsing a string into a [`GitOid`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OidParseError {
    /// The raw value that failed.
    pub value: String,
    /// Why it failed.
    pub reason: String,
}

impl fmt::Display for OidParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid OID {:?}: {}", self.value, self.reason)
    }
}

impl std::error::Error for OidParseError {}

// ---------------------------------------------------------------------------
// ChangeType / DiffEntry
// ---------------------------------------------------------------------------

/// The kind of change a [`DiffEntry`] describes, matching `git diff
/// --name-status` single-letter codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChangeType {
    /// File was added.
    Added,
    /// File was deleted.
    Deleted,
    /// File content was modified.
    Modified,
    /// File was renamed (old path recorded separately by the caller).
    Renamed,
    /// File type changed (e.g. regular file to symlink).
    TypeChanged,
    /// Any other / unrecognized status code.
    Other,
}

impl ChangeType {
    /// Parse a single `git diff --name-status` status letter (the first
    /// byte of e.g. `"R100"`).
    #[must_use]
    pub fn from_status_byte(b: u8) -> Self {
        match b {
            b'A' => Self::Added,
            b'D' => Self::Deleted,
            b'M' => Self::Modified,
            b'R' => Self::Renamed,
            b'T' => Self::TypeChanged,
            _ => Self::Other,
        }
    }
}

/// One entry in a tree/commit diff.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffEntry {
    /// The path, relative to the repository root.
    pub path: String,
    /// What kind of change this is.
    pub change: ChangeType,
}

// ---------------------------------------------------------------------------
// WorktreeInfo
// ---------------------------------------------------------------------------

/// Metadata about one linked worktree, as reported by `git worktree list`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// Absolute path to the worktree's working directory.
    pub path: PathBuf,
    /// The commit currently checked out (`None` for an unborn worktree).
    pub head: Option<GitOid>,
    /// The branch checked out, if any (worktrees may be in detached-HEAD state).
    pub branch: Option<String>,
    /// `true` if git reports this worktree as administratively locked.
    pub locked: bool,
}

// ---------------------------------------------------------------------------
// StatusEntry
// ---------------------------------------------------------------------------

/// One entry from `git status --porcelain=v1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEntry {
    /// The path, relative to the repository root.
    pub path: String,
    /// The raw two-character porcelain status code (e.g. `" M"`, `"??"`).
    pub code: String,
}
