//! Per-worker lifecycle state record, persisted at
//! `.ralph/workers/<id>/lifecycle-state.json`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fsio::{atomic_write_json, read_json};

/// Default cap on merge attempts before the merge guard stops matching.
pub const DEFAULT_MAX_MERGE_ATTEMPTS: u32 = 2;
/// Default cap on recovery attempts before the recovery guard stops matching.
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 1;

/// The persisted lifecycle-state record for one worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleState {
    /// Current state name.
    pub state: String,
    /// Bounded by `MAX_MERGE_ATTEMPTS`.
    #[serde(default)]
    pub merge_attempts: u32,
    /// Bounded by `MAX_RECOVERY_ATTEMPTS`.
    #[serde(default)]
    pub recovery_attempts: u32,
    /// Set by `set_error`/cleared by `clear_error`.
    #[serde(default)]
    pub error: Option<String>,
    /// Result of the most recent rebase attempt, consulted by the
    /// `rebase_succeeded` guard.
    #[serde(default)]
    pub rebase_succeeded: Option<bool>,
    /// `true` while this worker is registered in the conflict queue.
    #[serde(default)]
    pub in_conflict_queue: bool,
}

impl LifecycleState {
    /// A fresh state record in `state`, all counters zeroed.
    #[must_use]
    pub fn new(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            merge_attempts: 0,
            recovery_attempts: 0,
            error: None,
            rebase_succeeded: None,
            in_conflict_queue: false,
        }
    }

    /// Load a worker's lifecycle state, or `None` if no file exists yet
    /// (a brand-new worker).
    ///
    /// # Errors
    /// Propagates I/O / JSON errors other than file-not-found.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(read_json(path)?))
    }

    /// Persist this state record atomically.
    ///
    /// # Errors
    /// Propagates I/O errors from the underlying atomic write.
    pub fn save(&self, path: &Path) -> Result<()> {
        atomic_write_json(path, self)
    }
}
