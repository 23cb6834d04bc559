//! Pipeline checkpoint state.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fsio::{atomic_write_json, read_json};

use super::config::StepResult;

/// One recorded step attempt, appended to `results` on every dispatch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepResultEntry {
    /// The step (or fix sub-step) ID this entry is for.
    pub step_id: String,
    /// Which attempt at that step this was (1-based).
    pub attempt: u32,
    /// The declared outcome.
    pub result: StepResult,
    /// An optional free-text reason (e.g. `"timeout"`, `"output-missing"`).
    pub reason: Option<String>,
    /// Unix-seconds write time.
    pub recorded_at: u64,
}

/// The full on-disk checkpoint for one worker's pipeline run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PipelineState {
    /// Index into the pipeline's `steps` the driver resumes at.
    pub current_step_idx: usize,
    /// Attempt counters for each step ID. These accumulate across every
    /// visit to a step (including via `prev`-routing back into it), since
    /// the per-step retry cap counts total attempts, not
    /// attempts-since-last-arrival.
    #[serde(default)]
    pub per_step_attempt: HashMap<String, u32>,
    /// Attempt counters for each fix sub-step ID.
    #[serde(default)]
    pub fix_attempt: HashMap<String, u32>,
    /// Every recorded step result, in dispatch order.
    #[serde(default)]
    pub results: Vec<StepResultEntry>,
    /// Monotonic checkpoint sequence number, incremented on every save.
    #[serde(default)]
    pub checkpoint_seq: u64,
}

impl PipelineState {
    /// A fresh state starting at the pipeline's first step.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a checkpoint from `path`, or a fresh state if none exists yet.
    ///
    /// # Errors
    /// Propagates I/O or JSON errors other than a missing file.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            read_json(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Persist this checkpoint atomically, bumping `checkpoint_seq`.
    ///
    /// # Errors
    /// Propagates I/O errors from the underlying atomic write.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.checkpoint_seq += 1;
        atomic_write_json(path, self)
    }

    /// The current attempt count for `step_id` (0 if never attempted).
    #[must_use]
    pub fn attempts_for(&self, step_id: &str) -> u32 {
        self.per_step_attempt.get(step_id).copied().unwrap_or(0)
    }

    /// The current attempt count for fix sub-step `fix_id` (0 if never
    /// attempted).
    #[must_use]
    pub fn fix_attempts_for(&self, fix_id: &str) -> u32 {
        self.fix_attempt.get(fix_id).copied().unwrap_or(0)
    }

    /// Bump and return the new attempt count for `step_id`.
    pub fn bump_attempt(&mut self, step_id: &str) -> u32 {
        let entry = self.per_step_attempt.entry(step_id.to_owned()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Bump and return the new attempt count for fix sub-step `fix_id`.
    pub fn bump_fix_attempt(&mut self, fix_id: &str) -> u32 {
        let entry = self.fix_attempt.entry(fix_id.to_owned()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Reposition the checkpoint at `step_idx`, for a resume decision that
    /// re-enters the pipeline at an earlier step. Attempt counters and
    /// recorded results are left untouched: a retry revisits a step, it
    /// doesn't erase the history of having been there before.
    pub fn rewind_to(&mut self, step_idx: usize) {
        self.current_step_idx = step_idx;
    }

    /// Append one result record.
    pub fn record_result(&mut self, step_id: &str, attempt: u32, result: StepResult, reason: Option<String>, now: u64) {
        self.results.push(StepResultEntry {
            step_id: step_id.to_owned(),
            attempt,
            result,
            reason,
            recorded_at: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_or_default_yields_fresh_state_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let state = PipelineState::load_or_default(&path).unwrap();
        assert_eq!(state.current_step_idx, 0);
        assert!(state.results.is_empty());
    }

    #[test]
    fn save_and_reload_round_trips_and_bumps_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let mut state = PipelineState::new();
        state.bump_attempt("implement");
        state.record_result("implement", 1, StepResult::Pass, None, 1000);
        state.save(&path).unwrap();
        assert_eq!(state.checkpoint_seq, 1);

        let reloaded = PipelineState::load_or_default(&path).unwrap();
        assert_eq!(reloaded.attempts_for("implement"), 1);
        assert_eq!(reloaded.results.len(), 1);
        assert_eq!(reloaded.checkpoint_seq, 1);
    }

    #[test]
    fn rewind_to_resets_step_index_without_touching_attempts() {
        let mut state = PipelineState::new();
        state.bump_attempt("implement");
        state.bump_attempt("review");
        state.current_step_idx = 2;

        state.rewind_to(0);

        assert_eq!(state.current_step_idx, 0);
        assert_eq!(state.attempts_for("implement"), 1);
        assert_eq!(state.attempts_for("review"), 1);
    }

    #[test]
    fn attempt_counters_are_independent_per_step() {
        let mut state = PipelineState::new();
        state.bump_attempt("implement");
        state.bump_attempt("implement");
        state.bump_attempt("review");
        assert_eq!(state.attempts_for("implement"), 2);
        assert_eq!(state.attempts_for("review"), 1);
        assert_eq!(state.attempts_for("never-touched"), 0);
    }
}
