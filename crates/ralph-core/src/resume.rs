//! Resume Controller: decides what happens to a worker whose
//! pipeline run just aborted, and tracks the resume budget that bounds how
//! many times that can happen before the worker is excluded for good.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::board;
use crate::error::{RalphError, Result};
use crate::fsio::{atomic_write_json, read_json, with_exclusive_lock};
use crate::model::{TaskId, TaskStatus};
use crate::pipeline::PipelineConfig;

/// Default cooldown applied on a `DEFER` decision, in seconds. The exact
/// Δ is left to the project; one hour is a conservative default.
pub const DEFAULT_DEFER_COOLDOWN_SECONDS: u64 = 3600;

/// Default resume-attempt budget. The exact bound is left to the project;
/// matches the worker lifecycle's own recovery-attempt default of granting
/// a worker a single shot at resuming before exclusion doubles.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// One of the four decisions a resume judgment MUST return.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Re-enter the pipeline at `step_id` (which must be at or before the
    /// step that aborted).
    Retry {
        /// The pipeline name to re-enter.
        pipeline: String,
        /// The step ID to resume at.
        step_id: String,
    },
    /// Exclude the worker from scheduling until `now + Δ`. Not terminal.
    Defer,
    /// Terminal failure; kanban status moves to `*`.
    Abort,
    /// Terminal success; kanban status moves to `P` (pending approval).
    Complete,
}

impl ResumeDecision {
    /// Parse the exit-code convention: `65 = ABORT`,
    /// `66 = DEFER`, `67 = COMPLETE`; any other non-zero code is an implicit
    /// ABORT if the worker has exhausted its attempt budget, else an
    /// implicit RETRY at the step that just aborted.
    #[must_use]
    pub fn from_exit_code(code: i32, failing_pipeline: &str, failing_step_id: &str, attempt_count: u32, max_attempts: u32) -> Self {
        match code {
            65 => Self::Abort,
            66 => Self::Defer,
            67 => Self::Complete,
            _ if attempt_count >= max_attempts => Self::Abort,
            _ => Self::Retry { pipeline: failing_pipeline.to_owned(), step_id: failing_step_id.to_owned() },
        }
    }

    /// Parse a judgment mechanism's text output: either a
    /// `RETRY:<pipeline>:<step_id>` line, or the bare words `DEFER` / `ABORT`
    /// / `COMPLETE`.
    ///
    /// # Errors
    /// Returns [`RalphError::MalformedTask`] if the text matches none of
    /// the four forms.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        match text {
            "DEFER" => return Ok(Self::Defer),
            "ABORT" => return Ok(Self::Abort),
            "COMPLETE" => return Ok(Self::Complete),
            _ => {}
        }
        if let Some(rest) = text.strip_prefix("RETRY:") {
            let mut parts = rest.splitn(2, ':');
            let pipeline = parts.next().unwrap_or_default();
            let step_id = parts.next().unwrap_or_default();
            if pipeline.is_empty() || step_id.is_empty() {
                return Err(RalphError::MalformedTask {
                    id: String::new(),
                    reason: format!("malformed RETRY decision '{text}', expected RETRY:<pipeline>:<step_id>"),
                });
            }
            return Ok(Self::Retry { pipeline: pipeline.to_owned(), step_id: step_id.to_owned() });
        }
        Err(RalphError::MalformedTask {
            id: String::new(),
            reason: format!("unrecognized resume decision '{text}'"),
        })
    }

    /// Parse the backward-compat `resume-step.txt` format: a bare step ID
    /// means `RETRY:<default_pipeline>:<step-id>`; the literal words
    /// `ABORT`/`DEFER`/`COMPLETE` map to themselves.
    ///
    /// # Errors
    /// Returns [`RalphError::MalformedTask`] on an empty file.
    pub fn parse_legacy(text: &str, default_pipeline: &str) -> Result<Self> {
        let text = text.trim();
        match text {
            "DEFER" => return Ok(Self::Defer),
            "ABORT" => return Ok(Self::Abort),
            "COMPLETE" => return Ok(Self::Complete),
            "" => {
                return Err(RalphError::MalformedTask {
                    id: String::new(),
                    reason: "resume-step.txt is empty".to_owned(),
                });
            }
            step_id => Ok(Self::Retry { pipeline: default_pipeline.to_owned(), step_id: step_id.to_owned() }),
        }
    }

    /// Validate a RETRY decision's target step is at or before the step
    /// that just aborted, returning its index.
    ///
    /// # Errors
    /// Returns [`RalphError::InvalidPipelineConfig`] if the step doesn't
    /// exist, or is strictly after the failing step.
    pub fn validate_retry_target(&self, config: &PipelineConfig, failing_step_idx: usize) -> Result<usize> {
        let Self::Retry { step_id, .. } = self else {
            return Err(RalphError::InvalidPipelineConfig {
                reason: "validate_retry_target called on a non-RETRY decision".to_owned(),
            });
        };
        let idx = config.step_index(step_id).ok_or_else(|| RalphError::InvalidPipelineConfig {
            reason: format!("resume target step '{step_id}' does not exist in pipeline '{}'", config.name),
        })?;
        if idx > failing_step_idx {
            return Err(RalphError::InvalidPipelineConfig {
                reason: format!(
                    "resume target step '{step_id}' is after the failing step at index {failing_step_idx}"
                ),
            });
        }
        Ok(idx)
    }
}

/// One recorded resume decision, kept for audit/debugging.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Unix-seconds this decision was applied.
    pub at: u64,
    /// The decision, rendered (`"RETRY:pipeline:step"`, `"DEFER"`, ...).
    pub decision: String,
}

/// A worker's persisted resume budget and status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResumeState {
    /// How many resume decisions have been applied so far.
    pub attempt_count: u32,
    /// The attempt budget; at or beyond this, the worker is excluded.
    pub max_attempts: u32,
    /// Unix-seconds of the most recent resume attempt.
    pub last_attempt_at: u64,
    /// Unix-seconds before which the worker is excluded from scheduling.
    pub cooldown_until: u64,
    /// `true` once an ABORT or COMPLETE decision has been applied.
    pub terminal: bool,
    /// Why the worker became terminal, if it did.
    pub terminal_reason: Option<String>,
    /// Every decision applied, oldest first.
    pub history: Vec<HistoryEntry>,
}

impl Default for ResumeState {
    fn default() -> Self {
        Self {
            attempt_count: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            last_attempt_at: 0,
            cooldown_until: 0,
            terminal: false,
            terminal_reason: None,
            history: Vec::new(),
        }
    }
}

impl ResumeState {
    /// Load a worker's resume state, or a fresh default if none exists yet.
    ///
    /// # Errors
    /// Propagates I/O or JSON errors other than a missing file.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            read_json(path)
        } else {
            Ok(Self::default())
        }
    }

    /// `true` iff the worker is eligible for scheduling: not terminal, its
    /// cooldown has expired, and it hasn't exhausted its attempt budget
    ///.
    #[must_use]
    pub fn eligible_for_scheduling(&self, now: u64) -> bool {
        !self.terminal && now >= self.cooldown_until && self.attempt_count < self.max_attempts
    }
}

/// Render a decision the same way [`ResumeDecision::parse`] reads it back,
/// for [`HistoryEntry::decision`].
fn render_decision(decision: &ResumeDecision) -> String {
    match decision {
        ResumeDecision::Retry { pipeline, step_id } => format!("RETRY:{pipeline}:{step_id}"),
        ResumeDecision::Defer => "DEFER".to_owned(),
        ResumeDecision::Abort => "ABORT".to_owned(),
        ResumeDecision::Complete => "COMPLETE".to_owned(),
    }
}

/// Apply a resume decision to a worker: update its resume-state file and,
/// for ABORT/COMPLETE, the kanban status. Returns the loaded-and-updated
/// state.
///
/// # Errors
/// Propagates I/O / lock / board errors.
#[allow(clippy::too_many_arguments)]
pub fn apply_decision(
    resume_path: &Path,
    resume_lock_path: &Path,
    board_path: &Path,
    board_lock_path: &Path,
    task_id: &TaskId,
    decision: &ResumeDecision,
    now: u64,
    defer_cooldown_seconds: u64,
) -> Result<ResumeState> {
    with_exclusive_lock(resume_lock_path, || {
        let mut state = ResumeState::load_or_default(resume_path)?;
        state.attempt_count += 1;
        state.last_attempt_at = now;
        state.history.push(HistoryEntry { at: now, decision: render_decision(decision) });

        match decision {
            ResumeDecision::Retry { .. } => {}
            ResumeDecision::Defer => {
                state.cooldown_until = now + defer_cooldown_seconds;
            }
            ResumeDecision::Abort => {
                state.terminal = true;
                state.terminal_reason = Some("resume controller: ABORT".to_owned());
                board::set_status(board_path, board_lock_path, task_id, TaskStatus::Failed)?;
            }
            ResumeDecision::Complete => {
                state.terminal = true;
                state.terminal_reason = Some("work complete".to_owned());
                board::set_status(board_path, board_lock_path, task_id, TaskStatus::PendingApproval)?;
            }
        }

        atomic_write_json(resume_path, &state)?;
        Ok(state)
    })
}
