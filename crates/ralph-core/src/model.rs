//! Core domain types shared across the orchestrator: task/worker identifiers,
//! priorities, and status characters.
//!
//! Newtypes validate once at construction, then carry a value that is
//! known-good everywhere else.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// A validated task identifier of the shape `<PREFIX>-<NNNN>` (1-4 digits).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    /// Create a new `TaskId`, validating its shape.
    ///
    /// # Errors
    /// Returns an error if `s` doesn't match `<PREFIX>-<1-4 digits>`.
    pub fn new(s: impl Into<String>) -> Result<Self, ValidationError> {
        let s = s.into();
        Self::validate(&s)?;
        Ok(Self(s))
    }

    /// Return the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return the `<PREFIX>` portion, used by the scheduler's sibling
    /// penalty.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.0.split('-').next().unwrap_or(&self.0)
    }

    fn validate(s: &str) -> Result<(), ValidationError> {
        let Some((prefix, digits)) = s.rsplit_once('-') else {
            return Err(ValidationError {
                value: s.to_owned(),
                reason: "expected <PREFIX>-<digits>".to_owned(),
            });
        };
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ValidationError {
                value: s.to_owned(),
                reason: "prefix must be non-empty alphanumeric".to_owned(),
            });
        }
        if digits.is_empty() || digits.len() > 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ValidationError {
                value: s.to_owned(),
                reason: "expected 1-4 digits after the prefix".to_owned(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TaskId {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TaskId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::validate(&s)?;
        Ok(Self(s))
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

/// Error from validating a domain identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// The raw value that failed validation.
    pub value: String,
    /// Why validation failed.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid value {:?}: {}", self.value, self.reason)
    }
}

impl std::error::Error for ValidationError {}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// A task's status character, as it appears in a kanban board row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// ` ` — pending, eligible once its dependencies complete.
    Pending,
    /// `=` — in progress (a worker is currently attempting it).
    InProgress,
    /// `P` — pending approval (work complete, awaiting human sign-off).
    PendingApproval,
    /// `x` — complete.
    Complete,
    /// `*` — failed (terminal, except via explicit recovery).
    Failed,
    /// `N` — not planned (terminal, except via explicit recovery).
    NotPlanned,
}

impl TaskStatus {
    /// Parse the single status character used in the board.
    pub fn from_char(c: char) -> Result<Self, ValidationError> {
        match c {
            ' ' => Ok(Self::Pending),
            '=' => Ok(Self::InProgress),
            'P' => Ok(Self::PendingApproval),
            'x' => Ok(Self::Complete),
            '*' => Ok(Self::Failed),
            'N' => Ok(Self::NotPlanned),
            other => Err(ValidationError {
                value: other.to_string(),
                reason: "expected one of ' ', '=', 'P', 'x', '*', 'N'".to_owned(),
            }),
        }
    }

    /// Render back to the single status character.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Pending => ' ',
            Self::InProgress => '=',
            Self::PendingApproval => 'P',
            Self::Complete => 'x',
            Self::Failed => '*',
            Self::NotPlanned => 'N',
        }
    }

    /// `true` for the three statuses the model calls terminal (only leave via
    /// an explicit recovery action).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::NotPlanned)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char(self.as_char())
    }
}

use fmt::Write as _;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// A task's declared priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    /// Highest priority.
    Critical,
    High,
    Medium,
    /// Lowest priority.
    Low,
}

impl Priority {
    /// Base effective-priority contribution for this priority tier.
    #[must_use]
    pub const fn base_score(self) -> i64 {
        match self {
            Self::Critical => 0,
            Self::High => 10_000,
            Self::Medium => 20_000,
            Self::Low => 30_000,
        }
    }
}

impl FromStr for Priority {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CRITICAL" => Ok(Self::Critical),
            "HIGH" => Ok(Self::High),
            "MEDIUM" => Ok(Self::Medium),
            "LOW" => Ok(Self::Low),
            other => Err(ValidationError {
                value: other.to_owned(),
                reason: "expected CRITICAL, HIGH, MEDIUM, or LOW".to_owned(),
            }),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// WorkerId
// ---------------------------------------------------------------------------

/// A worker identifier, `worker-<task-id>-<epoch>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerId(String);

impl WorkerId {
    /// Construct a `WorkerId` from its components.
    #[must_use]
    pub fn new(task_id: &TaskId, epoch: u64) -> Self {
        Self(format!("worker-{task_id}-{epoch}"))
    }

    /// Return the worker ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract the task ID and epoch this worker ID encodes.
    ///
    /// # Errors
    /// Returns an error if the ID isn't of the form `worker-<task-id>-<epoch>`.
    pub fn parse_parts(&self) -> Result<(TaskId, u64), ValidationError> {
        let rest = self.0.strip_prefix("worker-").ok_or_else(|| ValidationError {
            value: self.0.clone(),
            reason: "expected 'worker-' prefix".to_owned(),
        })?;
        let (task_part, epoch_part) = rest.rsplit_once('-').ok_or_else(|| ValidationError {
            value: self.0.clone(),
            reason: "expected '<task-id>-<epoch>' suffix".to_owned(),
        })?;
        let task_id = TaskId::new(task_part)?;
        let epoch: u64 = epoch_part.parse().map_err(|_| ValidationError {
            value: self.0.clone(),
            reason: "epoch must be a non-negative integer".to_owned(),
        })?;
        Ok((task_id, epoch))
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for WorkerId {
    type Error = ValidationError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self(s).parse_parts().map(|_| ())?;
        Ok(Self(s))
    }
}

impl From<WorkerId> for String {
    fn from(id: WorkerId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_accepts_valid_shapes() {
        assert!(TaskId::new("TASK-1").is_ok());
        assert!(TaskId::new("TASK-0001").is_ok());
        assert!(TaskId::new("AB2-42").is_ok());
    }

    #[test]
    fn task_id_rejects_bad_shapes() {
        assert!(TaskId::new("TASK-").is_err());
        assert!(TaskId::new("TASK-12345").is_err());
        assert!(TaskId::new("-123").is_err());
        assert!(TaskId::new("TASK").is_err());
    }

    #[test]
    fn task_id_prefix_extracts_leading_segment() {
        let id = TaskId::new("TASK-0042").unwrap();
        assert_eq!(id.prefix(), "TASK");
    }

    #[test]
    fn status_round_trips_through_char() {
        for c in [' ', '=', 'P', 'x', '*', 'N'] {
            let status = TaskStatus::from_char(c).unwrap();
            assert_eq!(status.as_char(), c);
        }
        assert!(TaskStatus::from_char('?').is_err());
    }

    #[test]
    fn terminal_statuses_are_exactly_x_star_n() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(!TaskStatus::PendingApproval.is_terminal());
        assert!(TaskStatus::Complete.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::NotPlanned.is_terminal());
    }

    #[test]
    fn priority_ordering_matches_spec_table() {
        assert!(Priority::Critical.base_score() < Priority::High.base_score());
        assert!(Priority::High.base_score() < Priority::Medium.base_score());
        assert!(Priority::Medium.base_score() < Priority::Low.base_score());
    }

    #[test]
    fn worker_id_round_trips() {
        let task = TaskId::new("TASK-7").unwrap();
        let worker = WorkerId::new(&task, 3);
        assert_eq!(worker.as_str(), "worker-TASK-7-3");
        let (parsed_task, parsed_epoch) = worker.parse_parts().unwrap();
        assert_eq!(parsed_task, task);
        assert_eq!(parsed_epoch, 3);
    }
}
