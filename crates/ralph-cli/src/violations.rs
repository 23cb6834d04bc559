//! Violations log: an append-only JSONL record
//! of lifecycle and pipeline rule breaks — a worker exceeding its recovery
//! budget, an agent process emitting an internal-failure exit code, a
//! pipeline step committing from a `readonly` step. Kept separate from the
//! event bus so an operator can watch just the things that went wrong
//! without filtering the full event stream.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ralph_core::events::{self, EventRecord, EventSink};
use ralph_core::fsio::with_exclusive_lock;
use serde::Serialize;
use serde_json::json;

#[derive(Clone, Debug, Serialize)]
pub struct Violation {
    pub timestamp: u64,
    pub worker_id: String,
    pub kind: String,
    pub detail: String,
}

pub struct ViolationsLog {
    path: PathBuf,
    lock_path: PathBuf,
}

impl ViolationsLog {
    #[must_use]
    pub fn new(path: PathBuf, lock_path: PathBuf) -> Self {
        Self { path, lock_path }
    }

    /// Append a violation record and mirror it onto the main event bus as a
    /// `violation` event.
    ///
    /// # Errors
    /// Returns an error on lock contention or I/O failure.
    pub fn record(&self, sink: &dyn EventSink, worker_id: &str, kind: &str, detail: &str) -> Result<()> {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let violation = Violation {
            timestamp,
            worker_id: worker_id.to_owned(),
            kind: kind.to_owned(),
            detail: detail.to_owned(),
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context("creating violations log directory")?;
        }
        let path = self.path.clone();
        let line = serde_json::to_string(&violation).context("serializing violation record")?;
        with_exclusive_lock(&self.lock_path, || {
            use std::io::Write as _;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(ralph_core::RalphError::Io)?;
            writeln!(file, "{line}").map_err(ralph_core::RalphError::Io)?;
            Ok(())
        })
        .context("appending to violations log")?;

        events::emit(
            sink,
            "violation",
            json!({"worker_id": worker_id, "kind": kind, "detail": detail}),
        )
        .context("mirroring violation onto event bus")?;
        Ok(())
    }

    /// Read every recorded violation.
    ///
    /// # Errors
    /// Returns an error if the file exists but contains malformed JSON.
    pub fn read_all(&self) -> Result<Vec<Violation>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&self.path)?;
        contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).context("parsing violations log line"))
            .collect()
    }
}

/// Helper for callers that only want the mirrored event shape without going
/// through the full log (e.g. tests asserting the bus received it).
#[must_use]
pub fn event_payload(worker_id: &str, kind: &str, detail: &str) -> EventRecord {
    EventRecord {
        timestamp: 0,
        event_type: "violation".to_owned(),
        payload: json!({"worker_id": worker_id, "kind": kind, "detail": detail}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ralph_core::events::NullSink;

    #[test]
    fn record_appends_a_parseable_line() {
        let dir = tempfile::tempdir().unwrap();
        let log = ViolationsLog::new(dir.path().join("violations.log"), dir.path().join(".violations.log.lock"));
        log.record(&NullSink, "worker-A-1-0", "recovery_budget_exceeded", "3 attempts").unwrap();
        let all = log.read_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].kind, "recovery_budget_exceeded");
    }

    #[test]
    fn path_without_existing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = ViolationsLog::new(dir.path().join("violations.log"), dir.path().join(".violations.log.lock"));
        assert!(log.read_all().unwrap().is_empty());
    }
}
