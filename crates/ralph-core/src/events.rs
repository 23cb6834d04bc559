//! Event Bus / Checkpoints: an append-only JSONL log of
//! everything that happens to a task, a worker, or the orchestrator itself.
//!
//! The bus is a pure log — no fan-out, no subscribers. Consumers re-read as
//! needed; at the anticipated scale (thousands of events per run) a linear
//! scan with a filter predicate is the documented, acceptable query strategy.

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write as _};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use fs4::fs_std::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RalphError, Result};
use crate::fsio::atomic_write;

/// One immutable event-bus record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unix-seconds write time.
    pub timestamp: u64,
    /// The event's type, e.g. `task.started`, `lifecycle.transition`.
    pub event_type: String,
    /// Arbitrary structured payload.
    #[serde(flatten)]
    pub payload: Value,
}

/// Where [`emit`] writes a record. Abstracts the real JSONL-file bus from a
/// no-op sink useful in unit tests that don't care about the event log.
pub trait EventSink {
    /// Record one event.
    ///
    /// # Errors
    /// Implementations may fail on I/O or lock contention.
    fn append(&self, record: &EventRecord) -> Result<()>;
}

/// A sink that discards every record, for tests exercising only state
/// transitions.
pub struct NullSink;

impl EventSink for NullSink {
    fn append(&self, _record: &EventRecord) -> Result<()> {
        Ok(())
    }
}

/// The real, file-backed event bus: `.ralph/logs/events.jsonl`, appended
/// under an exclusive lock so concurrent workers' events never interleave
/// mid-line.
pub struct JsonlEventBus {
    path: std::path::PathBuf,
    lock_path: std::path::PathBuf,
}

impl JsonlEventBus {
    /// Open a bus at `path`, locked via a sibling `.lock` file at `lock_path`.
    #[must_use]
    pub fn new(path: impl Into<std::path::PathBuf>, lock_path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into(), lock_path: lock_path.into() }
    }
}

impl EventSink for JsonlEventBus {
    fn append(&self, record: &EventRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_file = OpenOptions::new().create(true).write(true).open(&self.lock_path)?;
        lock_file.lock_exclusive().map_err(|_| RalphError::LockTimeout { path: self.lock_path.clone() })?;

        let line = serde_json::to_string(record).map_err(|e| RalphError::Json {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        let result = (|| -> Result<()> {
            let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            writeln!(file, "{line}")?;
            file.sync_all()?;
            Ok(())
        })();

        let _ = FileExt::unlock(&lock_file);
        result
    }
}

/// Build a record with the current time and hand it to `sink`.
///
/// # Errors
/// Propagates the sink's append error.
pub fn emit(sink: &dyn EventSink, event_type: &str, payload: Value) -> Result<()> {
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    sink.append(&EventRecord { timestamp, event_type: event_type.to_owned(), payload })
}

/// Read every record from `path`, skipping (not erroring on) malformed
/// lines — a partially-written final line after a crash shouldn't make the
/// whole log unreadable.
///
/// # Errors
/// Propagates I/O errors other than a missing file (which yields `[]`).
pub fn read_all(path: &Path) -> Result<Vec<EventRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(record) = serde_json::from_str::<EventRecord>(&line) {
            records.push(record);
        }
    }
    Ok(records)
}

/// Records whose `event_type` equals `event_type`.
///
/// # Errors
/// Propagates read errors.
pub fn by_type(path: &Path, event_type: &str) -> Result<Vec<EventRecord>> {
    Ok(read_all(path)?.into_iter().filter(|r| r.event_type == event_type).collect())
}

/// Records whose payload has a `task_id` field equal to `task_id`.
///
/// # Errors
/// Propagates read errors.
pub fn by_task(path: &Path, task_id: &str) -> Result<Vec<EventRecord>> {
    Ok(read_all(path)?
        .into_iter()
        .filter(|r| r.payload.get("task_id").and_then(Value::as_str) == Some(task_id))
        .collect())
}

/// Records whose payload has a `worker_dir` field equal to `worker_dir`.
///
/// # Errors
/// Propagates read errors.
pub fn by_worker(path: &Path, worker_dir: &str) -> Result<Vec<EventRecord>> {
    Ok(read_all(path)?
        .into_iter()
        .filter(|r| r.payload.get("worker_dir").and_then(Value::as_str) == Some(worker_dir))
        .collect())
}

/// Count of records per `event_type`.
///
/// # Errors
/// Propagates read errors.
pub fn count_by_type(path: &Path) -> Result<std::collections::HashMap<String, usize>> {
    let mut counts = std::collections::HashMap::new();
    for record in read_all(path)? {
        *counts.entry(record.event_type).or_insert(0) += 1;
    }
    Ok(counts)
}

/// Records with `timestamp >= since`.
///
/// # Errors
/// Propagates read errors.
pub fn since(path: &Path, since: u64) -> Result<Vec<EventRecord>> {
    Ok(read_all(path)?.into_iter().filter(|r| r.timestamp >= since).collect())
}

/// Write a human-readable iteration summary, atomically.
///
/// # Errors
/// Propagates I/O errors from the underlying atomic write.
pub fn write_summary(path: &Path, text: &str) -> Result<()> {
    atomic_write(path, text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_query_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let lock = dir.path().join("events.lock");
        let bus = JsonlEventBus::new(&path, &lock);

        emit(&bus, "task.started", serde_json::json!({"task_id": "A-1"})).unwrap();
        emit(&bus, "task.completed", serde_json::json!({"task_id": "A-1"})).unwrap();
        emit(&bus, "task.started", serde_json::json!({"task_id": "A-2"})).unwrap();

        let all = read_all(&path).unwrap();
        assert_eq!(all.len(), 3);

        let started = by_type(&path, "task.started").unwrap();
        assert_eq!(started.len(), 2);

        let a1 = by_task(&path, "A-1").unwrap();
        assert_eq!(a1.len(), 2);

        let counts = count_by_type(&path).unwrap();
        assert_eq!(counts.get("task.started").copied(), Some(2));
    }

    #[test]
    fn missing_log_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        assert!(read_all(&path).unwrap().is_empty());
    }

    #[test]
    fn events_are_totally_ordered_by_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let lock = dir.path().join("events.lock");
        let bus = JsonlEventBus::new(&path, &lock);
        for i in 0..5 {
            emit(&bus, "iteration.started", serde_json::json!({"n": i})).unwrap();
        }
        let all = read_all(&path).unwrap();
        let ns: Vec<i64> = all.iter().map(|r| r.payload.get("n").and_then(Value::as_i64).unwrap()).collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4]);
    }
}
