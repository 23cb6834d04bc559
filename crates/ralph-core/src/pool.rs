//! Worker Pool / Admission: tracks the set of live workers,
//! indexed by kind, and enforces per-kind concurrency caps.
//!
//! Persisted at `.ralph/orchestrator/pool.json`. Mutations are serialized
//! under a single file lock, the same pattern as the conflict queue
//! ([`crate::conflict`]).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RalphError, Result};
use crate::fsio::{atomic_write_json, read_json, with_exclusive_lock};
use crate::model::TaskId;

/// A worker kind: which pipeline and admission capacity it draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    /// A worker driving a task's primary pipeline.
    Main,
    /// A worker running an inline fix sub-step.
    Fix,
    /// A worker resolving a conflict-queue batch.
    Resolve,
}

impl WorkerKind {
    const ALL: [Self; 3] = [Self::Main, Self::Fix, Self::Resolve];
}

/// One live worker's pool entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolEntry {
    /// OS process ID of the worker's subprocess.
    pub pid: u32,
    /// Which capacity bucket this worker counts against.
    pub kind: WorkerKind,
    /// The task this worker is attempting.
    pub task_id: TaskId,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct PoolFile {
    #[serde(default)]
    entries: Vec<PoolEntry>,
}

fn load(pool_path: &Path) -> Result<PoolFile> {
    if pool_path.exists() {
        read_json(pool_path)
    } else {
        Ok(PoolFile::default())
    }
}

fn with_pool<T>(pool_path: &Path, lock_path: &Path, f: impl FnOnce(&mut PoolFile) -> Result<T>) -> Result<T> {
    with_exclusive_lock(lock_path, || {
        let mut file = load(pool_path)?;
        let result = f(&mut file)?;
        atomic_write_json(pool_path, &file)?;
        Ok(result)
    })
}

/// Register a newly spawned worker.
///
/// # Errors
/// Returns an error if `pid` is already registered.
pub fn add(pool_path: &Path, lock_path: &Path, pid: u32, kind: WorkerKind, task_id: TaskId) -> Result<()> {
    with_pool(pool_path, lock_path, |file| {
        if file.entries.iter().any(|e| e.pid == pid) {
            return Err(RalphError::MalformedTask {
                id: task_id.to_string(),
                reason: format!("pid {pid} already registered in the worker pool"),
            });
        }
        file.entries.push(PoolEntry { pid, kind, task_id });
        Ok(())
    })
}

/// Remove a worker by PID.
///
/// # Errors
/// Returns an error if `pid` isn't registered.
pub fn remove(pool_path: &Path, lock_path: &Path, pid: u32) -> Result<()> {
    with_pool(pool_path, lock_path, |file| {
        let before = file.entries.len();
        file.entries.retain(|e| e.pid != pid);
        if file.entries.len() == before {
            return Err(RalphError::TaskNotFound { id: format!("pid:{pid}") });
        }
        Ok(())
    })
}

/// `true` iff fewer than `cap` workers of `kind` are currently live.
///
/// # Errors
/// Propagates I/O errors.
pub fn has_capacity(pool_path: &Path, kind: WorkerKind, cap: usize) -> Result<bool> {
    Ok(count(pool_path, Some(kind))? < cap)
}

/// Count live workers, optionally filtered to one `kind`.
///
/// # Errors
/// Propagates I/O errors.
pub fn count(pool_path: &Path, kind: Option<WorkerKind>) -> Result<usize> {
    let file = load(pool_path)?;
    Ok(match kind {
        Some(k) => file.entries.iter().filter(|e| e.kind == k).count(),
        None => file.entries.len(),
    })
}

/// Find the PID of the worker (if any) currently assigned to `task_id`.
///
/// # Errors
/// Propagates I/O errors.
pub fn find_by_task(pool_path: &Path, task_id: &TaskId) -> Result<Option<u32>> {
    let file = load(pool_path)?;
    Ok(file.entries.iter().find(|e| &e.task_id == task_id).map(|e| e.pid))
}

/// Run `f` over every live entry, optionally restricted to one `kind`.
///
/// # Errors
/// Propagates I/O errors.
pub fn foreach(pool_path: &Path, kind: Option<WorkerKind>, mut f: impl FnMut(&PoolEntry)) -> Result<()> {
    let file = load(pool_path)?;
    for entry in &file.entries {
        let matches = match kind {
            Some(k) => k == entry.kind,
            None => true,
        };
        if matches {
            f(entry);
        }
    }
    Ok(())
}

/// Aggregate per-kind counts, for a status/monitor view.
///
/// # Errors
/// Propagates I/O errors.
pub fn counts_by_kind(pool_path: &Path) -> Result<HashMap<WorkerKind, usize>> {
    let file = load(pool_path)?;
    let mut counts = HashMap::new();
    for kind in WorkerKind::ALL {
        counts.insert(kind, file.entries.iter().filter(|e| e.kind == kind).count());
    }
    Ok(counts)
}

/// Reconstruct the pool from on-disk worker directories at orchestrator
/// startup, pruning any PID not alive. `is_alive` is injected so tests don't depend on real process
/// liveness.
///
/// # Errors
/// Propagates I/O / lock errors.
pub fn reconcile_startup(pool_path: &Path, lock_path: &Path, is_alive: impl Fn(u32) -> bool) -> Result<Vec<PoolEntry>> {
    with_pool(pool_path, lock_path, |file| {
        let pruned: Vec<PoolEntry> = file.entries.iter().filter(|e| !is_alive(e.pid)).cloned().collect();
        file.entries.retain(|e| is_alive(e.pid));
        Ok(pruned)
    })
}
