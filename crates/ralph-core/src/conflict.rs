//! Conflict Queue: registers workers whose file sets overlap and
//! groups them into batches for coordinated multi-worker resolution.
//!
//! Persisted at `.ralph/batches/queue.json` as `{queue: [...], batches: {}}`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fsio::{atomic_write_json, read_json, with_exclusive_lock};
use crate::model::TaskId;

/// One conflict-queue entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The task this entry concerns.
    pub task_id: TaskId,
    /// The worker's directory.
    pub worker_dir: PathBuf,
    /// The PR number, if one has been opened.
    pub pr_number: Option<u64>,
    /// Files this worker's changes touch, used to detect overlap.
    pub changed_files: Vec<String>,
}

/// A batch's resolution status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// Created, awaiting a resolve worker.
    Queued,
    /// A resolve worker is planning the multi-task merge.
    Planning,
    /// A resolve worker is actively resolving.
    Resolving,
    /// Resolution succeeded.
    Resolved,
    /// Resolution failed.
    Failed,
}

/// A non-singleton connected component of the conflict queue, under active
/// resolution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Batch {
    /// The batch's generated ID.
    pub id: String,
    /// Current status.
    pub status: BatchStatus,
    /// The tasks in this batch, in the order `createBatch` was called with.
    pub task_ids: Vec<TaskId>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct QueueEntry {
    #[serde(flatten)]
    entry: Entry,
    #[serde(default)]
    batch_id: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct QueueFile {
    #[serde(default)]
    queue: Vec<QueueEntry>,
    #[serde(default)]
    batches: HashMap<String, Batch>,
    #[serde(default)]
    next_batch_seq: u64,
}

/// Aggregate queue statistics, per `stats()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Entries not yet assigned to a batch.
    pub queued: usize,
    /// Entries assigned to a batch.
    pub batched: usize,
    /// Total number of batches.
    pub batches: usize,
}

fn load(queue_path: &Path) -> Result<QueueFile> {
    if queue_path.exists() {
        read_json(queue_path)
    } else {
        Ok(QueueFile::default())
    }
}

fn with_queue<T>(queue_path: &Path, lock_path: &Path, f: impl FnOnce(&mut QueueFile) -> Result<T>) -> Result<T> {
    with_exclusive_lock(lock_path, || {
        let mut file = load(queue_path)?;
        let result = f(&mut file)?;
        atomic_write_json(queue_path, &file)?;
        Ok(result)
    })
}

/// Register `entry`, replacing any existing entry for the same task
/// (dedup by `task_id`: `add(e); add(e)` yields exactly one entry).
///
/// # Errors
/// Propagates I/O / lock errors.
pub fn add(queue_path: &Path, lock_path: &Path, entry: Entry) -> Result<()> {
    with_queue(queue_path, lock_path, |file| {
        file.queue.retain(|q| q.entry.task_id != entry.task_id);
        file.queue.push(QueueEntry { entry, batch_id: None });
        Ok(())
    })
}

/// Remove the entry for `task_id`, a no-op if absent.
///
/// # Errors
/// Propagates I/O / lock errors.
pub fn remove(queue_path: &Path, lock_path: &Path, task_id: &TaskId) -> Result<()> {
    with_queue(queue_path, lock_path, |file| {
        file.queue.retain(|q| &q.entry.task_id != task_id);
        Ok(())
    })
}

/// Compute connected components among un-batched entries whose
/// `changed_files` sets pairwise intersect. Singletons are excluded.
///
/// # Errors
/// Propagates I/O / lock errors.
pub fn group_related(queue_path: &Path) -> Result<Vec<Vec<TaskId>>> {
    let file = load(queue_path)?;
    let unbatched: Vec<&QueueEntry> = file.queue.iter().filter(|q| q.batch_id.is_none()).collect();
    Ok(group_related_entries(&unbatched))
}

fn group_related_entries(entries: &[&QueueEntry]) -> Vec<Vec<TaskId>> {
    let n = entries.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut [usize], x: usize) -> usize {
        if parent[x] != x {
            parent[x] = find(parent, parent[x]);
        }
        parent[x]
    }

    fn union(parent: &mut [usize], a: usize, b: usize) {
        let ra = find(parent, a);
        let rb = find(parent, b);
        if ra != rb {
            parent[ra] = rb;
        }
    }

    let file_sets: Vec<HashSet<&str>> = entries
        .iter()
        .map(|e| e.entry.changed_files.iter().map(String::as_str).collect())
        .collect();

    for i in 0..n {
        for j in (i + 1)..n {
            if !file_sets[i].is_disjoint(&file_sets[j]) {
                union(&mut parent, i, j);
            }
        }
    }

    let mut components: HashMap<usize, Vec<TaskId>> = HashMap::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        components.entry(root).or_default().push(entries[i].entry.task_id.clone());
    }

    let mut groups: Vec<Vec<TaskId>> = components.into_values().filter(|g| g.len() > 1).collect();
    for g in &mut groups {
        g.sort();
    }
    groups.sort_by(|a, b| a[0].cmp(&b[0]));
    groups
}

/// `true` iff at least one non-singleton group of un-batched entries exists.
///
/// # Errors
/// Propagates I/O / lock errors.
pub fn batch_ready(queue_path: &Path) -> Result<bool> {
    Ok(!group_related(queue_path)?.is_empty())
}

/// Atomically assign `task_ids` to a freshly generated batch with status
/// `queued`, returning its ID.
///
/// # Errors
/// Propagates I/O / lock errors.
pub fn create_batch(queue_path: &Path, lock_path: &Path, task_ids: Vec<TaskId>) -> Result<String> {
    with_queue(queue_path, lock_path, |file| {
        let seq = file.next_batch_seq;
        file.next_batch_seq += 1;
        let batch_id = format!("batch-{seq:04}");
        for entry in &mut file.queue {
            if task_ids.contains(&entry.entry.task_id) {
                entry.batch_id = Some(batch_id.clone());
            }
        }
        file.batches.insert(
            batch_id.clone(),
            Batch {
                id: batch_id.clone(),
                status: BatchStatus::Queued,
                task_ids,
            },
        );
        Ok(batch_id)
    })
}

/// Update a batch's status. No-op if the batch doesn't exist.
///
/// # Errors
/// Propagates I/O / lock errors.
pub fn update_batch_status(queue_path: &Path, lock_path: &Path, batch_id: &str, status: BatchStatus) -> Result<()> {
    with_queue(queue_path, lock_path, |file| {
        if let Some(batch) = file.batches.get_mut(batch_id) {
            batch.status = status;
        }
        Ok(())
    })
}

/// Fetch a batch by ID.
///
/// # Errors
/// Propagates I/O errors.
pub fn get_batch(queue_path: &Path, batch_id: &str) -> Result<Option<Batch>> {
    Ok(load(queue_path)?.batches.get(batch_id).cloned())
}

/// Remove a batch and every entry assigned to it.
///
/// # Errors
/// Propagates I/O / lock errors.
pub fn cleanup_batch(queue_path: &Path, lock_path: &Path, batch_id: &str) -> Result<()> {
    with_queue(queue_path, lock_path, |file| {
        file.batches.remove(batch_id);
        file.queue.retain(|q| q.batch_id.as_deref() != Some(batch_id));
        Ok(())
    })
}

/// Aggregate queue statistics.
///
/// # Errors
/// Propagates I/O errors.
pub fn stats(queue_path: &Path) -> Result<Stats> {
    let file = load(queue_path)?;
    let batched = file.queue.iter().filter(|q| q.batch_id.is_some()).count();
    Ok(Stats {
        queued: file.queue.len() - batched,
        batched,
        batches: file.batches.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, files: &[&str]) -> Entry {
        Entry {
            task_id: TaskId::new(id).unwrap(),
            worker_dir: PathBuf::from(format!("/tmp/{id}")),
            pr_number: None,
            changed_files: files.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    #[test]
    fn add_is_idempotent_by_task_id() {
        let dir = tempfile::tempdir().unwrap();
        let queue = dir.path().join("queue.json");
        let lock = dir.path().join("queue.lock");
        let e = entry("A-1", &["src/api.ts"]);
        add(&queue, &lock, e.clone()).unwrap();
        add(&queue, &lock, e).unwrap();
        let file = load(&queue).unwrap();
        assert_eq!(file.queue.len(), 1);
    }

    #[test]
    fn group_related_links_overlapping_file_sets() {
        let dir = tempfile::tempdir().unwrap();
        let queue = dir.path().join("queue.json");
        let lock = dir.path().join("queue.lock");
        add(&queue, &lock, entry("A-10", &["src/api.ts"])).unwrap();
        add(&queue, &lock, entry("A-11", &["src/api.ts", "src/util.ts"])).unwrap();
        add(&queue, &lock, entry("A-12", &["docs/readme.md"])).unwrap();

        let groups = group_related(&queue).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0], vec![TaskId::new("A-10").unwrap(), TaskId::new("A-11").unwrap()]);
        assert!(batch_ready(&queue).unwrap());
    }

    #[test]
    fn create_batch_marks_entries_and_excludes_from_further_grouping() {
        let dir = tempfile::tempdir().unwrap();
        let queue = dir.path().join("queue.json");
        let lock = dir.path().join("queue.lock");
        add(&queue, &lock, entry("A-10", &["src/api.ts"])).unwrap();
        add(&queue, &lock, entry("A-11", &["src/api.ts"])).unwrap();

        let batch_id = create_batch(&queue, &lock, vec![TaskId::new("A-10").unwrap(), TaskId::new("A-11").unwrap()]).unwrap();
        assert!(!batch_ready(&queue).unwrap());

        let batch = get_batch(&queue, &batch_id).unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Queued);

        update_batch_status(&queue, &lock, &batch_id, BatchStatus::Resolved).unwrap();
        assert_eq!(get_batch(&queue, &batch_id).unwrap().unwrap().status, BatchStatus::Resolved);

        let s = stats(&queue).unwrap();
        assert_eq!(s, Stats { queued: 0, batched: 2, batches: 1 });

        cleanup_batch(&queue, &lock, &batch_id).unwrap();
        assert!(get_batch(&queue, &batch_id).unwrap().is_none());
        assert_eq!(stats(&queue).unwrap(), Stats { queued: 0, batched: 0, batches: 0 });
    }

    #[test]
    fn remove_is_noop_for_absent_task() {
        let dir = tempfile::tempdir().unwrap();
        let queue = dir.path().join("queue.json");
        let lock = dir.path().join("queue.lock");
        assert!(remove(&queue, &lock, &TaskId::new("A-99").unwrap()).is_ok());
    }
}
