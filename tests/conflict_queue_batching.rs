//! Scenario S4: two workers whose diffs touch overlapping files
//! land in the conflict queue, get grouped into a batch, and the batch
//! resolves and is cleaned up, leaving the queue empty again.

use ralph::core::conflict::{self, BatchStatus, Entry};
use ralph::core::model::TaskId;

fn entry(id: &str, files: &[&str]) -> Entry {
    Entry {
        task_id: TaskId::new(id).unwrap(),
        worker_dir: std::path::PathBuf::from(format!("/tmp/worker-{id}")),
        pr_number: None,
        changed_files: files.iter().map(|s| (*s).to_owned()).collect(),
    }
}

#[test]
fn overlapping_workers_group_into_a_batch_and_resolve() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("queue.json");
    let lock_path = dir.path().join("queue.lock");

    conflict::add(&queue_path, &lock_path, entry("TASK-0001", &["src/lib.rs", "src/main.rs"])).unwrap();
    conflict::add(&queue_path, &lock_path, entry("TASK-0002", &["src/lib.rs"])).unwrap();
    conflict::add(&queue_path, &lock_path, entry("TASK-0003", &["src/unrelated.rs"])).unwrap();

    assert!(conflict::batch_ready(&queue_path).unwrap());
    let groups = conflict::group_related(&queue_path).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0], vec![TaskId::new("TASK-0001").unwrap(), TaskId::new("TASK-0002").unwrap()]);

    let batch_id = conflict::create_batch(&queue_path, &lock_path, groups[0].clone()).unwrap();
    let batch = conflict::get_batch(&queue_path, &batch_id).unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Queued);

    // TASK-0003 is still un-batched and a singleton, so no further batch forms.
    assert!(!conflict::batch_ready(&queue_path).unwrap());
    let stats = conflict::stats(&queue_path).unwrap();
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.batched, 2);
    assert_eq!(stats.batches, 1);

    conflict::update_batch_status(&queue_path, &lock_path, &batch_id, BatchStatus::Resolving).unwrap();
    conflict::update_batch_status(&queue_path, &lock_path, &batch_id, BatchStatus::Resolved).unwrap();
    let resolved = conflict::get_batch(&queue_path, &batch_id).unwrap().unwrap();
    assert_eq!(resolved.status, BatchStatus::Resolved);

    conflict::cleanup_batch(&queue_path, &lock_path, &batch_id).unwrap();
    assert!(conflict::get_batch(&queue_path, &batch_id).unwrap().is_none());
    let stats = conflict::stats(&queue_path).unwrap();
    assert_eq!(stats.queued, 1);
    assert_eq!(stats.batched, 0);
    assert_eq!(stats.batches, 0);
}

#[test]
fn adding_the_same_entry_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("queue.json");
    let lock_path = dir.path().join("queue.lock");

    let e = entry("TASK-0001", &["src/lib.rs"]);
    conflict::add(&queue_path, &lock_path, e.clone()).unwrap();
    conflict::add(&queue_path, &lock_path, e).unwrap();

    let stats = conflict::stats(&queue_path).unwrap();
    assert_eq!(stats.queued, 1);
}

#[test]
fn removing_a_worker_drops_it_from_future_grouping() {
    let dir = tempfile::tempdir().unwrap();
    let queue_path = dir.path().join("queue.json");
    let lock_path = dir.path().join("queue.lock");

    conflict::add(&queue_path, &lock_path, entry("TASK-0001", &["src/lib.rs"])).unwrap();
    conflict::add(&queue_path, &lock_path, entry("TASK-0002", &["src/lib.rs"])).unwrap();
    assert!(conflict::batch_ready(&queue_path).unwrap());

    conflict::remove(&queue_path, &lock_path, &TaskId::new("TASK-0002").unwrap()).unwrap();
    assert!(!conflict::batch_ready(&queue_path).unwrap());
}
