//! Ready-Task Scheduler.
//!
//! Computes, on demand, the priority-ordered set of tasks eligible to start
//! right now. Readiness aging is persisted under `.ralph/orchestrator/` so a
//! task's time-in-ready-state survives an orchestrator restart.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::board::Task;
use crate::error::Result;
use crate::fsio::{atomic_write_json, read_json};
use crate::model::{Priority, TaskId, TaskStatus};

/// Tunables for the effective-priority formula, with its usual defaults.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    /// Per-second reward for time spent ready.
    pub aging_factor: i64,
    /// Penalty applied when a sibling (same ID prefix) is pending/in-progress.
    pub sibling_penalty: i64,
    /// Bonus (as a negative contribution) when a plan artifact exists.
    pub plan_bonus: i64,
    /// Per-dependent bonus (as a negative contribution).
    pub dep_bonus: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            aging_factor: 7,
            sibling_penalty: 20_000,
            plan_bonus: 15_000,
            dep_bonus: 7_000,
        }
    }
}

/// Map of task ID to the unix-seconds timestamp it was first observed ready,
/// persisted at `.ralph/orchestrator/task-ready-since.json`.
pub type ReadySince = HashMap<TaskId, u64>;

fn now_secs(now: SystemTime) -> u64 {
    now.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// A task is ready iff it is pending and every dependency is complete.
#[must_use]
pub fn is_ready(task: &Task, by_id: &HashMap<&TaskId, &Task>) -> bool {
    task.status == TaskStatus::Pending && unsatisfied_deps_of(task, by_id).is_empty()
}

fn unsatisfied_deps_of<'a>(task: &'a Task, by_id: &HashMap<&TaskId, &Task>) -> Vec<&'a TaskId> {
    task.dependencies
        .iter()
        .filter(|dep| !matches!(by_id.get(dep), Some(t) if t.status == TaskStatus::Complete))
        .collect()
}

/// IDs of every dependency of `id` not yet complete (or missing entirely).
#[must_use]
pub fn unsatisfied_deps(tasks: &[Task], id: &TaskId) -> Vec<TaskId> {
    let by_id = index_by_id(tasks);
    let Some(task) = tasks.iter().find(|t| &t.id == id) else {
        return Vec::new();
    };
    unsatisfied_deps_of(task, &by_id).into_iter().cloned().collect()
}

/// IDs of every task that declares a dependency on `id`.
#[must_use]
pub fn dependents(tasks: &[Task], id: &TaskId) -> Vec<TaskId> {
    tasks
        .iter()
        .filter(|t| t.dependencies.iter().any(|d| d == id))
        .map(|t| t.id.clone())
        .collect()
}

/// IDs of every pending task with at least one unsatisfied dependency.
#[must_use]
pub fn blocked_tasks(tasks: &[Task]) -> Vec<TaskId> {
    let by_id = index_by_id(tasks);
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Pending && !unsatisfied_deps_of(t, &by_id).is_empty())
        .map(|t| t.id.clone())
        .collect()
}

fn index_by_id(tasks: &[Task]) -> HashMap<&TaskId, &Task> {
    tasks.iter().map(|t| (&t.id, t)).collect()
}

/// Load the persisted ready-since map, update it against the current ready
/// set (new entries stamped at `now`, stale entries dropped), persist it,
/// and return the refreshed map.
///
/// # Errors
/// Propagates I/O / JSON errors from the persisted file.
pub fn update_ready_since(
    tasks: &[Task],
    ready_since_path: &Path,
    now: SystemTime,
) -> Result<ReadySince> {
    let by_id = index_by_id(tasks);
    let mut ready_since: ReadySince = if ready_since_path.exists() {
        read_json(ready_since_path)?
    } else {
        ReadySince::new()
    };

    let currently_ready: Vec<&TaskId> = tasks.iter().filter(|t| is_ready(t, &by_id)).map(|t| &t.id).collect();
    let now_s = now_secs(now);

    for id in &currently_ready {
        ready_since.entry((*id).clone()).or_insert(now_s);
    }
    let ready_set: std::collections::HashSet<&TaskId> = currently_ready.into_iter().collect();
    ready_since.retain(|id, _| ready_set.contains(id));

    atomic_write_json(ready_since_path, &ready_since)?;
    Ok(ready_since)
}

/// Compute the priority-ordered list of ready tasks using the
/// effective-priority formula. Lower scores sort first; ties break
/// lexicographically on task ID.
#[must_use]
pub fn ready_tasks(
    tasks: &[Task],
    ready_since: &ReadySince,
    plans_dir: &Path,
    now: SystemTime,
    config: &SchedulerConfig,
) -> Vec<(i64, TaskId)> {
    let by_id = index_by_id(tasks);
    let now_s = now_secs(now);

    let prefix_counts: HashMap<&str, usize> = {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for t in tasks {
            if matches!(t.status, TaskStatus::Pending | TaskStatus::InProgress) {
                *counts.entry(t.id.prefix()).or_insert(0) += 1;
            }
        }
        counts
    };

    let dependents_count: HashMap<&TaskId, usize> = {
        let mut counts: HashMap<&TaskId, usize> = HashMap::new();
        for t in tasks {
            for dep in &t.dependencies {
                *counts.entry(dep).or_insert(0) += 1;
            }
        }
        counts
    };

    let mut scored: Vec<(i64, TaskId)> = tasks
        .iter()
        .filter(|t| is_ready(t, &by_id))
        .map(|t| {
            let score = effective_priority(
                t,
                ready_since.get(&t.id).copied().unwrap_or(now_s),
                now_s,
                prefix_counts.get(t.id.prefix()).copied().unwrap_or(0),
                dependents_count.get(&t.id).copied().unwrap_or(0),
                plans_dir,
                config,
            );
            (score, t.id.clone())
        })
        .collect();

    scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    scored
}

fn effective_priority(
    task: &Task,
    ready_since_s: u64,
    now_s: u64,
    sibling_count: usize,
    dependents: usize,
    plans_dir: &Path,
    config: &SchedulerConfig,
) -> i64 {
    let base = base_score(task.priority);
    let age = config.aging_factor * now_s.saturating_sub(ready_since_s) as i64;
    // `sibling_count` includes this task itself; a sibling exists iff another
    // pending/in-progress task shares the prefix, i.e. count > 1.
    let sib = if sibling_count > 1 { config.sibling_penalty } else { 0 };
    let plan_exists = plans_dir.join(format!("{}.md", task.id)).exists();
    let plan = if plan_exists { -config.plan_bonus } else { 0 };
    let deps = -config.dep_bonus * dependents as i64;
    base - age + sib + plan + deps
}

fn base_score(priority: Priority) -> i64 {
    priority.base_score()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskStatus;
    use std::time::Duration;

    fn task(id: &str, status: TaskStatus, priority: Priority, deps: &[&str]) -> Task {
        Task {
            id: TaskId::new(id).unwrap(),
            status,
            title: "t".to_owned(),
            description: None,
            priority,
            dependencies: deps.iter().map(|d| TaskId::new(*d).unwrap()).collect(),
            extra_fields: Vec::new(),
        }
    }

    #[test]
    fn ready_tasks_excludes_blocked() {
        let tasks = vec![
            task("A-1", TaskStatus::Pending, Priority::High, &[]),
            task("A-2", TaskStatus::Pending, Priority::High, &["A-1"]),
        ];
        let by_id = index_by_id(&tasks);
        assert!(is_ready(&tasks[0], &by_id));
        assert!(!is_ready(&tasks[1], &by_id));
        assert_eq!(unsatisfied_deps(&tasks, &TaskId::new("A-2").unwrap()), vec![TaskId::new("A-1").unwrap()]);
    }

    #[test]
    fn dependency_completion_unblocks() {
        let tasks = vec![
            task("A-1", TaskStatus::Complete, Priority::High, &[]),
            task("A-2", TaskStatus::Pending, Priority::High, &["A-1"]),
        ];
        let by_id = index_by_id(&tasks);
        assert!(is_ready(&tasks[1], &by_id));
    }

    #[test]
    fn priority_monotonicity() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = vec![
            task("A-1", TaskStatus::Pending, Priority::Low, &[]),
            task("A-2", TaskStatus::Pending, Priority::Critical, &[]),
        ];
        let ready_since = ReadySince::new();
        let ranked = ready_tasks(&tasks, &ready_since, dir.path(), SystemTime::now(), &SchedulerConfig::default());
        assert_eq!(ranked[0].1, TaskId::new("A-2").unwrap());
        assert_eq!(ranked[1].1, TaskId::new("A-1").unwrap());
    }

    #[test]
    fn sibling_penalty_applies_when_prefix_shared() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = vec![
            task("A-1", TaskStatus::Pending, Priority::High, &[]),
            task("A-2", TaskStatus::InProgress, Priority::High, &[]),
            task("B-1", TaskStatus::Pending, Priority::High, &[]),
        ];
        let ready_since = ReadySince::new();
        let config = SchedulerConfig::default();
        let ranked = ready_tasks(&tasks, &ready_since, dir.path(), SystemTime::now(), &config);
        // Only A-1 and B-1 are pending (ready); A-1 has a sibling (A-2 in progress).
        let a1_score = ranked.iter().find(|(_, id)| id.as_str() == "A-1").unwrap().0;
        let b1_score = ranked.iter().find(|(_, id)| id.as_str() == "B-1").unwrap().0;
        assert!(a1_score > b1_score);
    }

    #[test]
    fn dependents_bonus_favors_tasks_with_more_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = vec![
            task("A-1", TaskStatus::Pending, Priority::High, &[]),
            task("A-2", TaskStatus::Pending, Priority::High, &["A-1"]),
            task("A-3", TaskStatus::Pending, Priority::High, &[]),
        ];
        let ready_since = ReadySince::new();
        let config = SchedulerConfig::default();
        let ranked = ready_tasks(&tasks, &ready_since, dir.path(), SystemTime::now(), &config);
        let a1_score = ranked.iter().find(|(_, id)| id.as_str() == "A-1").unwrap().0;
        let a3_score = ranked.iter().find(|(_, id)| id.as_str() == "A-3").unwrap().0;
        assert!(a1_score < a3_score, "A-1 has a dependent (A-2), so it should rank better");
    }

    #[test]
    fn aging_reduces_score_over_time() {
        let dir = tempfile::tempdir().unwrap();
        let tasks = vec![task("A-1", TaskStatus::Pending, Priority::High, &[])];
        let now = SystemTime::now();
        let mut ready_since = ReadySince::new();
        ready_since.insert(TaskId::new("A-1").unwrap(), now_secs(now - Duration::from_secs(1000)));
        let config = SchedulerConfig::default();
        let aged = ready_tasks(&tasks, &ready_since, dir.path(), now, &config)[0].0;
        let fresh_since: ReadySince = [(TaskId::new("A-1").unwrap(), now_secs(now))].into_iter().collect();
        let fresh = ready_tasks(&tasks, &fresh_since, dir.path(), now, &config)[0].0;
        assert!(aged < fresh);
    }

    #[test]
    fn update_ready_since_persists_and_drops_stale_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task-ready-since.json");
        let now = SystemTime::now();
        let tasks = vec![task("A-1", TaskStatus::Pending, Priority::High, &[])];
        let map = update_ready_since(&tasks, &path, now).unwrap();
        assert!(map.contains_key(&TaskId::new("A-1").unwrap()));

        let tasks2 = vec![task("A-1", TaskStatus::Complete, Priority::High, &[])];
        let map2 = update_ready_since(&tasks2, &path, now).unwrap();
        assert!(!map2.contains_key(&TaskId::new("A-1").unwrap()));
    }
}
