//! The `.ralph/` and `config/` file layout, centralized so every
//! command and the orchestrator tick loop agree on where things live.

use std::path::{Path, PathBuf};

use ralph_core::model::WorkerId;

/// Every path the orchestrator reads or writes, rooted at a project
/// directory (the directory containing `.ralph/` and `config/`).
#[derive(Clone, Debug)]
pub struct RalphPaths {
    root: PathBuf,
}

impl RalphPaths {
    /// Root the layout at `root` (the project's top-level directory).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The project root itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `.ralph/`
    #[must_use]
    pub fn ralph_dir(&self) -> PathBuf {
        self.root.join(".ralph")
    }

    /// `.ralph/kanban.md`
    #[must_use]
    pub fn board(&self) -> PathBuf {
        self.ralph_dir().join("kanban.md")
    }

    /// The board's lock sibling.
    #[must_use]
    pub fn board_lock(&self) -> PathBuf {
        self.ralph_dir().join(".kanban.md.lock")
    }

    /// `.ralph/changelog.md`
    #[must_use]
    pub fn changelog(&self) -> PathBuf {
        self.ralph_dir().join("changelog.md")
    }

    /// `.ralph/logs/`
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.ralph_dir().join("logs")
    }

    /// `.ralph/logs/events.jsonl`
    #[must_use]
    pub fn events_log(&self) -> PathBuf {
        self.logs_dir().join("events.jsonl")
    }

    /// Lock sibling for the events log.
    #[must_use]
    pub fn events_log_lock(&self) -> PathBuf {
        self.logs_dir().join(".events.jsonl.lock")
    }

    /// `.ralph/logs/audit.log`
    #[must_use]
    pub fn audit_log(&self) -> PathBuf {
        self.logs_dir().join("audit.log")
    }

    /// `.ralph/logs/violations.log`
    #[must_use]
    pub fn violations_log(&self) -> PathBuf {
        self.logs_dir().join("violations.log")
    }

    /// `.ralph/workers/<id>/`
    #[must_use]
    pub fn worker_dir(&self, id: &WorkerId) -> PathBuf {
        self.ralph_dir().join("workers").join(id.as_str())
    }

    /// All worker directories currently on disk.
    ///
    /// # Errors
    /// Propagates I/O errors other than a missing `workers/` directory.
    pub fn all_worker_dirs(&self) -> std::io::Result<Vec<PathBuf>> {
        let dir = self.ralph_dir().join("workers");
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                out.push(entry.path());
            }
        }
        Ok(out)
    }

    /// `.ralph/orchestrator/`
    #[must_use]
    pub fn orchestrator_dir(&self) -> PathBuf {
        self.ralph_dir().join("orchestrator")
    }

    /// `.ralph/orchestrator/orchestrator.pid`
    #[must_use]
    pub fn orchestrator_pid(&self) -> PathBuf {
        self.orchestrator_dir().join("orchestrator.pid")
    }

    /// `.ralph/orchestrator/pool.json`
    #[must_use]
    pub fn pool(&self) -> PathBuf {
        self.orchestrator_dir().join("pool.json")
    }

    /// Lock sibling for the pool index.
    #[must_use]
    pub fn pool_lock(&self) -> PathBuf {
        self.orchestrator_dir().join(".pool.json.lock")
    }

    /// `.ralph/orchestrator/task-ready-since.json`
    #[must_use]
    pub fn task_ready_since(&self) -> PathBuf {
        self.orchestrator_dir().join("task-ready-since.json")
    }

    /// `.ralph/orchestrator/sync-state.json`
    #[must_use]
    pub fn sync_state(&self) -> PathBuf {
        self.orchestrator_dir().join("sync-state.json")
    }

    /// `.ralph/orchestrator/conflict-registry.json` — alias for the
    /// conflict queue's canonical home at `.ralph/batches/queue.json`,
    /// kept as a distinct name since there are two conceptual locations; this
    /// implementation treats the batches file as authoritative and
    /// `conflict-registry.json` as a read-only mirror refreshed each tick.
    #[must_use]
    pub fn conflict_registry_mirror(&self) -> PathBuf {
        self.orchestrator_dir().join("conflict-registry.json")
    }

    /// `.ralph/orchestrator/pr-merge-state.json`
    #[must_use]
    pub fn pr_merge_state(&self) -> PathBuf {
        self.orchestrator_dir().join("pr-merge-state.json")
    }

    /// `.ralph/batches/queue.json`
    #[must_use]
    pub fn conflict_queue(&self) -> PathBuf {
        self.ralph_dir().join("batches").join("queue.json")
    }

    /// Lock sibling for the conflict queue.
    #[must_use]
    pub fn conflict_queue_lock(&self) -> PathBuf {
        self.ralph_dir().join("batches").join(".queue.json.lock")
    }

    /// `.ralph/plans/`
    #[must_use]
    pub fn plans_dir(&self) -> PathBuf {
        self.ralph_dir().join("plans")
    }

    /// `.ralph/plans/<id>.md`
    #[must_use]
    pub fn plan(&self, task_id: &str) -> PathBuf {
        self.plans_dir().join(format!("{task_id}.md"))
    }

    /// `.ralph/pipelines/<task-id>.json` — per-task pipeline overrides.
    #[must_use]
    pub fn pipeline_override(&self, task_id: &str) -> PathBuf {
        self.ralph_dir().join("pipelines").join(format!("{task_id}.json"))
    }

    /// `config/`
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    /// `config/pipeline.json` (the default pipeline)
    #[must_use]
    pub fn default_pipeline_config(&self) -> PathBuf {
        self.config_dir().join("pipeline.json")
    }

    /// `config/pipelines/<name>.json`
    #[must_use]
    pub fn named_pipeline_config(&self, name: &str) -> PathBuf {
        self.config_dir().join("pipelines").join(format!("{name}.json"))
    }

    /// `config/agents.json`
    #[must_use]
    pub fn agents_config(&self) -> PathBuf {
        self.config_dir().join("agents.json")
    }

    /// `config/worker-lifecycle.json`
    #[must_use]
    pub fn lifecycle_spec(&self) -> PathBuf {
        self.config_dir().join("worker-lifecycle.json")
    }

    /// `config/services.json`
    #[must_use]
    pub fn services_config(&self) -> PathBuf {
        self.config_dir().join("services.json")
    }
}

/// A worker's own sub-paths, relative to its directory.
#[derive(Clone, Debug)]
pub struct WorkerPaths {
    dir: PathBuf,
}

impl WorkerPaths {
    /// Root the worker's sub-paths at `dir` (`.ralph/workers/<id>/`).
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The worker's directory itself.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `workspace/` — the git worktree.
    #[must_use]
    pub fn workspace(&self) -> PathBuf {
        self.dir.join("workspace")
    }

    /// `prd.md`
    #[must_use]
    pub fn prd(&self) -> PathBuf {
        self.dir.join("prd.md")
    }

    /// `resume-state.json`
    #[must_use]
    pub fn resume_state(&self) -> PathBuf {
        self.dir.join("resume-state.json")
    }

    /// Lock sibling for the resume state.
    #[must_use]
    pub fn resume_state_lock(&self) -> PathBuf {
        self.dir.join(".resume-state.json.lock")
    }

    /// `pipeline-config.json`
    #[must_use]
    pub fn pipeline_config(&self) -> PathBuf {
        self.dir.join("pipeline-config.json")
    }

    /// `lifecycle-state.json`
    #[must_use]
    pub fn lifecycle_state(&self) -> PathBuf {
        self.dir.join("lifecycle-state.json")
    }

    /// `logs/<step>-<iter>.log`
    #[must_use]
    pub fn step_log(&self, step: &str, iter: u32) -> PathBuf {
        self.dir.join("logs").join(format!("{step}-{iter}.log"))
    }

    /// `summaries/<run>/<step>-<iter>-summary.txt`
    #[must_use]
    pub fn summary(&self, run: &str, step: &str, iter: u32) -> PathBuf {
        self.dir.join("summaries").join(run).join(format!("{step}-{iter}-summary.txt"))
    }

    /// `results/`
    #[must_use]
    pub fn results_dir(&self) -> PathBuf {
        self.dir.join("results")
    }

    /// `checkpoints/`
    #[must_use]
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.dir.join("checkpoints")
    }

    /// `conversations/<step>-<iter>.md`
    #[must_use]
    pub fn conversation(&self, step: &str, iter: u32) -> PathBuf {
        self.dir.join("conversations").join(format!("{step}-{iter}.md"))
    }

    /// `resume-step.txt` — legacy resume-decision format.
    #[must_use]
    pub fn resume_step_legacy(&self) -> PathBuf {
        self.dir.join("resume-step.txt")
    }

    /// `resume-decision.json` — the structured resume-decision format.
    #[must_use]
    pub fn resume_decision(&self) -> PathBuf {
        self.dir.join("resume-decision.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_dir_uses_the_worker_id_as_its_directory_name() {
        let paths = RalphPaths::new("/proj");
        let task = ralph_core::model::TaskId::new("A-1").unwrap();
        let worker = WorkerId::new(&task, 3);
        assert_eq!(paths.worker_dir(&worker), PathBuf::from("/proj/.ralph/workers/worker-A-1-3"));
    }

    #[test]
    fn config_paths_live_under_config_not_ralph_dir() {
        let paths = RalphPaths::new("/proj");
        assert_eq!(paths.agents_config(), PathBuf::from("/proj/config/agents.json"));
        assert_eq!(paths.lifecycle_spec(), PathBuf::from("/proj/config/worker-lifecycle.json"));
    }
}
