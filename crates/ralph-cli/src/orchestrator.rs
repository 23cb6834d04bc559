//! The tick loop: wires the Task Board Parser, Ready-Task Scheduler,
//! Worker Pool, Pipeline Engine, Lifecycle Engine, Conflict Queue, and
//! Resume Controller together into one pass over the project's `.ralph/`
//! tree.
//!
//! One call to [`Orchestrator::tick`] is one admission-and-drive pass:
//! admit as many ready tasks as capacity allows, run each admitted
//! worker's pipeline to completion/abort/stop, and dispatch the lifecycle
//! event the outcome implies. `ralph run` calls `tick` in a loop; `ralph
//! status` and friends read the same files without calling it at all.

use std::borrow::Cow;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use ralph_core::agent;
use ralph_core::board::{self, Task};
use ralph_core::conflict;
use ralph_core::events::{self, EventSink, JsonlEventBus};
use ralph_core::lifecycle::{
    EffectContext, EffectRegistry, GuardRegistry, LifecycleEngine, LifecycleSpec, LifecycleState,
    needs_startup_recovery, startup_recovery_event,
};
use ralph_core::model::{Priority, TaskId, TaskStatus, WorkerId};
use ralph_core::pipeline::{PipelineConfig, PipelineDriver, PipelineOutcome, PipelineState};
use ralph_core::pool::{self, WorkerKind};
use ralph_core::resume::{self, ResumeDecision, ResumeState};
use ralph_core::scheduler::{self, SchedulerConfig};
use ralph_git::{CliGitRepo, GitRepo};

use crate::agent_runtime::CliAgentRuntime;
use crate::config::{self, AgentsConfig, WorkerCapacity};
use crate::paths::{RalphPaths, WorkerPaths};
use crate::violations::ViolationsLog;

/// Lower bound for the synthetic pool-slot identifiers `spawn_worker`
/// hands to [`pool::add`]. One orchestrator process drives many concurrent
/// workers itself rather than forking a child per worker, so there is no
/// real OS PID to key a worker's pool entry on; staying above any realistic
/// PID keeps these slots visually distinguishable from the entries
/// `reconcile_startup` dealt with under the old PID-keyed scheme.
const POOL_SLOT_BASE: u32 = 1 << 30;

/// What happened to one admitted worker during a tick.
#[derive(Debug)]
pub struct WorkerTickResult {
    pub worker_id: WorkerId,
    pub task_id: TaskId,
    pub outcome: PipelineOutcome,
    pub lifecycle_event: String,
    /// The Resume Controller's decision, if the pipeline aborted.
    pub resume_decision: Option<ResumeDecision>,
    /// An agent-internal-failure exit code (56-63), if one was surfaced by
    /// the pipeline's abort reason.
    pub agent_internal_failure: Option<i32>,
}

/// Summary of one `tick` call, for `ralph run`'s progress reporting.
#[derive(Debug, Default)]
pub struct TickReport {
    pub admitted: Vec<TaskId>,
    pub ran: Vec<WorkerTickResult>,
    pub batches_formed: usize,
}

pub struct Orchestrator {
    paths: RalphPaths,
    git: CliGitRepo,
    agents: AgentsConfig,
    capacity: WorkerCapacity,
    lifecycle_spec: LifecycleSpec,
    guards: GuardRegistry,
    effects: EffectRegistry,
    default_pipeline: PipelineConfig,
    scheduler_config: SchedulerConfig,
    events: JsonlEventBus,
    violations: ViolationsLog,
    defer_cooldown_seconds: u64,
    next_pool_slot: std::sync::atomic::AtomicU32,
}

impl Orchestrator {
    /// Load every config file and bind the lifecycle engine for a project
    /// rooted at `root`.
    ///
    /// # Errors
    /// Returns an error if any required config is missing or invalid.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let paths = RalphPaths::new(root);
        let agents = config::load_agents(&paths)?;
        let lifecycle_config = config::load_worker_lifecycle(&paths)?;
        let lifecycle_spec = LifecycleSpec::load(&paths.lifecycle_spec())
            .context("loading config/worker-lifecycle.json")?;
        lifecycle_spec.validate().context("validating worker-lifecycle.json")?;
        let guards = GuardRegistry::with_defaults();
        let effects = EffectRegistry::with_defaults();
        // bind() only borrows the spec/registries to check closure; we
        // re-bind per dispatch call since LifecycleEngine borrows them.
        LifecycleEngine::bind(&lifecycle_spec, &guards, &effects)
            .context("binding lifecycle engine")?;
        let default_pipeline = config::load_default_pipeline(&paths)?;

        std::fs::create_dir_all(paths.logs_dir()).context("creating .ralph/logs")?;
        std::fs::create_dir_all(paths.orchestrator_dir()).context("creating .ralph/orchestrator")?;
        let events = JsonlEventBus::new(paths.events_log(), paths.events_log_lock());
        let violations = ViolationsLog::new(paths.violations_log(), paths.logs_dir().join(".violations.log.lock"));
        let next_pool_slot = Self::seed_pool_slot(&paths)?;

        Ok(Self {
            git: CliGitRepo::new(paths.root()),
            capacity: lifecycle_config.capacity,
            agents,
            lifecycle_spec,
            guards,
            effects,
            default_pipeline,
            scheduler_config: SchedulerConfig::default(),
            events,
            violations,
            defer_cooldown_seconds: resume::DEFAULT_DEFER_COOLDOWN_SECONDS,
            next_pool_slot: std::sync::atomic::AtomicU32::new(next_pool_slot),
            paths,
        })
    }

    /// High-water mark of synthetic pool slots already on disk, so a
    /// restarted orchestrator doesn't hand out a slot a still-registered
    /// (not yet reconciled) entry already holds.
    fn seed_pool_slot(paths: &RalphPaths) -> Result<u32> {
        let mut max = None;
        pool::foreach(&paths.pool(), None, |entry| {
            if entry.pid >= POOL_SLOT_BASE {
                max = Some(max.map_or(entry.pid, |m: u32| m.max(entry.pid)));
            }
        })
        .context("scanning worker pool for synthetic slot high-water mark")?;
        Ok(max.map_or(POOL_SLOT_BASE, |m| m + 1))
    }

    /// Allocate a pool-slot identifier unique for this orchestrator's
    /// lifetime, standing in for an OS PID (see [`POOL_SLOT_BASE`]).
    fn next_pool_slot(&self) -> u32 {
        self.next_pool_slot.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    #[must_use]
    pub fn paths(&self) -> &RalphPaths {
        &self.paths
    }

    #[must_use]
    pub fn event_sink(&self) -> &dyn EventSink {
        &self.events
    }

    /// Reconcile the worker pool against the live process table: any entry
    /// whose PID is no longer running is dropped, and if its worker was in
    /// a `running`-kind lifecycle state, a synthetic recovery event is
    /// dispatched.
    ///
    /// # Errors
    /// Propagates I/O, lock, or lifecycle-dispatch errors.
    pub fn recover_startup(&self) -> Result<Vec<WorkerId>> {
        let orphaned = pool::reconcile_startup(&self.paths.pool(), &self.paths.pool_lock(), process_is_alive)
            .context("reconciling worker pool at startup")?;

        let mut recovered = Vec::new();
        for entry in orphaned {
            let worker_id = WorkerId::new(&entry.task_id, 0);
            let worker_dir = self.paths.ralph_dir().join("workers");
            let worker_dir = find_worker_dir_for_task(&worker_dir, &entry.task_id)
                .unwrap_or_else(|| worker_dir.join(format!("worker-{}-0", entry.task_id.as_str())));

            let state_path = worker_dir.join("lifecycle-state.json");
            let Some(mut state) = LifecycleState::load(&state_path)? else {
                continue;
            };
            if !needs_startup_recovery(&self.lifecycle_spec, &state.state) {
                continue;
            }
            let event_name = startup_recovery_event(&state.state);
            let ctx = self.effect_context(&worker_dir, entry.task_id.clone());
            let engine = LifecycleEngine::bind(&self.lifecycle_spec, &self.guards, &self.effects)?;
            engine.emit(&mut state, &ctx, event_name, &serde_json::Value::Null, &self.events)?;
            state.save(&state_path)?;
            self.violations.record(
                &self.events,
                worker_id.as_str(),
                "crash_recovery",
                &format!("orphaned worker resumed via {event_name}"),
            )?;
            recovered.push(worker_id);
        }
        Ok(recovered)
    }

    /// One admission-and-drive pass.
    ///
    /// # Errors
    /// Propagates any component error; a single worker's failure does not
    /// abort the whole tick (its error is logged as a violation and the
    /// loop continues to the next admitted worker).
    pub fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();
        let admitted = self.admit_ready_workers()?;
        report.admitted = admitted.iter().map(|(_, t)| t.clone()).collect();

        for (worker_id, task_id) in admitted {
            match self.run_worker(&worker_id, &task_id) {
                Ok(result) => report.ran.push(result),
                Err(e) => {
                    self.violations.record(&self.events, worker_id.as_str(), "worker_run_failed", &e.to_string())?;
                }
            }
        }

        report.batches_formed = self.process_conflict_queue()?;
        Ok(report)
    }

    fn effect_context<'a>(&'a self, worker_dir: &std::path::Path, task_id: TaskId) -> EffectContext<'a> {
        EffectContext {
            worker_dir: worker_dir.to_path_buf(),
            task_id,
            board_path: self.paths.board(),
            board_lock_path: self.paths.board_lock(),
            conflict_queue_path: Some(self.paths.conflict_queue()),
            conflict_lock_path: Some(self.paths.conflict_queue_lock()),
            git: Some(&self.git),
            max_merge_attempts: ralph_core::lifecycle::DEFAULT_MAX_MERGE_ATTEMPTS,
            max_recovery_attempts: ralph_core::lifecycle::DEFAULT_MAX_RECOVERY_ATTEMPTS,
        }
    }

    /// Admit as many ready, resume-eligible tasks as the worker pool has
    /// capacity for, creating each one's worktree and worker directory, and
    /// reuse the pool's remaining capacity to continue any in-progress
    /// worker whose Resume Controller decision (RETRY, once its rewound
    /// checkpoint is in place, or DEFER, once its cooldown has elapsed)
    /// made it eligible for another run.
    fn admit_ready_workers(&self) -> Result<Vec<(WorkerId, TaskId)>> {
        let tasks = board::parse_all(&self.paths.board()).context("parsing kanban board")?;
        let now = SystemTime::now();
        let ready_since = scheduler::update_ready_since(&tasks, &self.paths.task_ready_since(), now)
            .context("updating ready-since map")?;
        let ranked = scheduler::ready_tasks(&tasks, &ready_since, &self.paths.plans_dir(), now, &self.scheduler_config);
        let now_s = now_secs();

        let mut admitted = Vec::new();
        for (_, task_id) in ranked {
            if !pool::has_capacity(&self.paths.pool(), WorkerKind::Main, self.capacity.main)? {
                break;
            }
            let resume_path = self.resume_state_path_for(&task_id);
            let resume_state = ResumeState::load_or_default(&resume_path)?;
            if !resume_state.eligible_for_scheduling(now_s) {
                continue;
            }

            let epoch = self.next_epoch(&task_id)?;
            let worker_id = WorkerId::new(&task_id, epoch);
            self.spawn_worker(&worker_id, &task_id)?;
            admitted.push((worker_id, task_id));
        }

        for task in &tasks {
            if task.status != TaskStatus::InProgress {
                continue;
            }
            if !pool::has_capacity(&self.paths.pool(), WorkerKind::Main, self.capacity.main)? {
                break;
            }
            if let Some((worker_id, task_id)) = self.admit_continuation(&task.id, now_s)? {
                admitted.push((worker_id, task_id));
            }
        }
        Ok(admitted)
    }

    /// Re-admit an in-progress task's existing worker (same worker
    /// directory, branch, and workspace, never a new epoch) for another
    /// pipeline run, provided it aborted previously, its Resume Controller
    /// decision left it non-terminal, and that decision is now eligible
    /// (RETRY is immediately eligible; DEFER only once its cooldown
    /// expires). A task with no resume-state file yet hasn't aborted at
    /// all, so it's left alone: it's either mid-admission this same tick
    /// or its last outcome never reached the Resume Controller.
    fn admit_continuation(&self, task_id: &TaskId, now_s: u64) -> Result<Option<(WorkerId, TaskId)>> {
        let resume_path = self.resume_state_path_for(task_id);
        if !resume_path.exists() {
            return Ok(None);
        }
        let resume_state = ResumeState::load_or_default(&resume_path)?;
        if !resume_state.eligible_for_scheduling(now_s) {
            return Ok(None);
        }
        if pool::find_by_task(&self.paths.pool(), task_id)?.is_some() {
            return Ok(None);
        }

        let workers_dir = self.paths.ralph_dir().join("workers");
        let Some(worker_dir) = find_worker_dir_for_task(&workers_dir, task_id) else {
            return Ok(None);
        };
        let Some(name) = worker_dir.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        let Ok(worker_id) = WorkerId::try_from(name.to_owned()) else {
            return Ok(None);
        };

        let slot = self.next_pool_slot();
        pool::add(&self.paths.pool(), &self.paths.pool_lock(), slot, WorkerKind::Main, task_id.clone())
            .context("re-admitting continued worker to pool")?;
        events::emit(
            &self.events,
            "worker.resumed",
            serde_json::json!({"worker_id": worker_id.as_str(), "task_id": task_id.as_str()}),
        )?;
        Ok(Some((worker_id, task_id.clone())))
    }

    fn resume_state_path_for(&self, task_id: &TaskId) -> PathBuf {
        // Resume state is keyed by task, not by worker epoch, so a worker
        // that gets re-admitted after a DEFER still shares its budget.
        self.paths.orchestrator_dir().join("resume").join(format!("{}.json", task_id.as_str()))
    }

    fn next_epoch(&self, task_id: &TaskId) -> Result<u64> {
        let workers_dir = self.paths.ralph_dir().join("workers");
        if !workers_dir.exists() {
            return Ok(0);
        }
        let prefix = format!("worker-{}-", task_id.as_str());
        let mut max_epoch = None;
        for entry in std::fs::read_dir(&workers_dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(epoch_str) = name.strip_prefix(&prefix) {
                if let Ok(epoch) = epoch_str.parse::<u64>() {
                    max_epoch = Some(max_epoch.map_or(epoch, |m: u64| m.max(epoch)));
                }
            }
        }
        Ok(max_epoch.map_or(0, |m| m + 1))
    }

    fn spawn_worker(&self, worker_id: &WorkerId, task_id: &TaskId) -> Result<()> {
        let worker_dir = self.paths.worker_dir(worker_id);
        let worker_paths = WorkerPaths::new(worker_dir.clone());
        std::fs::create_dir_all(&worker_dir).context("creating worker directory")?;

        // The branch is keyed by this worker's own epoch, not just the
        // task ID. `next_epoch` hands out a fresh one on every call, so
        // this name can never collide with a prior worker's branch for
        // the same task.
        let (_, epoch) = worker_id.parse_parts().context("parsing worker ID")?;
        let branch = format!("task/{}-{epoch}", task_id.as_str());
        self.git
            .create_branch(&branch, "HEAD")
            .map_err(|e| anyhow::anyhow!("creating branch {branch}: {e}"))?;
        self.git
            .worktree_add(&worker_paths.workspace(), &branch)
            .map_err(|e| anyhow::anyhow!("adding worktree for {}: {e}", worker_id.as_str()))?;

        board::set_status(&self.paths.board(), &self.paths.board_lock(), task_id, TaskStatus::InProgress)
            .context("marking task in-progress")?;

        let slot = self.next_pool_slot();
        pool::add(&self.paths.pool(), &self.paths.pool_lock(), slot, WorkerKind::Main, task_id.clone())
            .context("adding worker to pool")?;

        let initial_state = self
            .lifecycle_spec
            .initial_state()
            .context("lifecycle spec has no initial state")?
            .to_owned();
        let mut state = LifecycleState::new(&initial_state);
        let ctx = self.effect_context(&worker_dir, task_id.clone());
        let engine = LifecycleEngine::bind(&self.lifecycle_spec, &self.guards, &self.effects)?;
        engine.emit(&mut state, &ctx, "worker.spawned", &serde_json::Value::Null, &self.events)?;
        state.save(&worker_paths.lifecycle_state())?;

        events::emit(
            &self.events,
            "worker.spawned",
            serde_json::json!({"worker_id": worker_id.as_str(), "task_id": task_id.as_str()}),
        )?;
        Ok(())
    }

    /// Drive one admitted worker's pipeline and dispatch the lifecycle
    /// event its outcome implies.
    fn run_worker(&self, worker_id: &WorkerId, task_id: &TaskId) -> Result<WorkerTickResult> {
        let worker_dir = self.paths.worker_dir(worker_id);
        let worker_paths = WorkerPaths::new(worker_dir.clone());
        let runtime = CliAgentRuntime::new(self.agents.clone());

        let mut pipeline_state = PipelineState::load_or_default(&worker_paths.pipeline_config())
            .context("loading pipeline state")?;
        let driver = PipelineDriver::new(
            &self.default_pipeline,
            &runtime,
            Some(&self.git),
            worker_paths.workspace(),
            worker_dir.clone(),
            3600,
        );
        let outcome = driver.run(&mut pipeline_state, &self.events).context("running pipeline")?;

        let (event_name, payload) = match &outcome {
            PipelineOutcome::Completed => ("pipeline.completed".to_owned(), serde_json::Value::Null),
            PipelineOutcome::Stopped { step_id } => {
                ("pipeline.stopped".to_owned(), serde_json::json!({"step_id": step_id}))
            }
            PipelineOutcome::Aborted { step_id, reason } => {
                ("pipeline.aborted".to_owned(), serde_json::json!({"step_id": step_id, "reason": reason}))
            }
        };

        let state_path = worker_paths.lifecycle_state();
        let mut state = LifecycleState::load(&state_path)?.unwrap_or_else(|| LifecycleState::new("none"));
        let ctx = self.effect_context(&worker_dir, task_id.clone());
        let engine = LifecycleEngine::bind(&self.lifecycle_spec, &self.guards, &self.effects)?;
        engine.emit(&mut state, &ctx, &event_name, &payload, &self.events)?;
        state.save(&state_path)?;

        let mut resume_decision = None;
        let mut agent_internal_failure = None;
        if let PipelineOutcome::Aborted { step_id, reason } = &outcome {
            agent_internal_failure = agent::internal_failure_code_in_reason(reason);
            resume_decision = Some(self.run_resume_controller(worker_id, task_id, &worker_paths, step_id, reason)?);
        }

        // Release the pool slot unconditionally: Completed, Stopped, and
        // every Aborted resume decision (terminal ABORT/COMPLETE, or a
        // non-terminal RETRY/DEFER awaiting its own later continuation)
        // all mean this worker isn't occupying a concurrent run anymore.
        // A RETRY/DEFER re-acquires a fresh slot through
        // `admit_continuation` once it becomes eligible again.
        if let Some(slot) = pool::find_by_task(&self.paths.pool(), task_id)? {
            pool::remove(&self.paths.pool(), &self.paths.pool_lock(), slot).context("releasing worker from pool")?;
        }

        Ok(WorkerTickResult {
            worker_id: worker_id.clone(),
            task_id: task_id.clone(),
            outcome,
            lifecycle_event: event_name,
            resume_decision,
            agent_internal_failure,
        })
    }

    /// Invoke the Resume Controller: run the configured
    /// `resume-judge` agent, parse its decision, and apply it to the
    /// worker's resume budget and (for ABORT/COMPLETE) the board.
    fn run_resume_controller(
        &self,
        worker_id: &WorkerId,
        task_id: &TaskId,
        worker_paths: &WorkerPaths,
        failing_step_id: &str,
        reason: &str,
    ) -> Result<ResumeDecision> {
        let resume_path = self.resume_state_path_for(task_id);
        if let Some(parent) = resume_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let resume_lock_path = resume_path.with_extension("json.lock");
        let state = ResumeState::load_or_default(&resume_path)?;

        let decision = self
            .invoke_resume_judge(worker_paths, failing_step_id, reason)
            .unwrap_or_else(|_| {
                ResumeDecision::from_exit_code(
                    1,
                    &self.default_pipeline.name,
                    failing_step_id,
                    state.attempt_count,
                    state.max_attempts,
                )
            });

        if let ResumeDecision::Retry { .. } = &decision {
            self.rewind_pipeline_checkpoint(worker_paths, &decision, failing_step_id)
                .context("rewinding pipeline checkpoint for retry")?;
        }

        let now = now_secs();
        resume::apply_decision(
            &resume_path,
            &resume_lock_path,
            &self.paths.board(),
            &self.paths.board_lock(),
            task_id,
            &decision,
            now,
            self.defer_cooldown_seconds,
        )
        .context("applying resume decision")?;

        events::emit(
            &self.events,
            "resume.decided",
            serde_json::json!({"worker_id": worker_id.as_str(), "task_id": task_id.as_str(), "decision": format!("{decision:?}")}),
        )?;
        Ok(decision)
    }

    /// Resolve the pipeline a RETRY decision names, validate its target step
    /// is at or before the one that just aborted, and rewind the worker's
    /// checkpoint to it.
    fn rewind_pipeline_checkpoint(
        &self,
        worker_paths: &WorkerPaths,
        decision: &ResumeDecision,
        failing_step_id: &str,
    ) -> Result<()> {
        let ResumeDecision::Retry { pipeline, .. } = decision else {
            bail!("rewind_pipeline_checkpoint called on a non-RETRY decision");
        };
        let config: Cow<'_, PipelineConfig> = if *pipeline == self.default_pipeline.name {
            Cow::Borrowed(&self.default_pipeline)
        } else {
            Cow::Owned(config::load_named_pipeline(&self.paths, pipeline)?)
        };
        let failing_step_idx = config.step_index(failing_step_id).with_context(|| {
            format!("failing step '{failing_step_id}' does not exist in pipeline '{}'", config.name)
        })?;
        let target_idx = decision.validate_retry_target(&config, failing_step_idx)?;

        let checkpoint_path = worker_paths.pipeline_config();
        let mut state = PipelineState::load_or_default(&checkpoint_path)?;
        state.rewind_to(target_idx);
        state.save(&checkpoint_path)?;
        Ok(())
    }

    fn invoke_resume_judge(
        &self,
        worker_paths: &WorkerPaths,
        failing_step_id: &str,
        reason: &str,
    ) -> Result<ResumeDecision> {
        let Ok(agent) = self.agents.get("resume-judge") else {
            // No judge configured: fall back to the exit-code-less implicit
            // rule (budget check via from_exit_code's default arm).
            bail!("no resume-judge agent configured");
        };
        let decision_path = worker_paths.resume_decision();
        let legacy_path = worker_paths.resume_step_legacy();

        let status = std::process::Command::new(&agent.command)
            .args(&agent.args)
            .arg("--failing-step")
            .arg(failing_step_id)
            .arg("--reason")
            .arg(reason)
            .arg("--decision-out")
            .arg(&decision_path)
            .current_dir(worker_paths.dir())
            .status()
            .context("spawning resume-judge agent")?;
        if !status.success() {
            bail!("resume-judge exited with {status}");
        }

        if decision_path.exists() {
            let text = std::fs::read_to_string(&decision_path)?;
            ResumeDecision::parse(text.trim()).map_err(Into::into)
        } else if legacy_path.exists() {
            let text = std::fs::read_to_string(&legacy_path)?;
            ResumeDecision::parse_legacy(&text, &self.default_pipeline.name).map_err(Into::into)
        } else {
            bail!("resume-judge produced neither resume-decision.json nor resume-step.txt")
        }
    }

    /// Group queued conflict-queue entries by overlapping `changed_files`
    /// and form batches for every group ready to merge.
    fn process_conflict_queue(&self) -> Result<usize> {
        let queue_path = self.paths.conflict_queue();
        if !queue_path.exists() {
            return Ok(0);
        }
        let groups = conflict::group_related(&queue_path).context("grouping conflict-queue entries")?;
        let mut formed = 0;
        for group in groups {
            if group.len() < 2 {
                continue;
            }
            let batch_id = conflict::create_batch(&queue_path, &self.paths.conflict_queue_lock(), group.clone())
                .context("creating conflict batch")?;
            events::emit(
                &self.events,
                "conflict.batch_formed",
                serde_json::json!({"batch_id": batch_id, "task_ids": group.iter().map(TaskId::as_str).collect::<Vec<_>>()}),
            )?;
            formed += 1;
        }
        Ok(formed)
    }
}

fn find_worker_dir_for_task(workers_dir: &std::path::Path, task_id: &TaskId) -> Option<PathBuf> {
    let prefix = format!("worker-{}-", task_id.as_str());
    std::fs::read_dir(workers_dir).ok()?.filter_map(Result::ok).find_map(|entry| {
        let name = entry.file_name();
        name.to_string_lossy().starts_with(&prefix).then(|| entry.path())
    })
}

#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    use nix::sys::signal;
    use nix::unistd::Pid;

    // `kill` with no signal performs only the existence/permission check.
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    false
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Non-default-priority helper kept for `ralph inspect`'s "why is this task
/// not ready" explanation; re-exported so commands don't reach into
/// `ralph_core::scheduler` directly for a single constant.
#[must_use]
pub fn priority_label(priority: Priority) -> &'static str {
    match priority {
        Priority::Critical => "CRITICAL",
        Priority::High => "HIGH",
        Priority::Medium => "MEDIUM",
        Priority::Low => "LOW",
    }
}

/// Re-exported for `ralph status`'s board summary.
#[must_use]
pub fn count_by_status(tasks: &[Task], status: TaskStatus) -> usize {
    tasks.iter().filter(|t| t.status == status).count()
}
