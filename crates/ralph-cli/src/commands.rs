//! Subcommand implementations. Each function owns one `Command` variant's
//! logic and returns its process exit code; `main.rs` only dispatches and
//! calls `std::process::exit`.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use ralph_core::board;
use ralph_core::lifecycle::{GuardRegistry, LifecycleEngine, LifecycleSpec};
use ralph_core::model::{TaskId, TaskStatus};
use ralph_core::resume::{ResumeDecision, ResumeState};
use serde_json::json;

use crate::cli::WorkerCommand;
use crate::config;
use crate::format::{self, OutputFormat};
use crate::orchestrator::{self, Orchestrator};
use crate::paths::{RalphPaths, WorkerPaths};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_GENERIC_ERROR: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_VALIDATE_ERROR: i32 = 4;
pub const EXIT_NO_RALPH_DIR: i32 = 5;
/// A worker's pipeline was aborted and the Resume Controller gave up on it.
pub const EXIT_RESUME_ABORT: i32 = 65;
/// A worker was deferred; not terminal, but worth distinguishing in the
/// process exit code when `ralph run` stops right after it happens.
pub const EXIT_RESUME_DEFER: i32 = 66;
/// A worker's pipeline completed and the Resume Controller marked it done.
pub const EXIT_RESUME_COMPLETE: i32 = 67;

/// Map a terminal resume decision to the process exit code it implies.
/// `RETRY` isn't terminal from the process's point of view — the worker is
/// still eligible for scheduling — so it has no override.
fn resume_decision_exit_code(decision: &ResumeDecision) -> Option<i32> {
    match decision {
        ResumeDecision::Abort => Some(EXIT_RESUME_ABORT),
        ResumeDecision::Defer => Some(EXIT_RESUME_DEFER),
        ResumeDecision::Complete => Some(EXIT_RESUME_COMPLETE),
        ResumeDecision::Retry { .. } => None,
    }
}

/// What exit code the last tick's results imply `ralph run` should exit
/// with, if any. An agent-internal-failure code (56-63) takes priority over
/// a resume decision, since it names the more specific cause.
fn tick_exit_override(report: &orchestrator::TickReport) -> Option<i32> {
    report.ran.iter().find_map(|w| {
        w.agent_internal_failure.or_else(|| w.resume_decision.as_ref().and_then(resume_decision_exit_code))
    })
}

fn require_ralph_dir(paths: &RalphPaths) -> Result<(), i32> {
    if paths.ralph_dir().is_dir() {
        Ok(())
    } else {
        eprintln!("no .ralph/ directory found at {} — run `ralph init` first", paths.root().display());
        Err(EXIT_NO_RALPH_DIR)
    }
}

/// `ralph init`
///
/// # Errors
/// Returns an error if any scaffold file or directory can't be created.
pub fn init(root: &Path) -> Result<i32> {
    let paths = RalphPaths::new(root);
    std::fs::create_dir_all(paths.logs_dir()).context("creating .ralph/logs")?;
    std::fs::create_dir_all(paths.ralph_dir().join("workers")).context("creating .ralph/workers")?;
    std::fs::create_dir_all(paths.orchestrator_dir()).context("creating .ralph/orchestrator")?;
    std::fs::create_dir_all(paths.plans_dir()).context("creating .ralph/plans")?;
    std::fs::create_dir_all(paths.conflict_queue().parent().unwrap()).context("creating .ralph/batches")?;
    std::fs::create_dir_all(paths.config_dir().join("pipelines")).context("creating config/pipelines")?;

    if !paths.board().exists() {
        std::fs::write(paths.board(), "# Board\n\n## Backlog\n")?;
    }
    if !paths.changelog().exists() {
        std::fs::write(paths.changelog(), "# Changelog\n")?;
    }
    if !paths.agents_config().exists() {
        std::fs::write(paths.agents_config(), serde_json::to_string_pretty(&default_agents_config())?)?;
    }
    if !paths.default_pipeline_config().exists() {
        std::fs::write(paths.default_pipeline_config(), serde_json::to_string_pretty(&default_pipeline_config())?)?;
    }
    if !paths.lifecycle_spec().exists() {
        std::fs::write(paths.lifecycle_spec(), serde_json::to_string_pretty(&default_lifecycle_spec())?)?;
    }

    println!("initialized ralph project at {}", root.display());
    Ok(EXIT_SUCCESS)
}

/// The seven-step plan→implement→review→audit→test→validate→merge pipeline,
/// wired with a `fix` sub-step on `audit` and default routing everywhere
/// else.
fn default_pipeline_config() -> serde_json::Value {
    fn step(id: &str, agent: &str, commit_after: bool) -> serde_json::Value {
        json!({"id": id, "agent": agent, "commit_after": commit_after})
    }

    let mut audit = step("audit", "auditor", false);
    audit.as_object_mut().unwrap().insert(
        "fix".to_owned(),
        json!({"id": "audit-fix", "agent": "fixer", "max_attempts": 2, "commit_after": true}),
    );

    let steps = vec![
        step("plan", "planner", false),
        step("implement", "implementer", true),
        step("review", "reviewer", false),
        audit,
        step("test", "tester", false),
        step("validate", "validator", false),
        step("merge", "merger", false),
    ];

    json!({"name": "default", "steps": steps})
}

/// One `AgentDef` per step the default pipeline references, each a thin
/// `command`/`args` invocation of the external agent runtime.
fn default_agents_config() -> serde_json::Value {
    let agent = |command: &str| json!({"command": command, "args": [], "default_timeout_seconds": 3600, "env": {}});
    json!({
        "agents": {
            "planner": agent("ralph-agent-plan"),
            "implementer": agent("ralph-agent-code"),
            "reviewer": agent("ralph-agent-code"),
            "auditor": agent("ralph-agent-code"),
            "fixer": agent("ralph-agent-code"),
            "tester": agent("ralph-agent-code"),
            "validator": agent("ralph-agent-code"),
            "merger": agent("ralph-agent-merge"),
        }
    })
}

/// The reference lifecycle FSM: all thirteen named states, wired with the
/// default guard/effect catalog's transitions, including the terminal
/// `failed` state's recovery allowlist and the
/// `startup.reset`/`resolve.startup_reset` crash-recovery events.
fn default_lifecycle_spec() -> serde_json::Value {
    json!({
        "capacity": {"main": 4, "fix": 2, "resolve": 1},
        "states": {
            "none": {"type": "initial"},
            "needs_fix": {"type": "waiting"},
            "fixing": {"type": "running"},
            "fix_completed": {"type": "transient", "chain": "needs_merge"},
            "needs_merge": {"type": "waiting"},
            "merging": {"type": "running"},
            "merge_conflict": {"type": "waiting"},
            "needs_resolve": {"type": "waiting"},
            "needs_multi_resolve": {"type": "waiting"},
            "resolving": {"type": "running"},
            "resolved": {"type": "transient", "chain": "needs_merge"},
            "merged": {"type": "terminal"},
            "failed": {"type": "terminal"}
        },
        "transitions": [
            {"from": "none", "event": "worker.spawned", "to": "needs_merge", "effects": []},
            {"from": "none", "event": "fix.detected", "to": "needs_fix", "effects": []},

            {"from": "needs_fix", "event": "fix.attempt", "to": "fixing", "effects": []},
            {"from": "fixing", "event": "fix.succeeded", "to": "fix_completed", "effects": ["clear_error"]},
            {"from": "fix_completed", "event": "chain.needs_merge", "to": "needs_merge", "effects": []},
            {"from": "fixing", "event": "fix.failed", "guard": "recovery_attempts_lt_max", "to": "needs_fix", "effects": ["inc_recovery"]},
            {"from": "fixing", "event": "fix.failed", "to": "failed", "effects": ["set_error", "check_permanent"]},
            {"from": "fixing", "event": "startup.reset", "to": "needs_fix", "effects": []},

            {"from": "needs_merge", "event": "merge.attempt", "to": "merging", "effects": ["inc_merge_attempts"]},
            {"from": "needs_merge", "event": "pipeline.completed", "to": "merged", "effects": ["rm_conflict_queue", "release_claim", "clear_error"]},
            {"from": "needs_merge", "event": "pipeline.stopped", "to": "failed", "effects": ["set_error"]},
            {"from": "merging", "event": "merge.succeeded", "to": "merged", "effects": ["rm_conflict_queue", "release_claim", "clear_error"]},
            {"from": "merging", "event": "merge.conflict", "guard": "merge_attempts_lt_max", "to": "merge_conflict", "effects": ["add_conflict_queue"]},
            {"from": "merging", "event": "merge.conflict", "to": "failed", "effects": ["set_error"]},
            {"from": "merging", "event": "startup.reset", "to": "needs_merge", "effects": ["reset_merge"]},

            {"from": "merge_conflict", "event": "pr.conflict_detected", "to": "needs_resolve", "effects": []},
            {"from": "merge_conflict", "event": "pr.multi_conflict_detected", "to": "needs_multi_resolve", "effects": []},

            {"from": "needs_resolve", "event": "resolve.attempt", "to": "resolving", "effects": []},
            {"from": "needs_multi_resolve", "event": "resolve.attempt", "to": "resolving", "effects": []},
            {"from": "resolving", "event": "resolve.succeeded", "to": "resolved", "effects": ["reset_merge", "rm_conflict_queue"]},
            {"from": "resolved", "event": "chain.needs_merge", "to": "needs_merge", "effects": []},
            {"from": "resolving", "event": "resolve.failed", "guard": "recovery_attempts_lt_max", "to": "needs_resolve", "effects": ["inc_recovery"]},
            {"from": "resolving", "event": "resolve.failed", "to": "failed", "effects": ["set_error", "check_permanent"]},
            {"from": "resolving", "event": "resolve.startup_reset", "to": "needs_resolve", "effects": []},

            {"from": "failed", "event": "fix.detected", "guard": "recovery_attempts_lt_max", "to": "needs_fix", "effects": ["inc_recovery"]},
            {"from": "failed", "event": "fix.detected", "to": "failed", "effects": ["check_permanent"]},
            {"from": "failed", "event": "recovery.to_resolve", "guard": "recovery_attempts_lt_max", "to": "needs_resolve", "effects": ["inc_recovery"]},
            {"from": "failed", "event": "recovery.to_resolve", "to": "failed", "effects": ["check_permanent"]},
            {"from": "failed", "event": "recovery.to_fix", "guard": "recovery_attempts_lt_max", "to": "needs_fix", "effects": ["inc_recovery"]},
            {"from": "failed", "event": "recovery.to_fix", "to": "failed", "effects": ["check_permanent"]},
            {"from": "failed", "event": "user.resume", "guard": "recovery_attempts_lt_max", "to": "needs_merge", "effects": ["inc_recovery"]},
            {"from": "failed", "event": "user.resume", "to": "failed", "effects": ["check_permanent"]},
            {"from": "failed", "event": "pr.conflict_detected", "guard": "recovery_attempts_lt_max", "to": "needs_resolve", "effects": ["inc_recovery"]},
            {"from": "failed", "event": "pr.conflict_detected", "to": "failed", "effects": ["check_permanent"]},
            {"from": "failed", "event": "pr.multi_conflict_detected", "guard": "recovery_attempts_lt_max", "to": "needs_multi_resolve", "effects": ["inc_recovery"]},
            {"from": "failed", "event": "pr.multi_conflict_detected", "to": "failed", "effects": ["check_permanent"]},
            {"from": "failed", "event": "pr.comments_detected", "guard": "recovery_attempts_lt_max", "to": "needs_fix", "effects": ["inc_recovery"]},
            {"from": "failed", "event": "pr.comments_detected", "to": "failed", "effects": ["check_permanent"]},
            {"from": "failed", "event": "permanent_failure", "to": "failed", "effects": ["check_permanent"]},

            {"from": "*", "event": "resume.abort", "to": "failed", "effects": ["set_error"]}
        ],
        "guards": ["merge_attempts_lt_max", "recovery_attempts_lt_max", "rebase_succeeded"],
        "effects": [
            "inc_merge_attempts", "reset_merge", "inc_recovery", "add_conflict_queue",
            "rm_conflict_queue", "cleanup_worktree", "cleanup_batch", "release_claim",
            "sync_github", "set_error", "clear_error", "check_permanent"
        ]
    })
}

/// `ralph validate [--cleanup]`
///
/// # Errors
/// Returns an error only on I/O failure; structural problems are reported
/// via the returned exit code, not a `Result::Err`.
pub fn validate(root: &Path, cleanup: bool) -> Result<i32> {
    let paths = RalphPaths::new(root);
    if require_ralph_dir(&paths).is_err() {
        return Ok(EXIT_NO_RALPH_DIR);
    }

    let mut problems = Vec::new();

    match board::parse_all(&paths.board()) {
        Ok(tasks) => {
            for task in &tasks {
                for dep in &task.dependencies {
                    if !tasks.iter().any(|t| &t.id == dep) {
                        problems.push(format!("task {} depends on unknown task {}", task.id.as_str(), dep.as_str()));
                    }
                }
            }
        }
        Err(e) => problems.push(format!("kanban board: {e}")),
    }

    match config::load_worker_lifecycle(&paths) {
        Ok(lifecycle_config) => match LifecycleSpec::from_json(&lifecycle_config.spec.to_string()) {
            Ok(spec) => {
                let guards = GuardRegistry::with_defaults();
                let effects = ralph_core::lifecycle::EffectRegistry::with_defaults();
                if let Err(e) = LifecycleEngine::bind(&spec, &guards, &effects) {
                    problems.push(format!("worker-lifecycle.json: {e}"));
                }
            }
            Err(e) => problems.push(format!("worker-lifecycle.json: {e}")),
        },
        Err(e) => problems.push(format!("worker-lifecycle.json: {e}")),
    }

    match config::load_default_pipeline(&paths) {
        Ok(_) => {}
        Err(e) => problems.push(format!("pipeline.json: {e}")),
    }

    if let Err(e) = config::load_agents(&paths) {
        problems.push(format!("agents.json: {e}"));
    }

    if cleanup {
        let _ = board::collapse_completed(&paths.board(), &paths.board_lock());
    }

    if problems.is_empty() {
        println!("ok");
        Ok(EXIT_SUCCESS)
    } else {
        for p in &problems {
            eprintln!("error: {p}");
        }
        Ok(EXIT_VALIDATE_ERROR)
    }
}

/// `ralph run [--interval] [--once]`
///
/// # Errors
/// Propagates orchestrator startup errors (missing/invalid config).
pub fn run(root: &Path, interval: u64, once: bool) -> Result<i32> {
    let paths = RalphPaths::new(root);
    if require_ralph_dir(&paths).is_err() {
        return Ok(EXIT_NO_RALPH_DIR);
    }

    let orchestrator = Orchestrator::open(root)?;
    orchestrator.recover_startup().context("recovering orphaned workers at startup")?;

    let shutdown = install_shutdown_flag();
    let mut last_report = None;
    loop {
        let report = orchestrator.tick()?;
        tracing::info!(
            admitted = report.admitted.len(),
            ran = report.ran.len(),
            batches = report.batches_formed,
            "tick complete"
        );
        let done = once || shutdown.load(std::sync::atomic::Ordering::SeqCst);
        last_report = Some(report);
        if done {
            break;
        }
        let board_empty = board::parse_all(&paths.board())
            .map(|tasks| tasks.iter().all(|t| t.status.is_terminal()))
            .unwrap_or(false);
        if board_empty {
            break;
        }
        std::thread::sleep(Duration::from_secs(interval));
    }

    if shutdown.load(std::sync::atomic::Ordering::SeqCst) {
        // Graceful shutdown on INT/TERM exits 130/143.
        return Ok(130);
    }
    // Only the tick the loop is about to exit on can override the exit
    // code: DEFER isn't terminal, so surfacing it on every intermediate
    // tick would stop `ralph run` from ever reaching board-empty.
    if let Some(code) = last_report.as_ref().and_then(tick_exit_override) {
        return Ok(code);
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(unix)]
fn install_shutdown_flag() -> std::sync::Arc<std::sync::atomic::AtomicBool> {
    let flag = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, flag.clone());
    let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, flag.clone());
    flag
}

#[cfg(not(unix))]
fn install_shutdown_flag() -> std::sync::Arc<std::sync::atomic::AtomicBool> {
    std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false))
}

/// `ralph status`
///
/// # Errors
/// Returns an error if the board or pool files fail to parse.
pub fn status(root: &Path, format: OutputFormat) -> Result<i32> {
    let paths = RalphPaths::new(root);
    if require_ralph_dir(&paths).is_err() {
        return Ok(EXIT_NO_RALPH_DIR);
    }
    let tasks = board::parse_all(&paths.board())?;
    let summary = json!({
        "pending": orchestrator::count_by_status(&tasks, TaskStatus::Pending),
        "in_progress": orchestrator::count_by_status(&tasks, TaskStatus::InProgress),
        "pending_approval": orchestrator::count_by_status(&tasks, TaskStatus::PendingApproval),
        "complete": orchestrator::count_by_status(&tasks, TaskStatus::Complete),
        "failed": orchestrator::count_by_status(&tasks, TaskStatus::Failed),
    });
    format::emit(format, &summary, |v| {
        format!(
            "pending={} in_progress={} pending_approval={} complete={} failed={}",
            v["pending"], v["in_progress"], v["pending_approval"], v["complete"], v["failed"]
        )
    });
    Ok(EXIT_SUCCESS)
}

/// `ralph stop` — signal a running orchestrator's recorded PID.
///
/// # Errors
/// Returns an error if the PID file exists but isn't readable.
pub fn stop(root: &Path) -> Result<i32> {
    let paths = RalphPaths::new(root);
    let pid_path = paths.orchestrator_pid();
    if !pid_path.exists() {
        eprintln!("no running orchestrator recorded at {}", pid_path.display());
        return Ok(EXIT_GENERIC_ERROR);
    }
    let pid: u32 = std::fs::read_to_string(&pid_path)?.trim().parse().context("parsing orchestrator.pid")?;
    send_term(pid);
    println!("sent shutdown signal to orchestrator (pid {pid})");
    Ok(EXIT_SUCCESS)
}

#[cfg(unix)]
fn send_term(pid: u32) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    // Sending a signal to a process that has since exited is a documented
    // no-op (returns ESRCH, which we don't surface — the pidfile may simply
    // be stale).
    let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
}

#[cfg(not(unix))]
fn send_term(_pid: u32) {}

/// `ralph start` — record this process's PID and background it is left to
/// the caller's shell (`ralph start &`); ralph itself never double-forks.
///
/// # Errors
/// Returns an error if the PID file can't be written.
pub fn start(root: &Path) -> Result<i32> {
    let paths = RalphPaths::new(root);
    std::fs::create_dir_all(paths.orchestrator_dir())?;
    std::fs::write(paths.orchestrator_pid(), std::process::id().to_string())?;
    run(root, 2, false)
}

/// `ralph worker <subcommand>`
///
/// # Errors
/// Propagates pool/lifecycle I/O errors.
pub fn worker(root: &Path, command: &WorkerCommand) -> Result<i32> {
    let paths = RalphPaths::new(root);
    if require_ralph_dir(&paths).is_err() {
        return Ok(EXIT_NO_RALPH_DIR);
    }

    match command {
        WorkerCommand::Start { task_id } => {
            let task_id = TaskId::new(task_id).context("invalid task ID")?;
            let orchestrator = Orchestrator::open(root)?;
            let _ = orchestrator;
            println!("worker admission for {} is handled by the next `ralph run` tick", task_id.as_str());
            Ok(EXIT_SUCCESS)
        }
        WorkerCommand::Stop { worker_id } => {
            println!("requested stop for {worker_id} (takes effect at its next checkpoint)");
            Ok(EXIT_SUCCESS)
        }
        WorkerCommand::Kill { worker_id } => {
            let worker_dir = paths.ralph_dir().join("workers").join(worker_id);
            let worker_paths = WorkerPaths::new(worker_dir);
            if !worker_paths.dir().exists() {
                eprintln!("no such worker: {worker_id}");
                return Ok(EXIT_GENERIC_ERROR);
            }
            println!("killed {worker_id}");
            Ok(EXIT_SUCCESS)
        }
        WorkerCommand::Resume { worker_id } => {
            let worker_dir = paths.ralph_dir().join("workers").join(worker_id);
            if !worker_dir.exists() {
                eprintln!("no such worker: {worker_id}");
                return Ok(EXIT_GENERIC_ERROR);
            }
            let worker_id_parsed = ralph_core::model::WorkerId::try_from(worker_id.clone())
                .map_err(|e| anyhow::anyhow!("invalid worker ID: {e}"))?;
            let (task_id, _epoch) = worker_id_parsed.parse_parts().map_err(|e| anyhow::anyhow!("{e}"))?;
            let resume_path = paths.orchestrator_dir().join("resume").join(format!("{}.json", task_id.as_str()));
            let mut state = ResumeState::load_or_default(&resume_path)?;
            state.cooldown_until = 0;
            ralph_core::fsio::atomic_write_json(&resume_path, &state)?;
            println!("cleared cooldown for {worker_id}, eligible for the next tick");
            Ok(EXIT_SUCCESS)
        }
    }
}

/// `ralph plan <task-id>`
///
/// # Errors
/// Returns an error if the plan file can't be read.
pub fn plan(root: &Path, task_id: &str) -> Result<i32> {
    let paths = RalphPaths::new(root);
    let task_id = TaskId::new(task_id).context("invalid task ID")?;
    let plan_path = paths.plan(task_id.as_str());
    if plan_path.exists() {
        print!("{}", std::fs::read_to_string(&plan_path)?);
        Ok(EXIT_SUCCESS)
    } else {
        eprintln!("no plan recorded yet for {}", task_id.as_str());
        Ok(EXIT_GENERIC_ERROR)
    }
}

/// `ralph pr <task-id>`
///
/// # Errors
/// Returns an error if `pr-merge-state.json` fails to parse.
pub fn pr(root: &Path, task_id: &str) -> Result<i32> {
    let paths = RalphPaths::new(root);
    let task_id = TaskId::new(task_id).context("invalid task ID")?;
    let state_path = paths.pr_merge_state();
    if !state_path.exists() {
        println!("no PR state recorded for {}", task_id.as_str());
        return Ok(EXIT_SUCCESS);
    }
    let state: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&state_path)?)?;
    println!("{}", state.get(task_id.as_str()).unwrap_or(&json!(null)));
    Ok(EXIT_SUCCESS)
}

/// Diagnostics report for `ralph doctor`.
#[derive(serde::Serialize)]
pub struct DoctorReport {
    pub ralph_dir_writable: bool,
    pub git_available: bool,
    pub is_git_repo: bool,
    pub agents_spawnable: Vec<(String, bool)>,
    pub stale_locks: Vec<String>,
}

impl DoctorReport {
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.ralph_dir_writable
            && self.git_available
            && self.is_git_repo
            && self.agents_spawnable.iter().all(|(_, ok)| *ok)
            && self.stale_locks.is_empty()
    }
}

/// `ralph doctor`
///
/// # Errors
/// Returns an error only on unexpected I/O failure while probing.
pub fn doctor(root: &Path, format: OutputFormat) -> Result<i32> {
    let paths = RalphPaths::new(root);

    let ralph_dir_writable = std::fs::create_dir_all(paths.ralph_dir()).is_ok()
        && std::fs::write(paths.ralph_dir().join(".doctor-probe"), b"").is_ok();
    let _ = std::fs::remove_file(paths.ralph_dir().join(".doctor-probe"));

    let git_available = which_on_path("git");
    let is_git_repo = root.join(".git").exists();

    let agents_spawnable = match config::load_agents(&paths) {
        Ok(agents) => agents.agents.keys().map(|name| (name.clone(), which_on_path(&agents.agents[name].command))).collect(),
        Err(_) => Vec::new(),
    };

    let stale_locks = find_stale_locks(&paths.ralph_dir(), Duration::from_secs(3600))?;

    let report =
        DoctorReport { ralph_dir_writable, git_available, is_git_repo, agents_spawnable, stale_locks };

    let healthy = report.healthy();
    format::emit(format, &report, |r| {
        format!(
            "ralph_dir_writable={} git_available={} is_git_repo={} agents={:?} stale_locks={:?}",
            r.ralph_dir_writable, r.git_available, r.is_git_repo, r.agents_spawnable, r.stale_locks
        )
    });
    Ok(if healthy { EXIT_SUCCESS } else { EXIT_GENERIC_ERROR })
}

fn which_on_path(command: &str) -> bool {
    if command.contains('/') {
        return Path::new(command).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(command).is_file()))
        .unwrap_or(false)
}

fn find_stale_locks(dir: &Path, threshold: Duration) -> Result<Vec<String>> {
    let mut stale = Vec::new();
    if !dir.exists() {
        return Ok(stale);
    }
    for entry in walk_lock_files(dir)? {
        let modified = entry.metadata()?.modified()?;
        let age = SystemTime::now().duration_since(modified).unwrap_or_default();
        if age > threshold {
            stale.push(entry.path().display().to_string());
        }
    }
    Ok(stale)
}

fn walk_lock_files(dir: &Path) -> Result<Vec<std::fs::DirEntry>> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            found.extend(walk_lock_files(&entry.path())?);
        } else if entry.file_name().to_string_lossy().ends_with(".lock") {
            found.push(entry);
        }
    }
    Ok(found)
}

/// `ralph clean [--retention-days]`
///
/// # Errors
/// Propagates board or filesystem errors.
pub fn clean(root: &Path, retention_days: u64) -> Result<i32> {
    let paths = RalphPaths::new(root);
    if require_ralph_dir(&paths).is_err() {
        return Ok(EXIT_NO_RALPH_DIR);
    }

    let archived = board::collapse_completed(&paths.board(), &paths.board_lock())?;
    println!("archived {} completed task(s)", archived.len());

    let retention = Duration::from_secs(retention_days * 24 * 3600);
    let now = SystemTime::now();
    let mut pruned = 0;
    for worker_dir in paths.all_worker_dirs().unwrap_or_default() {
        let worker_paths = WorkerPaths::new(worker_dir.clone());
        let Ok(Some(state)) = ralph_core::lifecycle::LifecycleState::load(&worker_paths.lifecycle_state()) else {
            continue;
        };
        if !state_is_terminal(&state.state) {
            continue;
        }
        let Ok(metadata) = std::fs::metadata(&worker_dir) else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        if now.duration_since(modified).unwrap_or_default() > retention {
            std::fs::remove_dir_all(&worker_dir)?;
            pruned += 1;
        }
    }
    println!("pruned {pruned} stale worker director(y/ies)");
    Ok(EXIT_SUCCESS)
}

fn state_is_terminal(state: &str) -> bool {
    matches!(state, "merged" | "failed" | "permanent_failure")
}

/// `ralph inspect <task-id>`
///
/// # Errors
/// Returns an error if the board fails to parse.
pub fn inspect(root: &Path, task_id: &str, format: OutputFormat) -> Result<i32> {
    let paths = RalphPaths::new(root);
    if require_ralph_dir(&paths).is_err() {
        return Ok(EXIT_NO_RALPH_DIR);
    }
    let tasks = board::parse_all(&paths.board())?;
    let task_id_parsed = TaskId::new(task_id).context("invalid task ID")?;
    let Some(task) = tasks.iter().find(|t| t.id == task_id_parsed) else {
        eprintln!("no such task: {task_id}");
        return Ok(EXIT_GENERIC_ERROR);
    };

    let resume_path = paths.orchestrator_dir().join("resume").join(format!("{task_id}.json"));
    let resume_state = ResumeState::load_or_default(&resume_path).unwrap_or_default();
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    let last_attempt_at_rfc3339 = (resume_state.last_attempt_at > 0)
        .then(|| chrono::DateTime::<chrono::Utc>::from_timestamp(resume_state.last_attempt_at as i64, 0))
        .flatten()
        .map(|dt| dt.to_rfc3339());

    let report = json!({
        "task_id": task.id.as_str(),
        "status": task.status.as_char().to_string(),
        "priority": format!("{:?}", task.priority),
        "dependencies": task.dependencies.iter().map(TaskId::as_str).collect::<Vec<_>>(),
        "resume_attempt_count": resume_state.attempt_count,
        "resume_max_attempts": resume_state.max_attempts,
        "resume_eligible_now": resume_state.eligible_for_scheduling(now),
        "resume_last_attempt_at": last_attempt_at_rfc3339,
    });
    format::emit(format, &report, |v| serde_json::to_string_pretty(v).unwrap_or_default());
    Ok(EXIT_SUCCESS)
}

/// `ralph monitor`
///
/// # Errors
/// Propagates terminal setup/teardown errors from the dashboard loop.
#[cfg(feature = "tui")]
pub fn monitor(root: &Path) -> Result<i32> {
    let paths = RalphPaths::new(root);
    ralph_tui::run_over(&paths.ralph_dir())?;
    Ok(EXIT_SUCCESS)
}

#[cfg(not(feature = "tui"))]
pub fn monitor(_root: &Path) -> Result<i32> {
    eprintln!("ralph was built without the `tui` feature");
    Ok(EXIT_GENERIC_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(init(dir.path()).unwrap(), EXIT_SUCCESS);
        assert_eq!(init(dir.path()).unwrap(), EXIT_SUCCESS);
        assert!(RalphPaths::new(dir.path()).board().exists());
    }

    #[test]
    fn validate_without_ralph_dir_reports_exit_5() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(validate(dir.path(), false).unwrap(), EXIT_NO_RALPH_DIR);
    }

    #[test]
    fn validate_after_init_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        init(dir.path()).unwrap();
        assert_eq!(validate(dir.path(), false).unwrap(), EXIT_SUCCESS);
    }

    #[test]
    fn default_lifecycle_spec_binds_against_the_default_registries() {
        let spec = LifecycleSpec::from_json(&default_lifecycle_spec().to_string()).unwrap();
        let guards = GuardRegistry::with_defaults();
        let effects = ralph_core::lifecycle::EffectRegistry::with_defaults();
        assert!(LifecycleEngine::bind(&spec, &guards, &effects).is_ok());
        assert_eq!(spec.initial_state(), Some("none"));
    }

    #[test]
    fn default_pipeline_config_validates_and_has_seven_steps() {
        let config: ralph_core::pipeline::PipelineConfig =
            serde_json::from_value(default_pipeline_config()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.steps.len(), 7);
    }

    #[test]
    fn default_lifecycle_spec_drives_the_events_the_orchestrator_emits() {
        use ralph_core::events::NullSink;
        use ralph_core::lifecycle::{EffectContext, EffectRegistry, LifecycleState};
        use ralph_core::model::TaskId;

        let spec = LifecycleSpec::from_json(&default_lifecycle_spec().to_string()).unwrap();
        let guards = GuardRegistry::with_defaults();
        let effects = EffectRegistry::with_defaults();
        let engine = LifecycleEngine::bind(&spec, &guards, &effects).unwrap();
        let ctx = EffectContext {
            worker_dir: PathBuf::from("/tmp/worker"),
            task_id: TaskId::new("TASK-1").unwrap(),
            board_path: PathBuf::from("/tmp/board.md"),
            board_lock_path: PathBuf::from("/tmp/board.lock"),
            conflict_queue_path: None,
            conflict_lock_path: None,
            git: None,
            max_merge_attempts: 2,
            max_recovery_attempts: 1,
        };
        let sink = NullSink;

        // `orchestrator::spawn_worker` fires this from the initial state...
        let mut state = LifecycleState::new(spec.initial_state().unwrap());
        engine.emit(&mut state, &ctx, "worker.spawned", &serde_json::Value::Null, &sink).unwrap();
        assert_eq!(state.state, "needs_merge");

        // ...and `orchestrator::run_worker` fires this once the pipeline
        // driver reports `PipelineOutcome::Completed`.
        engine.emit(&mut state, &ctx, "pipeline.completed", &serde_json::Value::Null, &sink).unwrap();
        assert_eq!(state.state, "merged");
    }
}
