//! Guard and effect registries.
//!
//! Guard and effect names in a [`super::spec::LifecycleSpec`] are plain
//! strings; at bind time every name referenced by the spec must resolve to
//! an entry here, or loading fails.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::Value;

use crate::board;
use crate::conflict;
use crate::error::{RalphError, Result};
use crate::model::TaskId;
use ralph_git::GitRepo;

use super::state::LifecycleState;

/// Everything an effect or guard needs beyond the worker's own lifecycle
/// counters: paths to the shared files it may touch, and the budgets
/// configured for this project.
pub struct EffectContext<'a> {
    /// The worker's own directory (`.ralph/workers/<id>/`).
    pub worker_dir: PathBuf,
    /// The task this worker is attempting.
    pub task_id: TaskId,
    /// Path to the kanban board.
    pub board_path: PathBuf,
    /// Lock file protecting the board.
    pub board_lock_path: PathBuf,
    /// Path to the conflict queue file, if this project uses one.
    pub conflict_queue_path: Option<PathBuf>,
    /// Lock file protecting the conflict queue.
    pub conflict_lock_path: Option<PathBuf>,
    /// Git backend for worktree cleanup; `None` makes `cleanup_worktree` a
    /// documented no-op (useful in tests that don't need a real repo).
    pub git: Option<&'a dyn GitRepo>,
    /// Configured merge-attempt budget.
    pub max_merge_attempts: u32,
    /// Configured recovery-attempt budget.
    pub max_recovery_attempts: u32,
}

/// A named guard: a boolean predicate over `(state, context)`.
pub type GuardFn = fn(&LifecycleState, &EffectContext<'_>) -> bool;

/// A named effect: an idempotent mutation of `(state, context, payload)`.
pub type EffectFn = fn(&mut LifecycleState, &EffectContext<'_>, &Value) -> Result<()>;

/// A name → function registry for guards.
#[derive(Default)]
pub struct GuardRegistry(HashMap<String, GuardFn>);

impl GuardRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The reference catalog from .
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut r = Self::new();
        r.register("merge_attempts_lt_max", guard_merge_attempts_lt_max);
        r.register("recovery_attempts_lt_max", guard_recovery_attempts_lt_max);
        r.register("rebase_succeeded", guard_rebase_succeeded);
        r
    }

    /// Register a guard under `name`, replacing any prior registration.
    pub fn register(&mut self, name: impl Into<String>, f: GuardFn) {
        self.0.insert(name.into(), f);
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Evaluate a registered guard.
    ///
    /// # Errors
    /// Returns [`RalphError::InvalidLifecycleSpec`] if `name` isn't
    /// registered — callers should have already checked this at bind time.
    pub fn eval(&self, name: &str, state: &LifecycleState, ctx: &EffectContext<'_>) -> Result<bool> {
        let f = self.0.get(name).ok_or_else(|| RalphError::InvalidLifecycleSpec {
            reason: format!("guard '{name}' has no registered implementation"),
        })?;
        Ok(f(state, ctx))
    }
}

/// A name → function registry for effects.
#[derive(Default)]
pub struct EffectRegistry(HashMap<String, EffectFn>);

impl EffectRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The reference catalog from .
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut r = Self::new();
        r.register("inc_merge_attempts", effect_inc_merge_attempts);
        r.register("reset_merge", effect_reset_merge);
        r.register("inc_recovery", effect_inc_recovery);
        r.register("add_conflict_queue", effect_add_conflict_queue);
        r.register("rm_conflict_queue", effect_rm_conflict_queue);
        r.register("cleanup_worktree", effect_cleanup_worktree);
        r.register("cleanup_batch", effect_cleanup_batch);
        r.register("release_claim", effect_release_claim);
        r.register("sync_github", effect_sync_github);
        r.register("set_error", effect_set_error);
        r.register("clear_error", effect_clear_error);
        r.register("check_permanent", effect_check_permanent);
        r
    }

    /// Register an effect under `name`, replacing any prior registration.
    pub fn register(&mut self, name: impl Into<String>, f: EffectFn) {
        self.0.insert(name.into(), f);
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Run a registered effect.
    ///
    /// # Errors
    /// Returns [`RalphError::InvalidLifecycleSpec`] if `name` isn't
    /// registered, or whatever error the effect itself raises.
    pub fn run(&self, name: &str, state: &mut LifecycleState, ctx: &EffectContext<'_>, payload: &Value) -> Result<()> {
        let f = self.0.get(name).ok_or_else(|| RalphError::InvalidLifecycleSpec {
            reason: format!("effect '{name}' has no registered implementation"),
        })?;
        f(state, ctx, payload)
    }
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

fn guard_merge_attempts_lt_max(state: &LifecycleState, ctx: &EffectContext<'_>) -> bool {
    state.merge_attempts < ctx.max_merge_attempts
}

fn guard_recovery_attempts_lt_max(state: &LifecycleState, ctx: &EffectContext<'_>) -> bool {
    state.recovery_attempts < ctx.max_recovery_attempts
}

fn guard_rebase_succeeded(state: &LifecycleState, _ctx: &EffectContext<'_>) -> bool {
    state.rebase_succeeded == Some(true)
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

fn effect_inc_merge_attempts(state: &mut LifecycleState, _ctx: &EffectContext<'_>, _payload: &Value) -> Result<()> {
    state.merge_attempts += 1;
    Ok(())
}

fn effect_reset_merge(state: &mut LifecycleState, _ctx: &EffectContext<'_>, _payload: &Value) -> Result<()> {
    state.merge_attempts = 0;
    state.rebase_succeeded = None;
    Ok(())
}

fn effect_inc_recovery(state: &mut LifecycleState, _ctx: &EffectContext<'_>, _payload: &Value) -> Result<()> {
    state.recovery_attempts += 1;
    Ok(())
}

fn effect_add_conflict_queue(state: &mut LifecycleState, ctx: &EffectContext<'_>, payload: &Value) -> Result<()> {
    state.in_conflict_queue = true;
    let (Some(queue_path), Some(lock_path)) = (&ctx.conflict_queue_path, &ctx.conflict_lock_path) else {
        return Ok(());
    };
    let changed_files: Vec<String> = payload
        .get("changed_files")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .unwrap_or_default();
    let pr_number = payload.get("pr_number").and_then(Value::as_u64);
    let entry = conflict::Entry {
        task_id: ctx.task_id.clone(),
        worker_dir: ctx.worker_dir.clone(),
        pr_number,
        changed_files,
    };
    conflict::add(queue_path, lock_path, entry)
}

fn effect_rm_conflict_queue(state: &mut LifecycleState, ctx: &EffectContext<'_>, _payload: &Value) -> Result<()> {
    state.in_conflict_queue = false;
    let (Some(queue_path), Some(lock_path)) = (&ctx.conflict_queue_path, &ctx.conflict_lock_path) else {
        return Ok(());
    };
    conflict::remove(queue_path, lock_path, &ctx.task_id)
}

fn effect_cleanup_worktree(_state: &mut LifecycleState, ctx: &EffectContext<'_>, _payload: &Value) -> Result<()> {
    let Some(git) = ctx.git else {
        return Ok(());
    };
    let workspace = ctx.worker_dir.join("workspace");
    // Idempotent: a missing worktree is not an error.
    let _ = git.worktree_remove(&workspace, true);
    Ok(())
}

fn effect_cleanup_batch(_state: &mut LifecycleState, ctx: &EffectContext<'_>, payload: &Value) -> Result<()> {
    let (Some(queue_path), Some(lock_path)) = (&ctx.conflict_queue_path, &ctx.conflict_lock_path) else {
        return Ok(());
    };
    let Some(batch_id) = payload.get("batch_id").and_then(Value::as_str) else {
        return Ok(());
    };
    conflict::cleanup_batch(queue_path, lock_path, batch_id)
}

fn effect_release_claim(_state: &mut LifecycleState, _ctx: &EffectContext<'_>, _payload: &Value) -> Result<()> {
    // Pool admission (worker removal) is owned by the Worker Pool component
    // (pool.rs); the orchestrator's tick loop calls `pool::remove` alongside
    // dispatching this effect. Nothing to do at the lifecycle layer itself.
    Ok(())
}

fn effect_sync_github(_state: &mut LifecycleState, _ctx: &EffectContext<'_>, _payload: &Value) -> Result<()> {
    // GitHub/issue-tracker sync is an external collaborator; the
    // lifecycle engine only fires the effect slot.
    Ok(())
}

fn effect_set_error(state: &mut LifecycleState, _ctx: &EffectContext<'_>, payload: &Value) -> Result<()> {
    state.error = payload.get("reason").and_then(Value::as_str).map(str::to_owned).or(Some(String::new()));
    Ok(())
}

fn effect_clear_error(state: &mut LifecycleState, _ctx: &EffectContext<'_>, _payload: &Value) -> Result<()> {
    state.error = None;
    Ok(())
}

fn effect_check_permanent(state: &mut LifecycleState, ctx: &EffectContext<'_>, _payload: &Value) -> Result<()> {
    if state.recovery_attempts >= ctx.max_recovery_attempts {
        board::set_status(&ctx.board_path, &ctx.board_lock_path, &ctx.task_id, crate::model::TaskStatus::Failed)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> EffectContext<'static> {
        EffectContext {
            worker_dir: PathBuf::from("/tmp/worker"),
            task_id: TaskId::new("TASK-1").unwrap(),
            board_path: PathBuf::from("/tmp/board.md"),
            board_lock_path: PathBuf::from("/tmp/board.lock"),
            conflict_queue_path: None,
            conflict_lock_path: None,
            git: None,
            max_merge_attempts: 2,
            max_recovery_attempts: 1,
        }
    }

    #[test]
    fn guards_evaluate_against_counters() {
        let registry = GuardRegistry::with_defaults();
        let mut state = LifecycleState::new("none");
        let c = ctx();
        assert!(registry.eval("merge_attempts_lt_max", &state, &c).unwrap());
        state.merge_attempts = 2;
        assert!(!registry.eval("merge_attempts_lt_max", &state, &c).unwrap());
    }

    #[test]
    fn effects_mutate_counters() {
        let registry = EffectRegistry::with_defaults();
        let mut state = LifecycleState::new("none");
        let c = ctx();
        registry.run("inc_merge_attempts", &mut state, &c, &Value::Null).unwrap();
        registry.run("inc_merge_attempts", &mut state, &c, &Value::Null).unwrap();
        assert_eq!(state.merge_attempts, 2);
        registry.run("reset_merge", &mut state, &c, &Value::Null).unwrap();
        assert_eq!(state.merge_attempts, 0);
    }

    #[test]
    fn unregistered_guard_errors() {
        let registry = GuardRegistry::new();
        let state = LifecycleState::new("none");
        let c = ctx();
        assert!(registry.eval("nope", &state, &c).is_err());
    }
}
