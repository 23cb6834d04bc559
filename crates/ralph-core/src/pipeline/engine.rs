//! The Pipeline Engine's step loop: drives one worker from its
//! first step to completion, an abort, or an explicit stop.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use ralph_git::GitRepo;

use crate::agent::{self, AgentRuntime, StepContext};
use crate::error::{RalphError, Result};
use crate::events::{self, EventSink};
use crate::fsio::atomic_write_json;

use super::config::{InlineAgentConfig, PipelineConfig, RouteAction, StepConfig, StepResult};
use super::state::PipelineState;

/// How a pipeline run ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every step ran to `next` past the last one.
    Completed,
    /// A step (or its fix sub-step) routed to `abort`.
    Aborted {
        /// The step ID the abort happened at.
        step_id: String,
        /// A free-text reason, surfaced to the Resume Controller.
        reason: String,
    },
    /// A step's result was STOP.
    Stopped {
        /// The step ID that stopped the pipeline.
        step_id: String,
    },
}

/// Drives a single worker's pipeline run.
pub struct PipelineDriver<'a> {
    config: &'a PipelineConfig,
    runtime: &'a dyn AgentRuntime,
    git: Option<&'a dyn GitRepo>,
    workspace: PathBuf,
    worker_dir: PathBuf,
    results_dir: PathBuf,
    checkpoints_dir: PathBuf,
    timeout_seconds: u64,
}

impl<'a> PipelineDriver<'a> {
    /// Build a driver for one worker. `results_dir` and `checkpoints_dir`
    /// are created on first write if absent.
    #[must_use]
    pub fn new(
        config: &'a PipelineConfig,
        runtime: &'a dyn AgentRuntime,
        git: Option<&'a dyn GitRepo>,
        workspace: PathBuf,
        worker_dir: PathBuf,
        timeout_seconds: u64,
    ) -> Self {
        let results_dir = worker_dir.join("results");
        let checkpoints_dir = worker_dir.join("checkpoints");
        Self { config, runtime, git, workspace, worker_dir, results_dir, checkpoints_dir, timeout_seconds }
    }

    /// Run the step loop to completion, an abort, or a stop, mutating
    /// `state` and checkpointing after every step.
    ///
    /// # Errors
    /// Propagates agent-runtime, git, or I/O errors. Routing to an unknown
    /// `jump:<step-id>` target is a [`RalphError::InvalidPipelineConfig`]
    /// (the config's own `validate()` should already have ruled this out).
    pub fn run(&self, state: &mut PipelineState, sink: &dyn EventSink) -> Result<PipelineOutcome> {
        loop {
            if state.current_step_idx >= self.config.steps.len() {
                events::emit(sink, "pipeline.completed", serde_json::json!({
                    "worker_dir": self.worker_dir,
                }))?;
                return Ok(PipelineOutcome::Completed);
            }

            let step = self.config.steps[state.current_step_idx].clone();
            if let Some(var) = &step.enabled_by {
                if !env_truthy(var) {
                    state.current_step_idx += 1;
                    self.checkpoint(state)?;
                    continue;
                }
            }

            let attempt = state.bump_attempt(&step.id);
            let (mut result, mut reason) = self.run_once(&step.id, &step.agent, attempt, None)?;

            // Step 7: the cap+1th attempt at a step is forced to FAIL.
            if attempt > step.max_attempts() {
                result = StepResult::Fail;
                reason = Some("max-attempts-exceeded".to_owned());
            }

            self.maybe_commit(step.commit_after, &step.id, result)?;
            state.record_result(&step.id, attempt, result, reason.clone(), now());
            self.write_result_file(&step.id, attempt, result, reason.as_deref())?;
            self.checkpoint(state)?;

            if result == StepResult::Stop {
                events::emit(sink, "pipeline.stop", serde_json::json!({
                    "worker_dir": self.worker_dir,
                    "step_id": step.id,
                }))?;
                return Ok(PipelineOutcome::Stopped { step_id: step.id });
            }

            let route = if let Some(inline_cfg) = step.inline_agent_for(result) {
                match self.drive_inline_agent(state, sink, inline_cfg)? {
                    InlineOutcome::Route(action) => action,
                    InlineOutcome::Abort { step_id, reason } => {
                        return Ok(PipelineOutcome::Aborted { step_id, reason });
                    }
                }
            } else if let Some(action) = step.route_for(result) {
                action
            } else if result == StepResult::Fix && step.fix.is_some() {
                match self.drive_fix(state, &step)? {
                    FixOutcome::RerunOriginal => {
                        // Attempt counter for the original step is untouched;
                        // loop back without bumping it.
                        continue;
                    }
                    FixOutcome::Exhausted(reason) => {
                        return Ok(PipelineOutcome::Aborted { step_id: step.id, reason });
                    }
                }
            } else {
                // FIX with no declared fix sub-step falls through to the
                // default mapping, which is `prev`.
                super::config::default_route_for(result)
            };

            match route {
                RouteAction::Next => state.current_step_idx += 1,
                RouteAction::Prev => state.current_step_idx = state.current_step_idx.saturating_sub(1),
                RouteAction::Abort => {
                    return Ok(PipelineOutcome::Aborted {
                        step_id: step.id,
                        reason: reason.unwrap_or_else(|| format!("{result:?}")),
                    });
                }
                RouteAction::Jump(target) => {
                    let idx = self.config.step_index(&target).ok_or_else(|| RalphError::InvalidPipelineConfig {
                        reason: format!("jump target '{target}' does not exist"),
                    })?;
                    state.current_step_idx = idx;
                }
            }
        }
    }

    /// Run a step's fix sub-step loop until it PASSes or exhausts its
    /// attempt budget. Only called when
    /// `step.fix` is declared.
    fn drive_fix(&self, state: &mut PipelineState, step: &StepConfig) -> Result<FixOutcome> {
        let fix_cfg = step.fix.as_ref().expect("drive_fix called only when step.fix is Some");

        loop {
            let fix_attempt = state.bump_fix_attempt(&fix_cfg.id);
            let (fix_result, fix_reason) = self.run_once(&fix_cfg.id, &fix_cfg.agent, fix_attempt, None)?;

            self.maybe_commit(fix_cfg.commit_after, &fix_cfg.id, fix_result)?;
            state.record_result(&fix_cfg.id, fix_attempt, fix_result, fix_reason.clone(), now());
            self.write_result_file(&fix_cfg.id, fix_attempt, fix_result, fix_reason.as_deref())?;
            self.checkpoint(state)?;

            if fix_result == StepResult::Pass {
                return Ok(FixOutcome::RerunOriginal);
            }
            if fix_attempt >= fix_cfg.max_attempts() {
                return Ok(FixOutcome::Exhausted(
                    fix_reason.unwrap_or_else(|| "fix-attempts-exhausted".to_owned()),
                ));
            }
        }
    }

    /// Drive an inline sub-agent mapped as a result handler: an
    /// ephemeral step, not part of `config.steps`, dispatched and recorded
    /// the same way a regular step is, but routed only via the default
    /// PASS/FIX/FAIL/SKIP/STOP table (no nested `result_mappings` of its
    /// own, and no `jump` since it isn't addressable by ID from elsewhere).
    fn drive_inline_agent(
        &self,
        state: &mut PipelineState,
        sink: &dyn EventSink,
        cfg: &InlineAgentConfig,
    ) -> Result<InlineOutcome> {
        let attempt = state.bump_fix_attempt(&cfg.id);
        let (mut result, mut reason) = self.run_once(&cfg.id, &cfg.agent, attempt, None)?;

        if attempt > cfg.max_attempts() {
            result = StepResult::Fail;
            reason = Some("max-attempts-exceeded".to_owned());
        }

        state.record_result(&cfg.id, attempt, result, reason.clone(), now());
        self.write_result_file(&cfg.id, attempt, result, reason.as_deref())?;
        self.checkpoint(state)?;

        events::emit(sink, "pipeline.inline_agent", serde_json::json!({
            "worker_dir": self.worker_dir,
            "step_id": cfg.id,
            "attempt": attempt,
            "result": result,
        }))?;

        let route = super::config::default_route_for(result);
        if route == RouteAction::Abort {
            return Ok(InlineOutcome::Abort {
                step_id: cfg.id.clone(),
                reason: reason.unwrap_or_else(|| format!("{result:?}")),
            });
        }
        Ok(InlineOutcome::Route(route))
    }

    fn run_once(
        &self,
        step_id: &str,
        agent: &str,
        attempt: u32,
        previous_summary: Option<PathBuf>,
    ) -> Result<(StepResult, Option<String>)> {
        let ctx = StepContext {
            workspace: self.workspace.clone(),
            worker_dir: self.worker_dir.clone(),
            step_id: step_id.to_owned(),
            agent: agent.to_owned(),
            iteration: attempt,
            timeout_seconds: self.timeout_seconds,
            previous_summary,
        };
        self.runtime.prepare(&ctx)?;
        let invoke_outcome = self.runtime.invoke(&ctx)?;
        let record = self.runtime.read_result(&ctx)?;
        self.runtime.cleanup(&ctx)?;

        if invoke_outcome.timed_out {
            return Ok((StepResult::Fail, Some("timeout".to_owned())));
        }
        if let Some(code) = invoke_outcome.exit_code {
            if agent::is_agent_internal_failure_code(code) {
                return Ok((StepResult::Fail, Some(agent::internal_failure_reason(code))));
            }
        }
        match record {
            Some(r) => Ok((r.result, r.reason)),
            None => Ok((StepResult::Fail, Some("output-missing".to_owned()))),
        }
    }

    fn maybe_commit(&self, commit_after: bool, step_id: &str, result: StepResult) -> Result<()> {
        if !commit_after || !matches!(result, StepResult::Pass | StepResult::Fix | StepResult::Skip) {
            return Ok(());
        }
        let Some(git) = self.git else {
            return Ok(());
        };
        git.commit_all(&self.workspace, &format!("{step_id}: {result:?}")).map_err(|e| RalphError::Git {
            operation: "commit_all".to_owned(),
            detail: e.to_string(),
        })?;
        Ok(())
    }

    fn write_result_file(&self, step_id: &str, attempt: u32, result: StepResult, reason: Option<&str>) -> Result<()> {
        let path = self.results_dir.join(format!("{attempt:04}-{step_id}-result.json"));
        atomic_write_json(&path, &serde_json::json!({
            "step_id": step_id,
            "attempt": attempt,
            "result": result,
            "reason": reason,
        }))
    }

    fn checkpoint(&self, state: &mut PipelineState) -> Result<()> {
        let path = self.checkpoints_dir.join(format!("checkpoint-{}.json", state.checkpoint_seq + 1));
        state.save(&path)
    }
}

enum FixOutcome {
    RerunOriginal,
    Exhausted(String),
}

/// Outcome of driving an inline sub-agent mapping.
enum InlineOutcome {
    Route(RouteAction),
    Abort { step_id: String, reason: String },
}

fn env_truthy(var: &str) -> bool {
    match std::env::var(var) {
        Ok(v) => !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"),
        Err(_) => false,
    }
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{InvokeOutcome, StepResultRecord};
    use crate::events::NullSink;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct ScriptedRuntime {
        /// Queue of results, one per invocation, keyed by call order.
        script: RefCell<Vec<StepResultRecord>>,
    }

    impl AgentRuntime for ScriptedRuntime {
        fn prepare(&self, _ctx: &StepContext) -> Result<()> {
            Ok(())
        }
        fn invoke(&self, _ctx: &StepContext) -> Result<InvokeOutcome> {
            Ok(InvokeOutcome { exit_code: Some(0), timed_out: false })
        }
        fn read_result(&self, _ctx: &StepContext) -> Result<Option<StepResultRecord>> {
            Ok(self.script.borrow_mut().pop())
        }
        fn cleanup(&self, _ctx: &StepContext) -> Result<()> {
            Ok(())
        }
    }

    struct FixedExitCodeRuntime {
        exit_code: i32,
    }

    impl AgentRuntime for FixedExitCodeRuntime {
        fn prepare(&self, _ctx: &StepContext) -> Result<()> {
            Ok(())
        }
        fn invoke(&self, _ctx: &StepContext) -> Result<InvokeOutcome> {
            Ok(InvokeOutcome { exit_code: Some(self.exit_code), timed_out: false })
        }
        fn read_result(&self, _ctx: &StepContext) -> Result<Option<StepResultRecord>> {
            Ok(Some(StepResultRecord { result: StepResult::Pass, reason: None }))
        }
        fn cleanup(&self, _ctx: &StepContext) -> Result<()> {
            Ok(())
        }
    }

    fn step(id: &str, max: Option<u32>) -> StepConfig {
        StepConfig {
            id: id.to_owned(),
            agent: "impl".into(),
            blocking: false,
            readonly: false,
            enabled_by: None,
            commit_after: false,
            depends_on: None,
            max,
            fix: None,
            result_mappings: HashMap::new(),
        }
    }

    #[test]
    fn all_pass_completes_pipeline() {
        let config = PipelineConfig {
            name: "p".into(),
            steps: vec![step("implement", None), step("review", None)],
        };
        // script popped from the back, so reverse of call order
        let runtime = ScriptedRuntime {
            script: RefCell::new(vec![
                StepResultRecord { result: StepResult::Pass, reason: None },
                StepResultRecord { result: StepResult::Pass, reason: None },
            ]),
        };
        let dir = tempfile::tempdir().unwrap();
        let driver = PipelineDriver::new(
            &config,
            &runtime,
            None,
            dir.path().join("workspace"),
            dir.path().join("worker"),
            3600,
        );
        let mut state = PipelineState::new();
        let outcome = driver.run(&mut state, &NullSink).unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed);
        assert_eq!(state.current_step_idx, 2);
    }

    #[test]
    fn fail_aborts_with_reason() {
        let config = PipelineConfig { name: "p".into(), steps: vec![step("implement", None)] };
        let runtime = ScriptedRuntime {
            script: RefCell::new(vec![StepResultRecord {
                result: StepResult::Fail,
                reason: Some("boom".into()),
            }]),
        };
        let dir = tempfile::tempdir().unwrap();
        let driver = PipelineDriver::new(
            &config,
            &runtime,
            None,
            dir.path().join("workspace"),
            dir.path().join("worker"),
            3600,
        );
        let mut state = PipelineState::new();
        let outcome = driver.run(&mut state, &NullSink).unwrap();
        assert_eq!(outcome, PipelineOutcome::Aborted { step_id: "implement".into(), reason: "boom".into() });
    }

    #[test]
    fn retry_cap_forces_fail_on_cap_plus_one_attempt() {
        let config = PipelineConfig { name: "p".into(), steps: vec![step("flaky", Some(1))] };
        // Two attempts of FIX with no fix sub-step: first -> prev (idx stays
        // at 0, re-attempt), second attempt exceeds max(1) -> forced FAIL.
        let runtime = ScriptedRuntime {
            script: RefCell::new(vec![
                StepResultRecord { result: StepResult::Fix, reason: None },
                StepResultRecord { result: StepResult::Fix, reason: None },
            ]),
        };
        let dir = tempfile::tempdir().unwrap();
        let driver = PipelineDriver::new(
            &config,
            &runtime,
            None,
            dir.path().join("workspace"),
            dir.path().join("worker"),
            3600,
        );
        let mut state = PipelineState::new();
        let outcome = driver.run(&mut state, &NullSink).unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Aborted { step_id: "flaky".into(), reason: "max-attempts-exceeded".into() }
        );
    }

    #[test]
    fn fix_substep_pass_reruns_original_without_bumping_its_attempt() {
        use super::super::config::FixConfig;
        let mut implement = step("implement", None);
        implement.fix = Some(FixConfig {
            id: "implement-fix".into(),
            agent: "fixer".into(),
            max_attempts: None,
            commit_after: false,
        });
        let config = PipelineConfig { name: "p".into(), steps: vec![implement] };
        // Call order: implement(FIX), implement-fix(PASS), implement(PASS).
        // script.pop() drains from the back, so push in reverse call order.
        let runtime = ScriptedRuntime {
            script: RefCell::new(vec![
                StepResultRecord { result: StepResult::Pass, reason: None },
                StepResultRecord { result: StepResult::Pass, reason: None },
                StepResultRecord { result: StepResult::Fix, reason: None },
            ]),
        };
        let dir = tempfile::tempdir().unwrap();
        let driver = PipelineDriver::new(
            &config,
            &runtime,
            None,
            dir.path().join("workspace"),
            dir.path().join("worker"),
            3600,
        );
        let mut state = PipelineState::new();
        let outcome = driver.run(&mut state, &NullSink).unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed);
        // The original step's counter only reflects its two dispatches
        // (the FIX attempt and the re-run after the fix passed).
        assert_eq!(state.attempts_for("implement"), 2);
        assert_eq!(state.fix_attempts_for("implement-fix"), 1);
    }

    #[test]
    fn inline_agent_mapping_runs_ephemeral_step_and_routes_on_its_result() {
        use super::super::config::{InlineAgentConfig, ResultHandler};
        let mut flaky = step("flaky", None);
        flaky.result_mappings.insert(
            StepResult::Fail,
            ResultHandler::InlineAgent(InlineAgentConfig { id: "flaky-recover".into(), agent: "recover".into(), max: Some(1) }),
        );
        let config = PipelineConfig { name: "p".into(), steps: vec![flaky, step("review", None)] };
        // Call order: flaky(FAIL), flaky-recover(PASS), review(PASS).
        let runtime = ScriptedRuntime {
            script: RefCell::new(vec![
                StepResultRecord { result: StepResult::Pass, reason: None },
                StepResultRecord { result: StepResult::Pass, reason: None },
                StepResultRecord { result: StepResult::Fail, reason: Some("boom".into()) },
            ]),
        };
        let dir = tempfile::tempdir().unwrap();
        let driver = PipelineDriver::new(
            &config,
            &runtime,
            None,
            dir.path().join("workspace"),
            dir.path().join("worker"),
            3600,
        );
        let mut state = PipelineState::new();
        let outcome = driver.run(&mut state, &NullSink).unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed);
        assert_eq!(state.fix_attempts_for("flaky-recover"), 1);
    }

    #[test]
    fn inline_agent_exhausting_its_cap_aborts_the_pipeline() {
        use super::super::config::{InlineAgentConfig, ResultHandler};
        let mut flaky = step("flaky", None);
        flaky.result_mappings.insert(
            StepResult::Fail,
            ResultHandler::InlineAgent(InlineAgentConfig { id: "flaky-recover".into(), agent: "recover".into(), max: Some(1) }),
        );
        let config = PipelineConfig { name: "p".into(), steps: vec![flaky] };
        // Call order: flaky(FAIL), flaky-recover attempt 1 (FAIL, still within
        // cap), so it routes Abort per the default FAIL mapping.
        let runtime = ScriptedRuntime {
            script: RefCell::new(vec![
                StepResultRecord { result: StepResult::Fail, reason: Some("still broken".into()) },
                StepResultRecord { result: StepResult::Fail, reason: Some("boom".into()) },
            ]),
        };
        let dir = tempfile::tempdir().unwrap();
        let driver = PipelineDriver::new(
            &config,
            &runtime,
            None,
            dir.path().join("workspace"),
            dir.path().join("worker"),
            3600,
        );
        let mut state = PipelineState::new();
        let outcome = driver.run(&mut state, &NullSink).unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Aborted { step_id: "flaky-recover".into(), reason: "still broken".into() }
        );
    }

    #[test]
    fn agent_internal_failure_exit_code_overrides_a_reported_pass() {
        let config = PipelineConfig { name: "p".into(), steps: vec![step("implement", None)] };
        let runtime = FixedExitCodeRuntime { exit_code: 58 };
        let dir = tempfile::tempdir().unwrap();
        let driver = PipelineDriver::new(
            &config,
            &runtime,
            None,
            dir.path().join("workspace"),
            dir.path().join("worker"),
            3600,
        );
        let mut state = PipelineState::new();
        let outcome = driver.run(&mut state, &NullSink).unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Aborted {
                step_id: "implement".into(),
                reason: crate::agent::internal_failure_reason(58),
            }
        );
    }

    #[test]
    fn disabled_step_is_skipped_via_enablement_gate() {
        let mut gated = step("optional", None);
        gated.enabled_by = Some("RALPH_TEST_NEVER_SET_VAR".into());
        let config = PipelineConfig { name: "p".into(), steps: vec![gated, step("review", None)] };
        let runtime = ScriptedRuntime {
            script: RefCell::new(vec![StepResultRecord { result: StepResult::Pass, reason: None }]),
        };
        let dir = tempfile::tempdir().unwrap();
        let driver = PipelineDriver::new(
            &config,
            &runtime,
            None,
            dir.path().join("workspace"),
            dir.path().join("worker"),
            3600,
        );
        let mut state = PipelineState::new();
        let outcome = driver.run(&mut state, &NullSink).unwrap();
        assert_eq!(outcome, PipelineOutcome::Completed);
        // Only "review" ran; the gated step never bumped an attempt counter.
        assert_eq!(state.attempts_for("optional"), 0);
        assert_eq!(state.attempts_for("review"), 1);
    }
}
