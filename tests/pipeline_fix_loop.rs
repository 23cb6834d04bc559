//! Scenario S2: a step returns FIX, its inline fix sub-step runs
//! and PASSes, and the original step re-runs and PASSes without its own
//! attempt counter double-counting the fix round-trip.

mod common;

use common::ScriptedRuntime;

use ralph::core::events::NullSink;
use ralph::core::pipeline::{FixConfig, PipelineConfig, PipelineDriver, PipelineOutcome, PipelineState, StepConfig, StepResult};

fn step(id: &str) -> StepConfig {
    StepConfig {
        id: id.to_owned(),
        agent: "impl".into(),
        blocking: false,
        readonly: false,
        enabled_by: None,
        commit_after: false,
        depends_on: None,
        max: None,
        fix: None,
        result_mappings: std::collections::HashMap::new(),
    }
}

#[test]
fn fix_substep_pass_reruns_original_step() {
    let mut implement = step("implement");
    implement.fix = Some(FixConfig {
        id: "implement-fix".into(),
        agent: "fixer".into(),
        max_attempts: None,
        commit_after: false,
    });
    let config = PipelineConfig { name: "default".into(), steps: vec![implement, step("review")] };

    // Call order: implement(FIX) -> implement-fix(PASS) -> implement(PASS) -> review(PASS).
    let runtime = ScriptedRuntime::from_results(&[
        StepResult::Fix,
        StepResult::Pass,
        StepResult::Pass,
        StepResult::Pass,
    ]);
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
    assert_eq!(runtime.invocations(), vec!["implement", "implement-fix", "implement", "review"]);
    assert_eq!(state.attempts_for("implement"), 2);
    assert_eq!(state.fix_attempts_for("implement-fix"), 1);
    assert_eq!(state.attempts_for("review"), 1);
}

#[test]
fn fix_substep_fail_exhausts_and_aborts_original_step() {
    let mut implement = step("implement");
    implement.fix = Some(FixConfig {
        id: "implement-fix".into(),
        agent: "fixer".into(),
        max_attempts: Some(1),
        commit_after: false,
    });
    let config = PipelineConfig { name: "default".into(), steps: vec![implement] };

    // implement(FIX) -> implement-fix(FAIL), fix's own cap (1) is immediately
    // exhausted, so the original step aborts rather than retrying forever.
    let runtime = ScriptedRuntime::from_results(&[StepResult::Fix, StepResult::Fail]);
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

    match outcome {
        PipelineOutcome::Aborted { step_id, .. } => assert_eq!(step_id, "implement"),
        other => panic!("expected an abort, got {other:?}"),
    }
}
