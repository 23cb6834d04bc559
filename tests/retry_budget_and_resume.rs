//! Scenario S3: a step's retry cap is exhausted, the pipeline
//! aborts, and the Resume Controller's exit-code convention plus attempt
//! budget eventually excludes the worker from further scheduling.

mod common;

use common::ScriptedRuntime;

use ralph::core::events::NullSink;
use ralph::core::pipeline::{PipelineConfig, PipelineDriver, PipelineOutcome, PipelineState, StepConfig, StepResult};
use ralph::core::resume::{ResumeDecision, ResumeState};

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
        result_mappings: std::collections::HashMap::new(),
    }
}

#[test]
fn retry_cap_forces_fail_then_aborts() {
    let config = PipelineConfig { name: "default".into(), steps: vec![step("flaky", Some(1))] };
    // attempt 1: FIX -> routed prev (re-attempt, default mapping since no
    // fix sub-step is declared); attempt 2 exceeds max(1) -> forced FAIL -> abort.
    let runtime = ScriptedRuntime::from_results(&[StepResult::Fix, StepResult::Fix]);
    let dir = tempfile::tempdir().unwrap();
    let driver = PipelineDriver::new(&config, &runtime, None, dir.path().join("workspace"), dir.path().join("worker"), 3600);
    let mut state = PipelineState::new();
    let outcome = driver.run(&mut state, &NullSink).unwrap();
    assert_eq!(outcome, PipelineOutcome::Aborted { step_id: "flaky".into(), reason: "max-attempts-exceeded".into() });
}

#[test]
fn implicit_exit_code_retries_until_budget_exhausted_then_aborts() {
    // No ABORT/DEFER/COMPLETE exit code (65/66/67) was returned, so the
    // decision falls back to an implicit RETRY, except once the worker has
    // already used its whole attempt budget, where it falls back to ABORT.
    let max_attempts = 3;
    for attempt_count in 0..max_attempts {
        let decision = ResumeDecision::from_exit_code(1, "default", "implement", attempt_count, max_attempts);
        assert_eq!(decision, ResumeDecision::Retry { pipeline: "default".into(), step_id: "implement".into() });
    }
    let exhausted = ResumeDecision::from_exit_code(1, "default", "implement", max_attempts, max_attempts);
    assert_eq!(exhausted, ResumeDecision::Abort);
}

#[test]
fn applying_repeated_retry_decisions_eventually_excludes_worker_from_scheduling() {
    let dir = tempfile::tempdir().unwrap();
    let board_path = dir.path().join("board.md");
    std::fs::write(&board_path, "## Tasks\n\n- [=] **[TASK-0001]** flaky task\n  - Description: retried repeatedly\n  - Priority: HIGH\n  - Dependencies: none\n").unwrap();
    let board_lock = dir.path().join("board.lock");
    let resume_path = dir.path().join("worker/resume-state.json");
    let resume_lock = dir.path().join("worker/resume-state.lock");
    let task_id = ralph::core::model::TaskId::new("TASK-0001").unwrap();

    let mut now = 1_000_000u64;
    for _ in 0..3 {
        let decision = ResumeDecision::Retry { pipeline: "default".into(), step_id: "implement".into() };
        ralph::core::resume::apply_decision(&resume_path, &resume_lock, &board_path, &board_lock, &task_id, &decision, now, 3600).unwrap();
        now += 1;
    }

    let state = ResumeState::load_or_default(&resume_path).unwrap();
    assert_eq!(state.attempt_count, 3);
    assert!(!state.eligible_for_scheduling(now), "a worker at its attempt budget must not be eligible for scheduling");
}

#[test]
fn defer_decision_applies_a_cooldown_then_becomes_eligible_again() {
    let dir = tempfile::tempdir().unwrap();
    let board_path = dir.path().join("board.md");
    std::fs::write(&board_path, "## Tasks\n\n- [=] **[TASK-0002]** deferred task\n  - Description: cools down\n  - Priority: MEDIUM\n  - Dependencies: none\n").unwrap();
    let board_lock = dir.path().join("board.lock");
    let resume_path = dir.path().join("worker/resume-state.json");
    let resume_lock = dir.path().join("worker/resume-state.lock");
    let task_id = ralph::core::model::TaskId::new("TASK-0002").unwrap();

    let now = 1_000_000u64;
    ralph::core::resume::apply_decision(&resume_path, &resume_lock, &board_path, &board_lock, &task_id, &ResumeDecision::Defer, now, 3600).unwrap();

    let state = ResumeState::load_or_default(&resume_path).unwrap();
    assert!(!state.eligible_for_scheduling(now), "still within cooldown");
    assert!(state.eligible_for_scheduling(now + 3601), "cooldown should have expired");
}
