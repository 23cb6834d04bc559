//! Scenario S6: a worker exhausts its recovery budget. The
//! `check_permanent` effect marks the task permanently failed on the board,
//! and an independent ABORT from the Resume Controller reaches the same
//! terminal board state through its own path.

use ralph::core::lifecycle::{EffectContext, EffectRegistry, GuardRegistry, LifecycleState};
use ralph::core::model::{TaskId, TaskStatus};
use ralph::core::resume::ResumeDecision;
use ralph::core::{board, resume};

fn write_board(path: &std::path::Path, id: &str) {
    std::fs::write(
        path,
        format!("## Tasks\n\n- [ ] **[{id}]** permanently broken task\n  - Description: keeps failing\n  - Priority: CRITICAL\n  - Dependencies: none\n"),
    )
    .unwrap();
}

#[test]
fn recovery_budget_exhaustion_marks_the_task_failed_via_check_permanent() {
    let dir = tempfile::tempdir().unwrap();
    let board_path = dir.path().join("board.md");
    let board_lock = dir.path().join("board.lock");
    write_board(&board_path, "TASK-0001");

    let effects = EffectRegistry::with_defaults();
    let mut state = LifecycleState::new("recovering");
    state.recovery_attempts = 1; // already at the configured max

    let ctx = EffectContext {
        worker_dir: dir.path().join("worker"),
        task_id: TaskId::new("TASK-0001").unwrap(),
        board_path: board_path.clone(),
        board_lock_path: board_lock.clone(),
        conflict_queue_path: None,
        conflict_lock_path: None,
        git: None,
        max_merge_attempts: 2,
        max_recovery_attempts: 1,
    };

    effects.run("check_permanent", &mut state, &ctx, &serde_json::Value::Null).unwrap();

    let tasks = board::parse_all(&board_path).unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Failed);
}

#[test]
fn check_permanent_is_a_no_op_while_recovery_budget_remains() {
    let dir = tempfile::tempdir().unwrap();
    let board_path = dir.path().join("board.md");
    let board_lock = dir.path().join("board.lock");
    write_board(&board_path, "TASK-0002");

    let effects = EffectRegistry::with_defaults();
    let mut state = LifecycleState::new("recovering");
    state.recovery_attempts = 0;

    let ctx = EffectContext {
        worker_dir: dir.path().join("worker"),
        task_id: TaskId::new("TASK-0002").unwrap(),
        board_path: board_path.clone(),
        board_lock_path: board_lock.clone(),
        conflict_queue_path: None,
        conflict_lock_path: None,
        git: None,
        max_merge_attempts: 2,
        max_recovery_attempts: 1,
    };

    effects.run("check_permanent", &mut state, &ctx, &serde_json::Value::Null).unwrap();

    let tasks = board::parse_all(&board_path).unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Pending);
}

#[test]
fn resume_controller_abort_independently_marks_the_task_failed() {
    let dir = tempfile::tempdir().unwrap();
    let board_path = dir.path().join("board.md");
    let board_lock = dir.path().join("board.lock");
    write_board(&board_path, "TASK-0003");

    let resume_path = dir.path().join("worker/resume-state.json");
    let resume_lock = dir.path().join("worker/resume-state.lock");
    let task_id = TaskId::new("TASK-0003").unwrap();

    let decision = ResumeDecision::from_exit_code(65, "default", "implement", 0, 3);
    assert_eq!(decision, ResumeDecision::Abort);

    let state = resume::apply_decision(&resume_path, &resume_lock, &board_path, &board_lock, &task_id, &decision, 1_000_000, 3600).unwrap();
    assert!(state.terminal);
    assert!(!state.eligible_for_scheduling(2_000_000));

    let tasks = board::parse_all(&board_path).unwrap();
    assert_eq!(tasks[0].status, TaskStatus::Failed);
}
