//! Shared helpers for the end-to-end scenario tests.
//!
//! `ralph` ships a thin library crate (`src/lib.rs`) specifically so these
//! tests can exercise `ralph-core` in-process rather than driving a compiled
//! binary: a scripted
//! `AgentRuntime` stands in for the real subprocess-spawning one in
//! `ralph-cli`, and a tempdir stands in for a project's `.ralph/` tree.

use std::cell::RefCell;
use std::path::PathBuf;

use ralph::core::agent::{AgentRuntime, InvokeOutcome, StepContext, StepResultRecord};
use ralph::core::error::Result;
use ralph::core::pipeline::StepResult;

/// An `AgentRuntime` whose `read_result` plays back a fixed script, one
/// entry per invocation, in call order.
pub struct ScriptedRuntime {
    script: RefCell<Vec<StepResultRecord>>,
    invocations: RefCell<Vec<String>>,
}

impl ScriptedRuntime {
    /// Build a runtime that returns `script` in order, earliest first.
    #[must_use]
    pub fn new(script: Vec<StepResultRecord>) -> Self {
        // Stored reversed so `Vec::pop` drains in the given order.
        let mut reversed = script;
        reversed.reverse();
        Self { script: RefCell::new(reversed), invocations: RefCell::new(Vec::new()) }
    }

    /// Build a runtime from a list of bare [`StepResult`]s, no reasons.
    #[must_use]
    pub fn from_results(results: &[StepResult]) -> Self {
        Self::new(results.iter().map(|r| StepResultRecord { result: *r, reason: None }).collect())
    }

    /// The step IDs invoked so far, in call order.
    #[must_use]
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.borrow().clone()
    }
}

impl AgentRuntime for ScriptedRuntime {
    fn prepare(&self, _ctx: &StepContext) -> Result<()> {
        Ok(())
    }

    fn invoke(&self, ctx: &StepContext) -> Result<InvokeOutcome> {
        self.invocations.borrow_mut().push(ctx.step_id.clone());
        Ok(InvokeOutcome { exit_code: Some(0), timed_out: false })
    }

    fn read_result(&self, _ctx: &StepContext) -> Result<Option<StepResultRecord>> {
        Ok(self.script.borrow_mut().pop())
    }

    fn cleanup(&self, _ctx: &StepContext) -> Result<()> {
        Ok(())
    }
}

/// Build one `- [<status>] **[<id>]**` board block with the given fields.
#[must_use]
pub fn task_block(id: &str, status: char, priority: &str, deps: &[&str]) -> String {
    let deps_line = if deps.is_empty() { "none".to_owned() } else { deps.join(", ") };
    format!(
        "- [{status}] **[{id}]** {id} task\n  - Description: exercises the scenario tests\n  - Priority: {priority}\n  - Dependencies: {deps_line}\n"
    )
}

/// Write a full board file (a heading plus a list of blocks) to `path`.
pub fn write_board(path: &std::path::Path, blocks: &[String]) {
    let mut content = String::from("## Tasks\n\n");
    for block in blocks {
        content.push_str(block);
        content.push('\n');
    }
    std::fs::write(path, content).expect("write board.md");
}

/// A fresh `.ralph`-shaped layout under a tempdir, without needing the full
/// `RalphPaths` struct from `ralph-cli` (which this crate doesn't depend on).
pub struct Scratch {
    pub dir: tempfile::TempDir,
}

impl Scratch {
    #[must_use]
    pub fn new() -> Self {
        Self { dir: tempfile::tempdir().expect("tempdir") }
    }

    #[must_use]
    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }
}

impl Default for Scratch {
    fn default() -> Self {
        Self::new()
    }
}
