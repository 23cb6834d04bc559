//! The `AgentRuntime` strategy interface, and the wire-format helpers for the agent invocation
//! contract.
//!
//! The AI coding tool subprocess itself is an external collaborator;
//! `ralph-core` only defines the seam. `ralph-cli` provides the concrete
//! process-spawning implementation.

use std::path::PathBuf;

use std::sync::OnceLock;

use regex::Regex;

use crate::error::Result;
use crate::pipeline::config::StepResult;

/// Everything one step invocation needs to hand to the agent runtime.
#[derive(Clone, Debug)]
pub struct StepContext {
    /// The worker's workspace (git worktree) the agent must confine itself to.
    pub workspace: PathBuf,
    /// The worker's own directory (for logs, results, summaries).
    pub worker_dir: PathBuf,
    /// The step (or fix sub-step) ID.
    pub step_id: String,
    /// The agent identifier to invoke (an entry in `config/agents.json`).
    pub agent: String,
    /// Which attempt at this step this is (1-based).
    pub iteration: u32,
    /// Enforced wall-clock timeout for this invocation (default 3600s).
    pub timeout_seconds: u64,
    /// Path to the previous iteration's summary, if any (the "continuation
    /// context pointer" passed to the next invocation).
    pub previous_summary: Option<PathBuf>,
}

/// What happened when the child process ran, before its result file is
/// consulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InvokeOutcome {
    /// The child's exit code, or `None` if it was killed (e.g. on timeout).
    pub exit_code: Option<i32>,
    /// `true` if the orchestrator had to SIGTERM/SIGKILL the child after its
    /// timeout expired.
    pub timed_out: bool,
}

/// The parsed contents of a step's result file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepResultRecord {
    /// The declared outcome.
    pub result: StepResult,
    /// An optional free-text reason (e.g. `"timeout"`, `"output-missing"`).
    pub reason: Option<String>,
}

/// The strategy interface an agent runtime implements. Object-safe so
/// callers can hold `&dyn AgentRuntime` / `Box<dyn AgentRuntime>`.
pub trait AgentRuntime {
    /// Set up anything the invocation needs before the child is spawned
    /// (e.g. writing the PRD, runtime-prompt wrappers).
    ///
    /// # Errors
    /// Implementations may fail on I/O.
    fn prepare(&self, ctx: &StepContext) -> Result<()>;

    /// Spawn the agent process and wait for it to finish (or time out).
    ///
    /// # Errors
    /// Implementations may fail to spawn the process at all; a timeout is
    /// reported via `InvokeOutcome`, not an `Err`.
    fn invoke(&self, ctx: &StepContext) -> Result<InvokeOutcome>;

    /// Read and parse the step's result file, if present.
    ///
    /// # Errors
    /// Implementations may fail on I/O; a missing or malformed result is
    /// `Ok(None)`, not an error — the pipeline engine treats that as FAIL
    /// with reason `output-missing`.
    fn read_result(&self, ctx: &StepContext) -> Result<Option<StepResultRecord>>;

    /// Release anything `prepare`/`invoke` allocated. Safe to call even if
    /// the step never actually ran.
    ///
    /// # Errors
    /// Implementations may fail on I/O.
    fn cleanup(&self, ctx: &StepContext) -> Result<()>;
}

fn result_tag_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"<result>(PASS|FIX|FAIL|SKIP|STOP)</result>").expect("static regex is valid"))
}

/// Parse the `<result>...</result>` tag out of a result file's contents.
#[must_use]
pub fn parse_result_tag(text: &str) -> Option<StepResult> {
    let captures = result_tag_regex().captures(text)?;
    match &captures[1] {
        "PASS" => Some(StepResult::Pass),
        "FIX" => Some(StepResult::Fix),
        "FAIL" => Some(StepResult::Fail),
        "SKIP" => Some(StepResult::Skip),
        "STOP" => Some(StepResult::Stop),
        _ => None,
    }
}

/// Exit codes 56-63 are reserved for agent-internal failures.
#[must_use]
pub fn is_agent_internal_failure_code(code: i32) -> bool {
    (56..=63).contains(&code)
}

const INTERNAL_FAILURE_REASON_PREFIX: &str = "agent-internal-failure:";

/// Encode an agent-internal-failure exit code as a pipeline abort reason,
/// so it survives the step-result/FAIL-routing plumbing up to whatever
/// dispatches the worker's outcome.
#[must_use]
pub fn internal_failure_reason(code: i32) -> String {
    format!("{INTERNAL_FAILURE_REASON_PREFIX}{code}")
}

/// Recover the exit code [`internal_failure_reason`] encoded, if `reason`
/// was produced by it.
#[must_use]
pub fn internal_failure_code_in_reason(reason: &str) -> Option<i32> {
    reason.strip_prefix(INTERNAL_FAILURE_REASON_PREFIX)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_result_tag() {
        for (text, expected) in [
            ("<result>PASS</result>", StepResult::Pass),
            ("report\n<result>FIX</result>\nmore", StepResult::Fix),
            ("<result>FAIL</result>", StepResult::Fail),
            ("<result>SKIP</result>", StepResult::Skip),
            ("<result>STOP</result>", StepResult::Stop),
        ] {
            assert_eq!(parse_result_tag(text), Some(expected));
        }
    }

    #[test]
    fn missing_tag_is_none() {
        assert_eq!(parse_result_tag("no tag here"), None);
    }

    #[test]
    fn internal_failure_codes_are_56_to_63() {
        assert!(!is_agent_internal_failure_code(55));
        assert!(is_agent_internal_failure_code(56));
        assert!(is_agent_internal_failure_code(63));
        assert!(!is_agent_internal_failure_code(64));
    }

    #[test]
    fn internal_failure_reason_round_trips() {
        assert_eq!(internal_failure_code_in_reason(&internal_failure_reason(58)), Some(58));
        assert_eq!(internal_failure_code_in_reason("timeout"), None);
    }
}
