//! The concrete [`AgentRuntime`] implementation: spawns the configured
//! agent command as a child process, enforces the per-step timeout with
//! SIGTERM followed by SIGKILL after a grace period, and reads
//! back the agent's `<result>` tag from its captured output.

use std::io::{self, Write as _};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ralph_core::agent::{AgentRuntime, InvokeOutcome, StepContext, StepResultRecord, parse_result_tag};
use ralph_core::error::{RalphError, Result};

use crate::config::AgentsConfig;

/// Grace period between SIGTERM and SIGKILL when a step's timeout expires
///.
pub const TERMINATION_GRACE: Duration = Duration::from_secs(10);

/// How often the invocation loop polls the child for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct CliAgentRuntime {
    agents: AgentsConfig,
}

impl CliAgentRuntime {
    #[must_use]
    pub fn new(agents: AgentsConfig) -> Self {
        Self { agents }
    }

    fn log_path(ctx: &StepContext) -> std::path::PathBuf {
        ctx.worker_dir.join("logs").join(format!("{}-{}.log", ctx.step_id, ctx.iteration))
    }

    fn result_tag_path(ctx: &StepContext) -> std::path::PathBuf {
        // The agent contract has the agent itself write its
        // `<result>` line; we read it back from the same captured-output
        // log rather than a second file, since the agent's stdout already
        // carries the report block the tag is embedded in.
        Self::log_path(ctx)
    }
}

fn io_err(detail: impl std::fmt::Display) -> RalphError {
    RalphError::Io(io::Error::other(detail.to_string()))
}

impl AgentRuntime for CliAgentRuntime {
    fn prepare(&self, ctx: &StepContext) -> Result<()> {
        std::fs::create_dir_all(ctx.worker_dir.join("logs")).map_err(RalphError::Io)?;
        std::fs::create_dir_all(ctx.worker_dir.join("results")).map_err(RalphError::Io)?;
        std::fs::create_dir_all(ctx.worker_dir.join("summaries")).map_err(RalphError::Io)?;
        std::fs::create_dir_all(ctx.worker_dir.join("conversations")).map_err(RalphError::Io)?;
        std::fs::create_dir_all(&ctx.workspace).map_err(RalphError::Io)?;
        Ok(())
    }

    fn invoke(&self, ctx: &StepContext) -> Result<InvokeOutcome> {
        let agent = self.agents.get(&ctx.agent).map_err(io_err)?;

        let mut command = Command::new(&agent.command);
        command
            .args(&agent.args)
            .arg("--workspace")
            .arg(&ctx.workspace)
            .arg("--step")
            .arg(&ctx.step_id)
            .arg("--iteration")
            .arg(ctx.iteration.to_string())
            .current_dir(&ctx.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(summary) = &ctx.previous_summary {
            command.arg("--previous-summary").arg(summary);
        }
        for (key, value) in &agent.env {
            command.env(key, value);
        }

        let mut child = command.spawn().map_err(RalphError::Io)?;
        let timeout = if ctx.timeout_seconds == 0 {
            agent.default_timeout()
        } else {
            Duration::from_secs(ctx.timeout_seconds)
        };

        // Pump stdout/stderr on their own threads concurrently with the
        // timeout poll below: the pipes are `Stdio::piped()`, and a verbose
        // agent writing past the OS pipe buffer would otherwise block in
        // `write()` forever, never reaching `try_wait`'s exit check.
        let stdout_pump = child.stdout.take().map(spawn_pump);
        let stderr_pump = child.stderr.take().map(spawn_pump);

        let outcome = wait_with_timeout(&mut child, timeout)?;

        let stdout_buf = stdout_pump.map(join_pump).unwrap_or_default();
        let stderr_buf = stderr_pump.map(join_pump).unwrap_or_default();
        write_captured_output(&stdout_buf, &stderr_buf, &Self::log_path(ctx))?;
        Ok(outcome)
    }

    fn read_result(&self, ctx: &StepContext) -> Result<Option<StepResultRecord>> {
        let path = Self::result_tag_path(ctx);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(RalphError::Io)?;
        Ok(parse_result_tag(&text).map(|result| StepResultRecord { result, reason: None }))
    }

    fn cleanup(&self, _ctx: &StepContext) -> Result<()> {
        Ok(())
    }
}

/// Wait for `child` to exit, polling at [`POLL_INTERVAL`]. On timeout,
/// SIGTERM the child and allow [`TERMINATION_GRACE`] before SIGKILL.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<InvokeOutcome> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().map_err(RalphError::Io)? {
            return Ok(InvokeOutcome { exit_code: status.code(), timed_out: false });
        }
        if start.elapsed() >= timeout {
            return Ok(terminate(child));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child) -> InvokeOutcome {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(child.id() as i32);
    // Sending a signal the child already handled (if it exited between
    // try_wait and here) is a documented no-op, not an error worth surfacing.
    let _ = signal::kill(pid, Signal::SIGTERM);
    let deadline = Instant::now() + TERMINATION_GRACE;
    while Instant::now() < deadline {
        if let Ok(Some(status)) = child.try_wait() {
            return InvokeOutcome { exit_code: status.code(), timed_out: true };
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    let _ = signal::kill(pid, Signal::SIGKILL);
    let _ = child.wait();
    InvokeOutcome { exit_code: None, timed_out: true }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> InvokeOutcome {
    let _ = child.kill();
    let _ = child.wait();
    InvokeOutcome { exit_code: None, timed_out: true }
}

/// Drain `reader` to completion on a dedicated thread, so a full pipe
/// buffer never blocks the writer waiting on the timeout poll loop.
fn spawn_pump(mut reader: impl io::Read + Send + 'static) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

/// Join a pump thread, tolerating a panic in the reader by falling back to
/// whatever was captured (nothing).
fn join_pump(handle: JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

fn write_captured_output(stdout: &[u8], stderr: &[u8], log_path: &std::path::Path) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent).map_err(RalphError::Io)?;
    }
    let mut file = std::fs::File::create(log_path).map_err(RalphError::Io)?;
    file.write_all(stdout).map_err(RalphError::Io)?;
    if !stderr.is_empty() {
        file.write_all(b"\n--- stderr ---\n").map_err(RalphError::Io)?;
        file.write_all(stderr).map_err(RalphError::Io)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentDef;
    use std::collections::HashMap;

    fn agents_with_echo() -> AgentsConfig {
        let mut agents = HashMap::new();
        agents.insert(
            "echo-agent".to_owned(),
            AgentDef {
                command: "sh".to_owned(),
                args: vec![
                    "-c".to_owned(),
                    "printf '<result>PASS</result>\\n'".to_owned(),
                ],
                default_timeout_seconds: 5,
                env: HashMap::new(),
            },
        );
        AgentsConfig { agents }
    }

    #[test]
    fn invoke_and_read_result_round_trips_pass() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = StepContext {
            workspace: dir.path().join("workspace"),
            worker_dir: dir.path().join("worker"),
            step_id: "implement".to_owned(),
            agent: "echo-agent".to_owned(),
            iteration: 1,
            timeout_seconds: 5,
            previous_summary: None,
        };
        let runtime = CliAgentRuntime::new(agents_with_echo());
        runtime.prepare(&ctx).unwrap();
        let outcome = runtime.invoke(&ctx).unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.exit_code, Some(0));
        let record = runtime.read_result(&ctx).unwrap().unwrap();
        assert_eq!(record.result, ralph_core::pipeline::StepResult::Pass);
    }

    #[test]
    fn invoke_times_out_and_kills_long_running_child() {
        let dir = tempfile::tempdir().unwrap();
        let mut agents = HashMap::new();
        agents.insert(
            "sleeper".to_owned(),
            AgentDef {
                command: "sh".to_owned(),
                args: vec!["-c".to_owned(), "sleep 30".to_owned()],
                default_timeout_seconds: 1,
                env: HashMap::new(),
            },
        );
        let ctx = StepContext {
            workspace: dir.path().join("workspace"),
            worker_dir: dir.path().join("worker"),
            step_id: "implement".to_owned(),
            agent: "sleeper".to_owned(),
            iteration: 1,
            timeout_seconds: 1,
            previous_summary: None,
        };
        let runtime = CliAgentRuntime::new(AgentsConfig { agents });
        runtime.prepare(&ctx).unwrap();
        let outcome = runtime.invoke(&ctx).unwrap();
        assert!(outcome.timed_out);
    }
}
