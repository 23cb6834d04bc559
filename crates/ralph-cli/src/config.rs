//! Typed loaders for the `config/` tree: `pipeline.json`, `pipelines/<name>.json`,
//! `agents.json`, `worker-lifecycle.json`, and the optional `services.json`.
//!
//! Every required file is rejected with an unrecognized-field error the way
//! the kanban board and pipeline configs already are in `ralph-core` — we
//! mirror that strictness here with `#[serde(deny_unknown_fields)]` so a
//! typo in a config file fails fast instead of being silently ignored.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use ralph_core::pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};

use crate::paths::RalphPaths;

/// One agent's invocation shape, addressed by the identifier pipeline steps
/// reference in their `agent` field.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentDef {
    /// Executable to invoke (resolved on `PATH` unless absolute).
    pub command: String,
    /// Fixed argument prefix; the runtime appends the prompt/result paths.
    #[serde(default)]
    pub args: Vec<String>,
    /// Per-invocation timeout, in seconds, absent a step-level override.
    pub default_timeout_seconds: u64,
    /// Extra environment variables to set for this agent's process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl AgentDef {
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_seconds)
    }
}

/// `config/agents.json`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentsConfig {
    pub agents: HashMap<String, AgentDef>,
}

impl AgentsConfig {
    /// # Errors
    /// Returns an error if the agent identifier is not configured.
    pub fn get(&self, name: &str) -> Result<&AgentDef> {
        self.agents
            .get(name)
            .with_context(|| format!("agent '{name}' is not declared in config/agents.json"))
    }
}

/// Admission capacity by worker kind.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerCapacity {
    #[serde(default = "default_main_capacity")]
    pub main: usize,
    #[serde(default = "default_fix_capacity")]
    pub fix: usize,
    #[serde(default = "default_resolve_capacity")]
    pub resolve: usize,
}

fn default_main_capacity() -> usize {
    4
}
fn default_fix_capacity() -> usize {
    2
}
fn default_resolve_capacity() -> usize {
    1
}

impl Default for WorkerCapacity {
    fn default() -> Self {
        Self {
            main: default_main_capacity(),
            fix: default_fix_capacity(),
            resolve: default_resolve_capacity(),
        }
    }
}

/// `config/worker-lifecycle.json` — the lifecycle spec itself plus the
/// admission capacity it's paired with. The spec body is parsed by
/// `ralph_core::lifecycle::LifecycleSpec`; this wrapper only adds the
/// capacity knobs that are the CLI's concern, not the lifecycle engine's.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerLifecycleConfig {
    #[serde(default)]
    pub capacity: WorkerCapacity,
    #[serde(flatten)]
    pub spec: serde_json::Value,
}

/// `config/services.json` — optional, arbitrary per-deployment service
/// endpoints (e.g. a PR-hosting API base URL). Not interpreted by the
/// orchestrator core; commands read specific keys as needed.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(flatten)]
    pub values: serde_json::Map<String, serde_json::Value>,
}

fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {} as JSON", path.display()))
}

/// Load `config/agents.json`.
///
/// # Errors
/// Returns an error if the file is missing or fails to parse.
pub fn load_agents(paths: &RalphPaths) -> Result<AgentsConfig> {
    load_json(&paths.agents_config())
}

/// Load `config/worker-lifecycle.json`.
///
/// # Errors
/// Returns an error if the file is missing or fails to parse.
pub fn load_worker_lifecycle(paths: &RalphPaths) -> Result<WorkerLifecycleConfig> {
    load_json(&paths.lifecycle_spec())
}

/// Load `config/services.json` if present, else the empty default.
///
/// # Errors
/// Returns an error if the file exists but fails to parse.
pub fn load_services(paths: &RalphPaths) -> Result<ServicesConfig> {
    let path = paths.services_config();
    if path.exists() {
        load_json(&path)
    } else {
        Ok(ServicesConfig::default())
    }
}

/// Load the default pipeline, `config/pipeline.json`, and validate it.
///
/// # Errors
/// Returns an error if the file is missing, fails to parse, or fails
/// structural validation.
pub fn load_default_pipeline(paths: &RalphPaths) -> Result<PipelineConfig> {
    load_pipeline(&paths.default_pipeline_config())
}

/// Load a named pipeline, `config/pipelines/<name>.json`, and validate it.
///
/// # Errors
/// Returns an error if the file is missing, fails to parse, or fails
/// structural validation.
pub fn load_named_pipeline(paths: &RalphPaths, name: &str) -> Result<PipelineConfig> {
    load_pipeline(&paths.named_pipeline_config(name))
}

fn load_pipeline(path: &Path) -> Result<PipelineConfig> {
    let config: PipelineConfig = load_json(path)?;
    config
        .validate()
        .with_context(|| format!("validating pipeline config {}", path.display()))?;
    if config.steps.is_empty() {
        bail!("pipeline '{}' has no steps", config.name);
    }
    Ok(config)
}
