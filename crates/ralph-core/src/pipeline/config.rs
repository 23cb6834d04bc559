//! Pipeline configuration types.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{RalphError, Result};

/// A step's declared outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepResult {
    /// The step succeeded.
    Pass,
    /// The step wants a corrective pass before being re-evaluated.
    Fix,
    /// The step failed.
    Fail,
    /// The step was skipped by its own logic (distinct from enablement-gate
    /// skipping).
    Skip,
    /// The step demands the pipeline halt entirely.
    Stop,
}

/// Where a result routes to next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteAction {
    /// Advance to the next step.
    Next,
    /// Re-run the previous step.
    Prev,
    /// Exit the pipeline; surfaces to the Resume Controller.
    Abort,
    /// Jump to a specific step by ID.
    Jump(String),
}

impl FromStr for RouteAction {
    type Err = RalphError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "next" => Ok(Self::Next),
            "prev" => Ok(Self::Prev),
            "abort" => Ok(Self::Abort),
            other => other.strip_prefix("jump:").map(|id| Self::Jump(id.to_owned())).ok_or_else(|| {
                RalphError::InvalidPipelineConfig {
                    reason: format!("unknown route action '{other}' (expected next, prev, abort, or jump:<step-id>)"),
                }
            }),
        }
    }
}

impl fmt::Display for RouteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Next => f.write_str("next"),
            Self::Prev => f.write_str("prev"),
            Self::Abort => f.write_str("abort"),
            Self::Jump(id) => write!(f, "jump:{id}"),
        }
    }
}

impl Serialize for RouteAction {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RouteAction {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An inline sub-agent descriptor, used as a result-mapping handler: a
/// result-mapping entry may inline an agent descriptor `{id, agent, max}`
/// as its own handler. Runs as an ephemeral step — not part of
/// the pipeline's ordered `steps` sequence — whose own result is routed via
/// the standard PASS/FIX/FAIL/SKIP/STOP default table, limited to
/// `next`/`prev`/`abort`/`jump`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InlineAgentConfig {
    /// The ephemeral step's own ID (used for its result-file/checkpoint
    /// bookkeeping; not registered in `PipelineConfig::steps`).
    pub id: String,
    /// Agent identifier to invoke.
    pub agent: String,
    /// Cap on attempts before routing as FAIL (default 3, matching a
    /// regular step's default retry cap).
    #[serde(default)]
    pub max: Option<u32>,
}

impl InlineAgentConfig {
    /// The effective attempt cap (default 3).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max.unwrap_or(3)
    }
}

/// A result-mapping entry's handler: either a plain routing action, or an
/// inline sub-agent descriptor.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultHandler {
    /// Route directly to one of `next`/`prev`/`abort`/`jump:<id>`.
    Route(RouteAction),
    /// Run an ephemeral inline agent first; its own result determines the
    /// route.
    InlineAgent(InlineAgentConfig),
}

/// The default routing action for a bare result
/// (PASS/SKIP -> next, FAIL/STOP -> abort, FIX -> prev).
#[must_use]
pub fn default_route_for(result: StepResult) -> RouteAction {
    match result {
        StepResult::Pass | StepResult::Skip => RouteAction::Next,
        StepResult::Fail | StepResult::Stop => RouteAction::Abort,
        StepResult::Fix => RouteAction::Prev,
    }
}

/// An inline fix sub-step, run in response to a parent step's FIX result.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixConfig {
    /// The fix sub-step's own ID (must differ from its parent's).
    pub id: String,
    /// Agent identifier to invoke.
    pub agent: String,
    /// Cap on fix attempts before routing as FAIL (default 2).
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Whether to commit after a fix attempt that resolves cleanly.
    #[serde(default)]
    pub commit_after: bool,
}

impl FixConfig {
    /// The effective attempt cap (default 2).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.unwrap_or(2)
    }
}

/// One pipeline step.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    /// Unique (within the pipeline) step ID.
    pub id: String,
    /// Agent identifier to invoke.
    pub agent: String,
    /// Whether this step blocks concurrent admission (reserved for the
    /// Worker Pool's scheduling policy; not interpreted here).
    #[serde(default)]
    pub blocking: bool,
    /// Whether this step only reads the workspace (never commits).
    #[serde(default)]
    pub readonly: bool,
    /// An environment-variable name gating whether this step runs at all.
    #[serde(default)]
    pub enabled_by: Option<String>,
    /// Whether to commit the workspace after a PASS/FIX/SKIP result.
    #[serde(default)]
    pub commit_after: bool,
    /// An earlier step ID this one depends on (validated, not scheduled).
    #[serde(default)]
    pub depends_on: Option<String>,
    /// Retry cap for this step (default 3).
    #[serde(default)]
    pub max: Option<u32>,
    /// An inline fix sub-step run on a FIX result.
    #[serde(default)]
    pub fix: Option<FixConfig>,
    /// Overrides of the default result routing. A mapping may be a plain
    /// route, or inline an agent descriptor to run as an ephemeral step
    /// first.
    #[serde(default)]
    pub result_mappings: HashMap<StepResult, ResultHandler>,
}

impl StepConfig {
    /// The effective per-step retry cap (default 3).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max.unwrap_or(3)
    }

    /// The routing action for `result`, applying the default PASS/FAIL
    /// routing where `result_mappings` doesn't override with a plain
    /// [`RouteAction`]. Returns `None` when the mapping for `result` is an
    /// [`ResultHandler::InlineAgent`] — the caller must drive that agent and
    /// route on its outcome instead.
    #[must_use]
    pub fn route_for(&self, result: StepResult) -> Option<RouteAction> {
        match self.result_mappings.get(&result) {
            Some(ResultHandler::Route(action)) => Some(action.clone()),
            Some(ResultHandler::InlineAgent(_)) => None,
            None => Some(default_route_for(result)),
        }
    }

    /// The inline agent descriptor mapped to `result`, if any.
    #[must_use]
    pub fn inline_agent_for(&self, result: StepResult) -> Option<&InlineAgentConfig> {
        match self.result_mappings.get(&result) {
            Some(ResultHandler::InlineAgent(cfg)) => Some(cfg),
            _ => None,
        }
    }
}

/// A named sequence of steps.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// The pipeline's name.
    pub name: String,
    /// Its ordered steps.
    pub steps: Vec<StepConfig>,
}

impl PipelineConfig {
    /// The index of the step with ID `id`, if any.
    #[must_use]
    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    /// Validate the structural invariants from the design: step IDs unique;
    /// any `depends_on` references an earlier step; no step declares itself
    /// as its own fix; any `jump:<id>` target exists.
    ///
    /// # Errors
    /// Returns [`RalphError::InvalidPipelineConfig`] on the first violation.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for (idx, step) in self.steps.iter().enumerate() {
            if !seen.insert(step.id.as_str()) {
                return Err(RalphError::InvalidPipelineConfig {
                    reason: format!("duplicate step id '{}'", step.id),
                });
            }
            if let Some(dep) = &step.depends_on {
                let dep_idx = self.step_index(dep).ok_or_else(|| RalphError::InvalidPipelineConfig {
                    reason: format!("step '{}' depends_on unknown step '{dep}'", step.id),
                })?;
                if dep_idx >= idx {
                    return Err(RalphError::InvalidPipelineConfig {
                        reason: format!("step '{}' depends_on '{dep}', which is not earlier in the pipeline", step.id),
                    });
                }
            }
            if let Some(fix) = &step.fix {
                if fix.id == step.id {
                    return Err(RalphError::InvalidPipelineConfig {
                        reason: format!("step '{}' declares itself as its own fix", step.id),
                    });
                }
            }
            for handler in step.result_mappings.values() {
                if let ResultHandler::Route(RouteAction::Jump(target)) = handler {
                    if self.step_index(target).is_none() {
                        return Err(RalphError::InvalidPipelineConfig {
                            reason: format!("step '{}' jumps to unknown step '{target}'", step.id),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_action_round_trips_through_string() {
        for (s, expected) in [
            ("next", RouteAction::Next),
            ("prev", RouteAction::Prev),
            ("abort", RouteAction::Abort),
            ("jump:step-3", RouteAction::Jump("step-3".to_owned())),
        ] {
            let parsed: RouteAction = s.parse().unwrap();
            assert_eq!(parsed, expected);
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn default_routing_matches_spec_table() {
        let step = StepConfig {
            id: "s".into(),
            agent: "a".into(),
            blocking: false,
            readonly: false,
            enabled_by: None,
            commit_after: false,
            depends_on: None,
            max: None,
            fix: None,
            result_mappings: HashMap::new(),
        };
        assert_eq!(step.route_for(StepResult::Pass), Some(RouteAction::Next));
        assert_eq!(step.route_for(StepResult::Skip), Some(RouteAction::Next));
        assert_eq!(step.route_for(StepResult::Fail), Some(RouteAction::Abort));
        assert_eq!(step.route_for(StepResult::Fix), Some(RouteAction::Prev));
    }

    #[test]
    fn inline_agent_mapping_is_not_a_plain_route() {
        let mut result_mappings = HashMap::new();
        result_mappings.insert(
            StepResult::Fail,
            ResultHandler::InlineAgent(InlineAgentConfig { id: "s-recover".into(), agent: "recover".into(), max: Some(2) }),
        );
        let step = StepConfig {
            id: "s".into(),
            agent: "a".into(),
            blocking: false,
            readonly: false,
            enabled_by: None,
            commit_after: false,
            depends_on: None,
            max: None,
            fix: None,
            result_mappings,
        };
        assert_eq!(step.route_for(StepResult::Fail), None);
        let inline = step.inline_agent_for(StepResult::Fail).unwrap();
        assert_eq!(inline.id, "s-recover");
        assert_eq!(inline.max_attempts(), 2);
    }

    #[test]
    fn validate_rejects_jump_to_unknown_step_via_inline_and_plain_mappings() {
        let mut result_mappings = HashMap::new();
        result_mappings.insert(StepResult::Fail, ResultHandler::Route(RouteAction::Jump("nope".into())));
        let config = PipelineConfig {
            name: "p".into(),
            steps: vec![StepConfig {
                id: "s".into(),
                agent: "a".into(),
                blocking: false,
                readonly: false,
                enabled_by: None,
                commit_after: false,
                depends_on: None,
                max: None,
                fix: None,
                result_mappings,
            }],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_self_referential_fix() {
        let config = PipelineConfig {
            name: "p".into(),
            steps: vec![StepConfig {
                id: "s".into(),
                agent: "a".into(),
                blocking: false,
                readonly: false,
                enabled_by: None,
                commit_after: false,
                depends_on: None,
                max: None,
                fix: Some(FixConfig { id: "s".into(), agent: "a".into(), max_attempts: None, commit_after: false }),
                result_mappings: HashMap::new(),
            }],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_forward_depends_on() {
        let config = PipelineConfig {
            name: "p".into(),
            steps: vec![
                StepConfig {
                    id: "a".into(),
                    agent: "ag".into(),
                    blocking: false,
                    readonly: false,
                    enabled_by: None,
                    commit_after: false,
                    depends_on: Some("b".into()),
                    max: None,
                    fix: None,
                    result_mappings: HashMap::new(),
                },
                StepConfig {
                    id: "b".into(),
                    agent: "ag".into(),
                    blocking: false,
                    readonly: false,
                    enabled_by: None,
                    commit_after: false,
                    depends_on: None,
                    max: None,
                    fix: None,
                    result_mappings: HashMap::new(),
                },
            ],
        };
        assert!(config.validate().is_err());
    }
}
