//! Lifecycle spec: loading and structural validation.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RalphError, Result};

/// The type of a lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    /// The state a fresh worker starts in.
    Initial,
    /// A resting state awaiting an external event (e.g. merge conflict).
    Waiting,
    /// A resting state representing in-progress work.
    Running,
    /// Must be immediately chained; never an observable resting state.
    Transient,
    /// Rejects every event except a declared recovery allowlist.
    Terminal,
}

/// One state definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateDef {
    /// The state's type.
    #[serde(rename = "type")]
    pub kind: StateKind,
    /// For transient states, the successor state reached via `chain`'s
    /// declared event (see [`LifecycleSpec::transitions`]).
    #[serde(default)]
    pub chain: Option<String>,
}

fn is_wildcard(raw: &str) -> bool {
    raw == "*"
}

/// One transition rule.
#[derive(Clone, Debug)]
pub struct Transition {
    /// `None` means the wildcard ("any non-terminal state").
    pub from: Option<String>,
    /// The event name this transition responds to.
    pub event: String,
    /// An optional named guard; absent means "always matches".
    pub guard: Option<String>,
    /// The destination state.
    pub to: String,
    /// Effects applied, in order, when this transition fires.
    pub effects: Vec<String>,
}

impl Transition {
    /// `true` if this is a wildcard ("any non-terminal state") transition.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.from.is_none()
    }
}

#[derive(Deserialize)]
struct RawTransition {
    from: String,
    event: String,
    #[serde(default)]
    guard: Option<String>,
    to: String,
    #[serde(default)]
    effects: Vec<String>,
    /// Present in the wire format but unused here — `chain` is a property
    /// of states, not of individual transitions.
    #[serde(default)]
    #[allow(dead_code)]
    chain: Option<String>,
}

#[derive(Deserialize)]
struct RawSpec {
    states: HashMap<String, StateDef>,
    transitions: Vec<RawTransition>,
    guards: Vec<String>,
    effects: Vec<String>,
}

/// A validated, loaded lifecycle spec.
#[derive(Clone, Debug)]
pub struct LifecycleSpec {
    /// States keyed by name.
    pub states: HashMap<String, StateDef>,
    /// Transitions, in declared order.
    pub transitions: Vec<Transition>,
    /// The declared catalog of guard names a transition may reference.
    pub guards: Vec<String>,
    /// The declared catalog of effect names a transition may reference.
    pub effects: Vec<String>,
}

impl LifecycleSpec {
    /// Load and validate a lifecycle spec from a JSON file.
    ///
    /// # Errors
    /// Returns [`RalphError::BoardNotFound`]-shaped I/O errors or
    /// [`RalphError::InvalidLifecycleSpec`] for structural violations.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Parse and validate a lifecycle spec from a JSON string.
    ///
    /// # Errors
    /// Returns [`RalphError::InvalidLifecycleSpec`] for parse or structural
    /// failures.
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: RawSpec = serde_json::from_str(content).map_err(|e| RalphError::InvalidLifecycleSpec {
            reason: format!("JSON parse error: {e}"),
        })?;

        let transitions: Vec<Transition> = raw
            .transitions
            .into_iter()
            .map(|t| Transition {
                from: if is_wildcard(&t.from) { None } else { Some(t.from) },
                event: t.event,
                guard: t.guard,
                to: t.to,
                effects: t.effects,
            })
            .collect();

        let spec = Self {
            states: raw.states,
            transitions,
            guards: raw.guards,
            effects: raw.effects,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Run every structural invariant from .
    ///
    /// # Errors
    /// Returns [`RalphError::InvalidLifecycleSpec`] on the first violated
    /// invariant.
    pub fn validate(&self) -> Result<()> {
        self.validate_state_references()?;
        self.validate_transient_chains()?;
        self.validate_outbound_coverage()?;
        self.validate_guard_ordering()?;
        self.validate_effect_guard_closure()?;
        Ok(())
    }

    fn invalid(reason: impl Into<String>) -> RalphError {
        RalphError::InvalidLifecycleSpec { reason: reason.into() }
    }

    fn validate_state_references(&self) -> Result<()> {
        for t in &self.transitions {
            if let Some(from) = &t.from {
                if !self.states.contains_key(from) {
                    return Err(Self::invalid(format!(
                        "transition references unknown state '{from}' as 'from'"
                    )));
                }
            }
            if !self.states.contains_key(&t.to) {
                return Err(Self::invalid(format!("transition references unknown state '{}' as 'to'", t.to)));
            }
        }
        Ok(())
    }

    fn validate_transient_chains(&self) -> Result<()> {
        for (name, def) in &self.states {
            if def.kind == StateKind::Transient {
                let Some(chain) = &def.chain else {
                    return Err(Self::invalid(format!("transient state '{name}' has no chain successor")));
                };
                if !self.states.contains_key(chain) {
                    return Err(Self::invalid(format!(
                        "transient state '{name}' chains to unknown state '{chain}'"
                    )));
                }
                // The chain successor must be reachable via a transition out
                // of `name` (the declared chaining event); a transient state
                // that cannot actually reach its declared chain target is
                // ill-formed.
                let has_outbound = self.transitions.iter().any(|t| {
                    t.from.as_deref() == Some(name.as_str()) && t.to == *chain
                });
                if !has_outbound {
                    return Err(Self::invalid(format!(
                        "transient state '{name}' declares chain '{chain}' but no transition reaches it"
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_outbound_coverage(&self) -> Result<()> {
        let has_wildcard = self.transitions.iter().any(Transition::is_wildcard);
        for (name, def) in &self.states {
            if def.kind == StateKind::Terminal {
                continue;
            }
            let has_explicit = self.transitions.iter().any(|t| t.from.as_deref() == Some(name.as_str()));
            if !has_explicit && !has_wildcard {
                return Err(Self::invalid(format!("non-terminal state '{name}' has no outbound transition")));
            }
        }
        Ok(())
    }

    fn validate_guard_ordering(&self) -> Result<()> {
        let mut groups: HashMap<(Option<String>, String), Vec<bool>> = HashMap::new();
        for t in &self.transitions {
            groups
                .entry((t.from.clone(), t.event.clone()))
                .or_default()
                .push(t.guard.is_some());
        }
        for ((from, event), guarded_flags) in groups {
            let mut seen_unguarded = false;
            for guarded in guarded_flags {
                if !guarded {
                    seen_unguarded = true;
                } else if seen_unguarded {
                    let from_desc = from.as_deref().unwrap_or("*");
                    return Err(Self::invalid(format!(
                        "guard ordering violated for ({from_desc}, {event}): a guarded transition follows an unguarded one"
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_effect_guard_closure(&self) -> Result<()> {
        for t in &self.transitions {
            if let Some(guard) = &t.guard {
                if !self.guards.contains(guard) {
                    return Err(Self::invalid(format!("guard '{guard}' used but not declared in 'guards'")));
                }
            }
            for effect in &t.effects {
                if !self.effects.contains(effect) {
                    return Err(Self::invalid(format!("effect '{effect}' used but not declared in 'effects'")));
                }
            }
        }
        Ok(())
    }

    /// The state a worker starts in.
    #[must_use]
    pub fn initial_state(&self) -> Option<&str> {
        self.states
            .iter()
            .find(|(_, def)| def.kind == StateKind::Initial)
            .map(|(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_json() -> &'static str {
        r#"{
            "states": {
                "none": {"type": "initial"},
                "running": {"type": "running"},
                "done_chain": {"type": "transient", "chain": "merged"},
                "merged": {"type": "terminal"}
            },
            "transitions": [
                {"from": "none", "event": "start", "to": "running", "effects": []},
                {"from": "running", "event": "finish", "to": "done_chain", "effects": []},
                {"from": "done_chain", "event": "chain.merged", "to": "merged", "effects": []},
                {"from": "merged", "event": "user.resume", "guard": "recovery_ok", "to": "running", "effects": []},
                {"from": "*", "event": "resume.abort", "to": "merged", "effects": []}
            ],
            "guards": ["recovery_ok"],
            "effects": []
        }"#
    }

    #[test]
    fn loads_and_validates_minimal_spec() {
        let spec = LifecycleSpec::from_json(minimal_json()).unwrap();
        assert_eq!(spec.initial_state(), Some("none"));
        assert_eq!(spec.transitions.len(), 5);
    }

    #[test]
    fn rejects_transient_without_chain() {
        let json = r#"{
            "states": {"a": {"type": "transient"}},
            "transitions": [],
            "guards": [],
            "effects": []
        }"#;
        let err = LifecycleSpec::from_json(json).unwrap_err();
        assert!(matches!(err, RalphError::InvalidLifecycleSpec { .. }));
    }

    #[test]
    fn rejects_guard_ordering_violation() {
        let json = r#"{
            "states": {"a": {"type": "waiting"}, "b": {"type": "waiting"}, "c": {"type": "waiting"}},
            "transitions": [
                {"from": "a", "event": "e", "to": "b", "effects": []},
                {"from": "a", "event": "e", "guard": "g", "to": "c", "effects": []}
            ],
            "guards": ["g"],
            "effects": []
        }"#;
        let err = LifecycleSpec::from_json(json).unwrap_err();
        assert!(matches!(err, RalphError::InvalidLifecycleSpec { .. }));
    }

    #[test]
    fn rejects_non_terminal_with_no_outbound() {
        let json = r#"{
            "states": {"a": {"type": "waiting"}, "b": {"type": "terminal"}},
            "transitions": [],
            "guards": [],
            "effects": []
        }"#;
        let err = LifecycleSpec::from_json(json).unwrap_err();
        assert!(matches!(err, RalphError::InvalidLifecycleSpec { .. }));
    }

    #[test]
    fn rejects_undeclared_effect_reference() {
        let json = r#"{
            "states": {"a": {"type": "waiting"}, "b": {"type": "waiting"}},
            "transitions": [
                {"from": "a", "event": "e", "to": "b", "effects": ["mystery"]}
            ],
            "guards": [],
            "effects": []
        }"#;
        let err = LifecycleSpec::from_json(json).unwrap_err();
        assert!(matches!(err, RalphError::InvalidLifecycleSpec { .. }));
    }

    #[test]
    fn wildcard_transition_satisfies_outbound_coverage() {
        let json = r#"{
            "states": {"a": {"type": "waiting"}},
            "transitions": [{"from": "*", "event": "resume.abort", "to": "a", "effects": []}],
            "guards": [],
            "effects": []
        }"#;
        assert!(LifecycleSpec::from_json(json).is_ok());
    }
}
