//! Event dispatch and startup crash recovery.

use serde_json::Value;

use crate::error::Result;
use crate::events::{self, EventSink};

use super::registry::{EffectContext, EffectRegistry, GuardRegistry};
use super::spec::{LifecycleSpec, StateKind};
use super::state::LifecycleState;

/// Outcome of one `emit` call.
#[derive(Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The event moved the worker from `from` to `to` (the final resting
    /// state, after following any transient chain).
    Transitioned {
        /// The state before this dispatch.
        from: String,
        /// The final resting state after any transient chaining.
        to: String,
    },
    /// No transition matched `(current, event)`; the state is unchanged.
    NoMatch,
    /// The worker is in a terminal state and `event` isn't in that state's
    /// recovery allowlist.
    RejectedTerminal,
}

/// Bound together, a spec and its registries — everything `emit` needs.
pub struct LifecycleEngine<'a> {
    spec: &'a LifecycleSpec,
    guards: &'a GuardRegistry,
    effects: &'a EffectRegistry,
}

impl<'a> LifecycleEngine<'a> {
    /// Build an engine, checking that every guard/effect name the spec
    /// declares is actually registered.
    ///
    /// # Errors
    /// Returns [`crate::error::RalphError::InvalidLifecycleSpec`] if any
    /// declared name has no registered implementation.
    pub fn bind(spec: &'a LifecycleSpec, guards: &'a GuardRegistry, effects: &'a EffectRegistry) -> Result<Self> {
        for g in &spec.guards {
            if !guards.contains(g) {
                return Err(crate::error::RalphError::InvalidLifecycleSpec {
                    reason: format!("guard '{g}' declared but not registered"),
                });
            }
        }
        for e in &spec.effects {
            if !effects.contains(e) {
                return Err(crate::error::RalphError::InvalidLifecycleSpec {
                    reason: format!("effect '{e}' declared but not registered"),
                });
            }
        }
        Ok(Self { spec, guards, effects })
    }

    /// Dispatch `event` against `state`, following the engine's 7-step
    /// algorithm. Mutates `state` in place and returns the outcome; the
    /// caller is responsible for persisting `state` and the event-bus
    /// record.
    ///
    /// # Errors
    /// Propagates effect/guard evaluation errors (I/O, lock timeouts).
    pub fn emit(
        &self,
        state: &mut LifecycleState,
        ctx: &EffectContext<'_>,
        event: &str,
        payload: &Value,
        sink: &dyn EventSink,
    ) -> Result<DispatchOutcome> {
        let from = state.state.clone();
        let outcome = self.dispatch_one(state, ctx, event, payload)?;

        match &outcome {
            DispatchOutcome::Transitioned { to, .. } => {
                let mut current = to.clone();
                while self.state_kind(&current) == Some(StateKind::Transient) {
                    let chain_event = self.chain_event_for(&current);
                    let Some(chain_event) = chain_event else {
                        break;
                    };
                    match self.dispatch_one(state, ctx, &chain_event, payload)? {
                        DispatchOutcome::Transitioned { to: next, .. } => current = next,
                        _ => break,
                    }
                }
                events::emit(sink, "lifecycle.transition", serde_json::json!({
                    "worker_dir": ctx.worker_dir,
                    "task_id": ctx.task_id.as_str(),
                    "event": event,
                    "from": from,
                    "to": current,
                }))?;
                Ok(DispatchOutcome::Transitioned { from, to: current })
            }
            DispatchOutcome::NoMatch => {
                tracing::debug!(worker_dir = %ctx.worker_dir.display(), %event, "no match");
                Ok(outcome)
            }
            DispatchOutcome::RejectedTerminal => {
                tracing::debug!(worker_dir = %ctx.worker_dir.display(), %event, state = %from, "rejected: terminal");
                Ok(outcome)
            }
        }
    }

    fn state_kind(&self, name: &str) -> Option<StateKind> {
        self.spec.states.get(name).map(|d| d.kind)
    }

    /// The declared chaining event out of a transient state: the event of
    /// the transition whose `from == name` and `to == states[name].chain`.
    fn chain_event_for(&self, name: &str) -> Option<String> {
        let chain_target = self.spec.states.get(name)?.chain.as_ref()?;
        self.spec
            .transitions
            .iter()
            .find(|t| t.from.as_deref() == Some(name) && &t.to == chain_target)
            .map(|t| t.event.clone())
    }

    fn dispatch_one(
        &self,
        state: &mut LifecycleState,
        ctx: &EffectContext<'_>,
        event: &str,
        payload: &Value,
    ) -> Result<DispatchOutcome> {
        let current = state.state.clone();
        let is_terminal = self.state_kind(&current) == Some(StateKind::Terminal);

        let explicit: Vec<_> = self
            .spec
            .transitions
            .iter()
            .filter(|t| t.from.as_deref() == Some(current.as_str()) && t.event == event)
            .collect();
        let wildcard: Vec<_> = if is_terminal {
            Vec::new()
        } else {
            self.spec.transitions.iter().filter(|t| t.is_wildcard() && t.event == event).collect()
        };

        if is_terminal && explicit.is_empty() {
            return Ok(DispatchOutcome::RejectedTerminal);
        }

        for t in explicit.into_iter().chain(wildcard) {
            let matches = match &t.guard {
                None => true,
                Some(g) => self.guards.eval(g, state, ctx)?,
            };
            if !matches {
                continue;
            }
            for effect in &t.effects {
                self.effects.run(effect, state, ctx, payload)?;
            }
            state.state = t.to.clone();
            return Ok(DispatchOutcome::Transitioned { from: current, to: t.to.clone() });
        }

        Ok(DispatchOutcome::NoMatch)
    }
}

/// The synthetic event fired at startup for a worker found in a `running`
/// state. Callers supply the mapping from
/// "which running state" to "which synthetic event"; this is a thin lookup
/// over the two named cases the spec calls out, falling back to a generic
/// `startup.reset` for any other running state.
#[must_use]
pub fn startup_recovery_event(state_name: &str) -> &'static str {
    match state_name {
        "resolving" => "resolve.startup_reset",
        _ => "startup.reset",
    }
}

/// `true` if `state_name`'s type is `running`, i.e. it needs crash recovery
/// at orchestrator startup.
#[must_use]
pub fn needs_startup_recovery(spec: &LifecycleSpec, state_name: &str) -> bool {
    spec.states.get(state_name).map(|d| d.kind) == Some(StateKind::Running)
}
