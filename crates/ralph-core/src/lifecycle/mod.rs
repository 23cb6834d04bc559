//! Lifecycle Engine: loads a declarative worker state machine,
//! validates its structural invariants, and dispatches events against it.

pub mod engine;
pub mod registry;
pub mod spec;
pub mod state;

pub use engine::{needs_startup_recovery, startup_recovery_event, DispatchOutcome, LifecycleEngine};
pub use registry::{EffectContext, EffectFn, EffectRegistry, GuardFn, GuardRegistry};
pub use spec::{LifecycleSpec, StateDef, StateKind, Transition};
pub use state::{LifecycleState, DEFAULT_MAX_MERGE_ATTEMPTS, DEFAULT_MAX_RECOVERY_ATTEMPTS};
