// State machine for the inspection lifecycle
//
// The transition graph itself is data (see `crate::rules`); this module holds
// the closed vocabularies it is written in, the engine that walks it, and the
// persistence interface the engine commits through.

pub mod actions;
pub mod context;
pub mod engine;
pub mod errors;
pub mod events;
pub mod guards;
pub mod persistence;
pub mod states;

// Re-export main types for convenient access
pub use actions::{ActionKind, ActionPhase};
pub use context::TransitionPayload;
pub use engine::{TransitionEngine, TransitionOutcome};
pub use errors::{GuardError, PersistenceError, TransitionError, TransitionResult};
pub use events::WorkflowEvent;
pub use guards::{ConditionContext, ConditionKind, ConditionRegistry};
pub use persistence::{
    CommittedTransition, EscalationUpdate, ReviewResolution, TransitionCommit, WorkflowStore,
    WorkflowWrite,
};
pub use states::{InspectionState, Priority, ReviewStatus};
