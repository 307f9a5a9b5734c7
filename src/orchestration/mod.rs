//! # Orchestration
//!
//! Background sweeps and the public facade.
//!
//! - [`escalation`] - escalates overdue pending reviews and sends lead-time warnings
//! - [`timeouts`] - fires state timeouts (auto-approve, auto-send, auto-complete)
//! - [`core`] - [`WorkflowCore`], wiring every component from one configuration

pub mod core;
pub mod escalation;
pub mod timeouts;
pub mod types;

pub use self::core::{SweepLoopHandle, WorkflowCore};
pub use escalation::EscalationScheduler;
pub use timeouts::TimeoutScheduler;
pub use types::{EscalationSweepReport, SweepFailure, TimeoutSweepReport};
