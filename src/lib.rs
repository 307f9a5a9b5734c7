#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Inspection Workflow Core
//!
//! Workflow engine for vehicle inspections moving from technician work
//! through manager review to customer delivery.
//!
//! ## Overview
//!
//! Each tenant (shop) runs the same lifecycle, but the transition graph, who
//! may take each edge, what must hold first and what happens afterwards are
//! data: a default rule set merged with an optional per-tenant override.
//! Every change commits subject, review record and audit entry together, and
//! background sweeps escalate overdue reviews and fire timeout auto-actions
//! without ever double-firing.
//!
//! ## Module Organization
//!
//! - [`rules`] - Rule records, defaults, tenant overrides and the config resolver
//! - [`state_machine`] - States, conditions, actions and the transition engine
//! - [`validation`] - Findings checks run before a transition commits
//! - [`models`] - Inspection, review record, principal and history entry
//! - [`database`] - In-memory and Postgres stores, schema migrations
//! - [`orchestration`] - Escalation and timeout sweeps, the [`WorkflowCore`] facade
//! - [`events`] - Lifecycle event broadcast and notification dispatch
//! - [`audit`] - History queries and history metadata
//! - [`config`] - Engine configuration loading
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use inspection_workflow::models::{Inspection, Principal, Role};
//! use inspection_workflow::state_machine::{InspectionState, TransitionPayload};
//! use inspection_workflow::{EngineConfig, WorkflowCore};
//!
//! # async fn example() -> inspection_workflow::Result<()> {
//! let core = WorkflowCore::in_memory(EngineConfig::default());
//! let inspection = core
//!     .create_inspection(Inspection::new("shop-1", Some("tech-7".to_string())))
//!     .await?;
//!
//! let mechanic = Principal::new("tech-7", Role::Mechanic, "shop-1");
//! core.attempt_transition(
//!     inspection.id,
//!     InspectionState::InProgress,
//!     &mechanic,
//!     TransitionPayload::new(),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod rules;
pub mod state_machine;
pub mod validation;

pub use config::{ConfigLoader, EngineConfig};
pub use error::{Result, WorkflowError};
pub use orchestration::{EscalationSweepReport, TimeoutSweepReport, WorkflowCore};
pub use rules::{ConfigResolver, EffectiveConfig, TenantOverride};
pub use state_machine::{InspectionState, TransitionEngine, TransitionError, TransitionPayload};
