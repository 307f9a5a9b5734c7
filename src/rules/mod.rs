//! # Rule Store and Config Resolution
//!
//! The default rule set plus per-tenant override fragments, merged into an
//! immutable [`EffectiveConfig`] per tenant.
//!
//! ## Components
//!
//! - [`types`] - Plain-data rule records (transitions, timeouts, escalations, notifications)
//! - [`defaults`] - The built-in rule set every tenant starts from
//! - [`overrides`] - Versioned tenant override fragments
//! - [`effective`] - The merged per-tenant lookup
//! - [`store`] - Storage trait for defaults and overrides
//! - [`resolver`] - Pure merge function plus the caching resolver
//! - [`validate`] - Structural checks run before an override is saved

pub mod defaults;
pub mod effective;
pub mod overrides;
pub mod resolver;
pub mod store;
pub mod types;
pub mod validate;

pub use effective::{EffectiveConfig, TransitionTable};
pub use overrides::TenantOverride;
pub use resolver::ConfigResolver;
pub use store::{InMemoryRuleStore, RuleStore, RuleStoreError};
pub use types::{
    AutoAction, AutoTrigger, BusinessRules, BusinessRulesOverride, Channel, EscalationRule,
    NotificationEvent, NotificationRule, Recipient, RuleSet, TimeoutRule, TransitionRule,
};
pub use validate::ConfigValidation;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Configuration for tenant {tenant_id} is invalid: {}", .errors.join("; "))]
    ConfigInvalid {
        tenant_id: String,
        errors: Vec<String>,
    },

    #[error("Rule store error: {0}")]
    Store(#[from] RuleStoreError),
}

pub type RuleResult<T> = Result<T, RuleError>;
