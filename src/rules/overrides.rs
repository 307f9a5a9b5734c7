//! Tenant override fragments. Each save produces a new version; earlier
//! versions are kept for audit and never modified.

use super::types::{
    BusinessRulesOverride, EscalationRule, NotificationEvent, TimeoutRule, TransitionRule,
};
use crate::validation::ValidationRule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantOverride {
    pub tenant_id: String,
    /// Assigned by the rule store on save, starting at 1
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub business_rules: BusinessRulesOverride,
    /// Added as new edges or unioned into an existing edge
    #[serde(default)]
    pub extra_transitions: Vec<TransitionRule>,
    #[serde(default)]
    pub disabled_notifications: Vec<NotificationEvent>,
    /// Appended; a rule reusing a default id replaces that default
    #[serde(default)]
    pub custom_validation_rules: Vec<ValidationRule>,
    /// Replace the default rule for the same state
    #[serde(default)]
    pub timeout_rules: Vec<TimeoutRule>,
    /// Replace the default rule for the same priority
    #[serde(default)]
    pub escalation_rules: Vec<EscalationRule>,
    pub updated_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TenantOverride {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            version: 0,
            business_rules: BusinessRulesOverride::default(),
            extra_transitions: Vec::new(),
            disabled_notifications: Vec::new(),
            custom_validation_rules: Vec::new(),
            timeout_rules: Vec::new(),
            escalation_rules: Vec::new(),
            updated_by: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_business_rules(mut self, business_rules: BusinessRulesOverride) -> Self {
        self.business_rules = business_rules;
        self
    }

    pub fn with_transition(mut self, rule: TransitionRule) -> Self {
        self.extra_transitions.push(rule);
        self
    }

    pub fn with_disabled_notification(mut self, event: NotificationEvent) -> Self {
        self.disabled_notifications.push(event);
        self
    }

    pub fn with_validation_rule(mut self, rule: ValidationRule) -> Self {
        self.custom_validation_rules.push(rule);
        self
    }

    pub fn with_timeout_rule(mut self, rule: TimeoutRule) -> Self {
        self.timeout_rules.push(rule);
        self
    }

    pub fn with_escalation_rule(mut self, rule: EscalationRule) -> Self {
        self.escalation_rules.push(rule);
        self
    }

    pub fn updated_by(mut self, principal_id: impl Into<String>) -> Self {
        self.updated_by = Some(principal_id.into());
        self
    }
}
