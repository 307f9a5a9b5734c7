//! # Transition Payload
//!
//! Caller-supplied data for one transition attempt. Required conditions are
//! evaluated against it (e.g. a rejection needs a reason), and the audit
//! fields are merged into the history entry's metadata.

use crate::rules::types::AutoAction;
use crate::state_machine::states::Priority;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionPayload {
    /// Free-text comment recorded on the history entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub manager_comments: Option<String>,

    /// Explicit reviewer for a new submission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assign_to: Option<String>,

    /// Priority for a new submission; falls back to the tenant default
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,

    #[serde(default)]
    pub delivery_confirmed: bool,

    /// Set by the timeout sweep when the transition is an auto-action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_action: Option<AutoAction>,

    /// Distributed tracing identifier carried into the audit trail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl TransitionPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = Some(comments.into());
        self
    }

    pub fn with_rejection_reason(mut self, reason: impl Into<String>) -> Self {
        self.rejection_reason = Some(reason.into());
        self
    }

    pub fn with_manager_comments(mut self, comments: impl Into<String>) -> Self {
        self.manager_comments = Some(comments.into());
        self
    }

    pub fn with_assignee(mut self, principal_id: impl Into<String>) -> Self {
        self.assign_to = Some(principal_id.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delivery_confirmed(mut self) -> Self {
        self.delivery_confirmed = true;
        self
    }

    pub fn with_auto_action(mut self, action: AutoAction) -> Self {
        self.auto_action = Some(action);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        non_blank(&self.rejection_reason)
    }

    pub fn manager_comments(&self) -> Option<&str> {
        non_blank(&self.manager_comments)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
