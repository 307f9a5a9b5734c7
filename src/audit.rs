//! # Audit Trail
//!
//! Read access to the append-only history plus the metadata builders the
//! engine and scheduler use when writing entries. Entries are only ever
//! written inside the commit of the change they describe.

use crate::models::{HistoryEntry, Inspection, Principal, WorkflowRecord};
use crate::rules::types::{EscalationRule, TimeoutRule};
use crate::state_machine::context::TransitionPayload;
use crate::state_machine::errors::TransitionResult;
use crate::state_machine::events::WorkflowEvent;
use crate::state_machine::guards::ConditionKind;
use crate::state_machine::persistence::WorkflowStore;
use crate::state_machine::states::Priority;
use crate::validation::Violation;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn WorkflowStore>,
}

impl std::fmt::Debug for AuditTrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrail").finish_non_exhaustive()
    }
}

impl AuditTrail {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// Chronological history of an inspection
    pub async fn history(&self, subject_id: Uuid) -> TransitionResult<Vec<HistoryEntry>> {
        Ok(self.store.history_for_subject(subject_id).await?)
    }

    /// Chronological history of one review
    pub async fn workflow_history(&self, workflow_id: Uuid) -> TransitionResult<Vec<HistoryEntry>> {
        Ok(self.store.history_for_workflow(workflow_id).await?)
    }

    pub async fn entries_for(
        &self,
        subject_id: Uuid,
        action: WorkflowEvent,
    ) -> TransitionResult<Vec<HistoryEntry>> {
        let mut entries = self.history(subject_id).await?;
        entries.retain(|entry| entry.action == action);
        Ok(entries)
    }
}

/// Metadata recorded with a transition
pub fn transition_metadata(
    principal: &Principal,
    priority: Priority,
    warnings: &[Violation],
    advisories: &[ConditionKind],
    payload: &TransitionPayload,
) -> Value {
    let mut metadata = json!({
        "role": principal.role,
        "priority": priority,
        "warnings": warnings.iter().map(|w| w.rule_id.as_str()).collect::<Vec<_>>(),
        "advisories": advisories,
    });
    if let Some(action) = payload.auto_action {
        metadata["auto_action"] = json!(action);
    }
    if let Some(correlation_id) = payload.correlation_id {
        metadata["correlation_id"] = json!(correlation_id);
    }
    if !payload.metadata.is_null() {
        metadata["context"] = payload.metadata.clone();
    }
    metadata
}

/// Metadata recorded with an escalation
pub fn escalation_metadata(record: &WorkflowRecord, rule: &EscalationRule) -> Value {
    json!({
        "from_priority": record.priority,
        "to_priority": Priority::Urgent,
        "previous_assignee": record.assigned_to.as_ref().map(|a| a.to_string()),
        "escalated_to": rule.target().to_string(),
        "threshold_minutes": rule.threshold_minutes,
    })
}

/// Metadata recorded with an escalation warning
pub fn warning_metadata(record: &WorkflowRecord, rule: &EscalationRule, offset_minutes: u32) -> Value {
    json!({
        "priority": record.priority,
        "offset_minutes": offset_minutes,
        "threshold_minutes": rule.threshold_minutes,
    })
}

/// Metadata recorded with a warning ahead of a timeout auto-action
pub fn timeout_warning_metadata(inspection: &Inspection, rule: &TimeoutRule, offset_minutes: u32) -> Value {
    json!({
        "state": inspection.state,
        "auto_action": rule.auto_action,
        "offset_minutes": offset_minutes,
        "threshold_minutes": rule.threshold_minutes,
    })
}
