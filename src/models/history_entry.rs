//! # History Entry Model
//!
//! Append-only audit trail of every transition and background action. Entries
//! are written inside the same commit as the change they describe and are
//! never updated or deleted afterwards.
//!
//! ## Metadata Structure
//!
//! ```json
//! {
//!   "role": "shop_manager",
//!   "priority": "normal",
//!   "warnings": ["all_items_inspected"],
//!   "auto_action": null
//! }
//! ```

use crate::state_machine::events::WorkflowEvent;
use crate::state_machine::states::InspectionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub subject_id: Uuid,
    /// Review the action applied to, if any
    pub workflow_id: Option<Uuid>,
    /// `None` for system actions
    pub actor_id: Option<String>,
    pub action: WorkflowEvent,
    pub from_state: Option<InspectionState>,
    pub to_state: Option<InspectionState>,
    pub comments: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn new(
        subject_id: Uuid,
        workflow_id: Option<Uuid>,
        actor_id: Option<String>,
        action: WorkflowEvent,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            workflow_id,
            actor_id,
            action,
            from_state: None,
            to_state: None,
            comments: None,
            metadata: Value::Object(Default::default()),
            created_at,
        }
    }

    pub fn with_states(mut self, from: InspectionState, to: InspectionState) -> Self {
        self.from_state = Some(from);
        self.to_state = Some(to);
        self
    }

    pub fn with_comments(mut self, comments: Option<String>) -> Self {
        self.comments = comments;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_system_action(&self) -> bool {
        self.actor_id.is_none()
    }
}
