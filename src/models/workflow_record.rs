//! # Workflow Record Model
//!
//! Manager-review sub-entity: one record per submission of an inspection for
//! review. At most one record per subject may be `pending` at a time; the
//! escalation stamp is set once and never cleared.

use crate::models::principal::Role;
use crate::state_machine::states::{Priority, ReviewStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    pub id: Uuid,
    pub subject_id: Uuid,
    pub tenant_id: String,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    pub status: ReviewStatus,
    pub assigned_to: Option<Assignee>,
    pub priority: Priority,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub manager_comments: Option<String>,
    pub escalated_at: Option<DateTime<Utc>>,
    pub escalated_to: Option<Assignee>,
    pub review_started_at: Option<DateTime<Utc>>,
    pub reviewer_id: Option<String>,
    /// Escalation warning offsets (minutes) already notified
    #[serde(default)]
    pub warnings_sent: Vec<u32>,
    pub archived_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRecord {
    /// Open a new pending review for `subject_id`
    pub fn pending(
        subject_id: Uuid,
        tenant_id: impl Into<String>,
        submitted_by: impl Into<String>,
        priority: Priority,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            tenant_id: tenant_id.into(),
            submitted_by: submitted_by.into(),
            submitted_at,
            status: ReviewStatus::Pending,
            assigned_to: None,
            priority,
            approved_by: None,
            approved_at: None,
            rejected_at: None,
            rejection_reason: None,
            manager_comments: None,
            escalated_at: None,
            escalated_to: None,
            review_started_at: None,
            reviewer_id: None,
            warnings_sent: Vec::new(),
            archived_at: None,
            updated_at: submitted_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReviewStatus::Pending
    }

    pub fn is_escalated(&self) -> bool {
        self.escalated_at.is_some()
    }

    /// A manager has opened the review and not yet decided
    pub fn is_under_review(&self) -> bool {
        self.is_pending() && self.review_started_at.is_some()
    }

    /// Pending, never escalated, and submitted at least `threshold` ago
    pub fn is_overdue(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        self.is_pending() && !self.is_escalated() && self.submitted_at + threshold <= now
    }

    pub fn warning_sent(&self, offset_minutes: u32) -> bool {
        self.warnings_sent.contains(&offset_minutes)
    }
}

/// Who a review is assigned or escalated to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignee {
    /// A specific user
    Principal(String),
    /// Anyone holding the role in the tenant
    Role(Role),
}

impl fmt::Display for Assignee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Principal(id) => write!(f, "principal:{id}"),
            Self::Role(role) => write!(f, "role:{role}"),
        }
    }
}

impl std::str::FromStr for Assignee {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("principal", id)) if !id.is_empty() => Ok(Self::Principal(id.to_string())),
            Some(("role", role)) => Ok(Self::Role(role.parse()?)),
            _ => Err(format!("Invalid assignee: {s}")),
        }
    }
}
