//! # Workflow Persistence
//!
//! Storage interface for inspections, review records and history. Every
//! mutating method is one transactional unit: either all of its writes land or
//! none do. Implementations live in [`crate::database`].

use super::errors::PersistenceResult;
use super::states::{InspectionState, Priority, ReviewStatus};
use crate::models::{Assignee, HistoryEntry, Inspection, InspectionSnapshot, WorkflowRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Everything written by one committed transition
#[derive(Debug, Clone)]
pub struct TransitionCommit {
    /// Version the engine read; the commit fails if it moved
    pub expected_version: i64,
    /// Subject as it should be stored (version already bumped)
    pub inspection: Inspection,
    pub workflow: Option<WorkflowWrite>,
    pub history: HistoryEntry,
}

#[derive(Debug, Clone)]
pub enum WorkflowWrite {
    /// Open a new pending review; fails if one is already pending
    Open(WorkflowRecord),
    /// Close the pending review with a decision
    Resolve(ReviewResolution),
}

#[derive(Debug, Clone)]
pub struct ReviewResolution {
    pub workflow_id: Uuid,
    pub status: ReviewStatus,
    pub actor_id: Option<String>,
    pub at: DateTime<Utc>,
    pub rejection_reason: Option<String>,
    pub manager_comments: Option<String>,
    /// Refuse to resolve if a manager has started the review
    pub require_not_under_review: bool,
}

impl ReviewResolution {
    /// Apply the decision to a pending record
    pub fn apply(&self, record: &mut WorkflowRecord) {
        record.status = self.status;
        record.updated_at = self.at;
        match self.status {
            ReviewStatus::Approved => {
                record.approved_by = self.actor_id.clone();
                record.approved_at = Some(self.at);
            }
            ReviewStatus::Rejected => {
                record.rejected_at = Some(self.at);
                record.rejection_reason = self.rejection_reason.clone();
            }
            ReviewStatus::ChangesRequested | ReviewStatus::Pending => {}
        }
        if self.manager_comments.is_some() {
            record.manager_comments = self.manager_comments.clone();
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommittedTransition {
    pub inspection: Inspection,
    pub workflow: Option<WorkflowRecord>,
}

/// Set-once escalation applied only while the review is pending and unescalated
#[derive(Debug, Clone)]
pub struct EscalationUpdate {
    pub escalate_to: Assignee,
    pub priority: Priority,
    pub at: DateTime<Utc>,
}

impl EscalationUpdate {
    pub fn apply(&self, record: &mut WorkflowRecord) {
        record.assigned_to = Some(self.escalate_to.clone());
        record.escalated_to = Some(self.escalate_to.clone());
        record.priority = self.priority;
        record.escalated_at = Some(self.at);
        record.updated_at = self.at;
    }
}

/// Persistence interface consumed by the engine and scheduler
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn insert_inspection(&self, inspection: &Inspection) -> PersistenceResult<()>;

    async fn load_inspection(&self, subject_id: Uuid) -> PersistenceResult<Option<Inspection>>;

    /// Replace the item snapshot if `expected_version` is current
    async fn update_snapshot(
        &self,
        subject_id: Uuid,
        expected_version: i64,
        snapshot: InspectionSnapshot,
    ) -> PersistenceResult<Inspection>;

    async fn load_workflow(&self, workflow_id: Uuid) -> PersistenceResult<Option<WorkflowRecord>>;

    /// Pending review for the subject, if any
    async fn find_pending_workflow(&self, subject_id: Uuid) -> PersistenceResult<Option<WorkflowRecord>>;

    /// Most recently submitted review for the subject
    async fn latest_workflow(&self, subject_id: Uuid) -> PersistenceResult<Option<WorkflowRecord>>;

    /// Atomically write subject, review and history.
    ///
    /// Fails with `ConcurrentModification` when the stored version differs
    /// from `expected_version`, and with `PendingReviewExists` when opening a
    /// review while another is pending.
    async fn commit_transition(&self, commit: TransitionCommit) -> PersistenceResult<CommittedTransition>;

    /// Pending, unescalated reviews of `priority` submitted at or before `submitted_before`
    async fn find_overdue(
        &self,
        priority: Priority,
        submitted_before: DateTime<Utc>,
    ) -> PersistenceResult<Vec<WorkflowRecord>>;

    /// Escalate only if still pending and unescalated; `None` if another
    /// sweep got there first
    async fn escalate_if_pending(
        &self,
        workflow_id: Uuid,
        update: EscalationUpdate,
        history: HistoryEntry,
    ) -> PersistenceResult<Option<WorkflowRecord>>;

    /// Record a warning offset once; `false` if it was already recorded
    async fn record_escalation_warning(
        &self,
        workflow_id: Uuid,
        offset_minutes: u32,
        history: HistoryEntry,
    ) -> PersistenceResult<bool>;

    /// Record a timeout warning offset once for the subject's current stay in
    /// `state`; `false` if already recorded or the subject has moved on
    async fn record_timeout_warning(
        &self,
        subject_id: Uuid,
        state: InspectionState,
        offset_minutes: u32,
        history: HistoryEntry,
    ) -> PersistenceResult<bool>;

    /// Stamp the review as opened by `reviewer_id` (first opener wins)
    async fn mark_review_started(
        &self,
        workflow_id: Uuid,
        reviewer_id: &str,
        at: DateTime<Utc>,
        history: HistoryEntry,
    ) -> PersistenceResult<WorkflowRecord>;

    /// Unarchived subjects that entered `state` at or before `entered_before`
    async fn find_in_state(
        &self,
        state: InspectionState,
        entered_before: DateTime<Utc>,
    ) -> PersistenceResult<Vec<Inspection>>;

    /// Stamp `archived_at` on the subject and all its reviews
    async fn archive_subject(
        &self,
        subject_id: Uuid,
        expected_version: i64,
        at: DateTime<Utc>,
        history: HistoryEntry,
    ) -> PersistenceResult<Inspection>;

    /// Chronological history of the subject
    async fn history_for_subject(&self, subject_id: Uuid) -> PersistenceResult<Vec<HistoryEntry>>;

    /// Chronological history of one review
    async fn history_for_workflow(&self, workflow_id: Uuid) -> PersistenceResult<Vec<HistoryEntry>>;
}
