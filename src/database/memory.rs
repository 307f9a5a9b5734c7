//! In-process [`WorkflowStore`]. Every operation runs inside one critical
//! section over all three tables, which gives each commit the same
//! all-or-nothing behavior as a database transaction: all checks run before
//! the first write.

use crate::models::{HistoryEntry, Inspection, InspectionSnapshot, WorkflowRecord};
use crate::state_machine::errors::{PersistenceError, PersistenceResult};
use crate::state_machine::persistence::{
    CommittedTransition, EscalationUpdate, TransitionCommit, WorkflowStore, WorkflowWrite,
};
use crate::state_machine::states::{InspectionState, Priority};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    inspections: HashMap<Uuid, Inspection>,
    workflows: HashMap<Uuid, WorkflowRecord>,
    history: Vec<HistoryEntry>,
}

impl Tables {
    fn inspection_at(&self, subject_id: Uuid, expected_version: i64) -> PersistenceResult<&Inspection> {
        let current = self
            .inspections
            .get(&subject_id)
            .ok_or(PersistenceError::NotFound { entity_id: subject_id })?;
        if current.version != expected_version {
            return Err(PersistenceError::ConcurrentModification { entity_id: subject_id });
        }
        Ok(current)
    }

    fn has_pending(&self, subject_id: Uuid) -> bool {
        self.workflows
            .values()
            .any(|w| w.subject_id == subject_id && w.is_pending())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    tables: Mutex<Tables>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every review ever opened for the subject, oldest first
    pub fn workflows_for(&self, subject_id: Uuid) -> Vec<WorkflowRecord> {
        let tables = self.tables.lock();
        let mut records: Vec<_> = tables
            .workflows
            .values()
            .filter(|w| w.subject_id == subject_id)
            .cloned()
            .collect();
        records.sort_by_key(|w| w.submitted_at);
        records
    }

    /// Overwrite a stored review; for seeding fixtures
    pub fn put_workflow(&self, record: WorkflowRecord) {
        self.tables.lock().workflows.insert(record.id, record);
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn insert_inspection(&self, inspection: &Inspection) -> PersistenceResult<()> {
        self.tables
            .lock()
            .inspections
            .insert(inspection.id, inspection.clone());
        Ok(())
    }

    async fn load_inspection(&self, subject_id: Uuid) -> PersistenceResult<Option<Inspection>> {
        Ok(self.tables.lock().inspections.get(&subject_id).cloned())
    }

    async fn update_snapshot(
        &self,
        subject_id: Uuid,
        expected_version: i64,
        snapshot: InspectionSnapshot,
    ) -> PersistenceResult<Inspection> {
        let mut tables = self.tables.lock();
        let mut updated = tables.inspection_at(subject_id, expected_version)?.clone();
        updated.snapshot = snapshot;
        updated.version += 1;
        updated.updated_at = Utc::now();
        tables.inspections.insert(subject_id, updated.clone());
        Ok(updated)
    }

    async fn load_workflow(&self, workflow_id: Uuid) -> PersistenceResult<Option<WorkflowRecord>> {
        Ok(self.tables.lock().workflows.get(&workflow_id).cloned())
    }

    async fn find_pending_workflow(&self, subject_id: Uuid) -> PersistenceResult<Option<WorkflowRecord>> {
        Ok(self
            .tables
            .lock()
            .workflows
            .values()
            .find(|w| w.subject_id == subject_id && w.is_pending())
            .cloned())
    }

    async fn latest_workflow(&self, subject_id: Uuid) -> PersistenceResult<Option<WorkflowRecord>> {
        Ok(self
            .tables
            .lock()
            .workflows
            .values()
            .filter(|w| w.subject_id == subject_id)
            .max_by_key(|w| w.submitted_at)
            .cloned())
    }

    async fn commit_transition(&self, commit: TransitionCommit) -> PersistenceResult<CommittedTransition> {
        let mut tables = self.tables.lock();
        let subject_id = commit.inspection.id;
        tables.inspection_at(subject_id, commit.expected_version)?;

        let workflow = match commit.workflow {
            Some(WorkflowWrite::Open(record)) => {
                if tables.has_pending(subject_id) {
                    return Err(PersistenceError::PendingReviewExists { subject_id });
                }
                Some(record)
            }
            Some(WorkflowWrite::Resolve(resolution)) => {
                let current = tables
                    .workflows
                    .get(&resolution.workflow_id)
                    .ok_or(PersistenceError::NotFound {
                        entity_id: resolution.workflow_id,
                    })?;
                if !current.is_pending() {
                    return Err(PersistenceError::ConcurrentModification { entity_id: subject_id });
                }
                if resolution.require_not_under_review && current.review_started_at.is_some() {
                    return Err(PersistenceError::ReviewInProgress {
                        workflow_id: resolution.workflow_id,
                    });
                }
                let mut resolved = current.clone();
                resolution.apply(&mut resolved);
                Some(resolved)
            }
            None => None,
        };

        // Checks passed; apply all writes.
        tables.inspections.insert(subject_id, commit.inspection.clone());
        if let Some(record) = &workflow {
            tables.workflows.insert(record.id, record.clone());
        }
        tables.history.push(commit.history);

        Ok(CommittedTransition {
            inspection: commit.inspection,
            workflow,
        })
    }

    async fn find_overdue(
        &self,
        priority: Priority,
        submitted_before: DateTime<Utc>,
    ) -> PersistenceResult<Vec<WorkflowRecord>> {
        let tables = self.tables.lock();
        let mut overdue: Vec<_> = tables
            .workflows
            .values()
            .filter(|w| {
                w.is_pending()
                    && !w.is_escalated()
                    && w.archived_at.is_none()
                    && w.priority == priority
                    && w.submitted_at <= submitted_before
            })
            .cloned()
            .collect();
        overdue.sort_by_key(|w| w.submitted_at);
        Ok(overdue)
    }

    async fn escalate_if_pending(
        &self,
        workflow_id: Uuid,
        update: EscalationUpdate,
        history: HistoryEntry,
    ) -> PersistenceResult<Option<WorkflowRecord>> {
        let mut tables = self.tables.lock();
        let Some(record) = tables.workflows.get_mut(&workflow_id) else {
            return Err(PersistenceError::NotFound { entity_id: workflow_id });
        };
        if !record.is_pending() || record.is_escalated() {
            return Ok(None);
        }
        update.apply(record);
        let escalated = record.clone();
        tables.history.push(history);
        Ok(Some(escalated))
    }

    async fn record_escalation_warning(
        &self,
        workflow_id: Uuid,
        offset_minutes: u32,
        history: HistoryEntry,
    ) -> PersistenceResult<bool> {
        let mut tables = self.tables.lock();
        let Some(record) = tables.workflows.get_mut(&workflow_id) else {
            return Err(PersistenceError::NotFound { entity_id: workflow_id });
        };
        if !record.is_pending() || record.is_escalated() || record.warning_sent(offset_minutes) {
            return Ok(false);
        }
        record.warnings_sent.push(offset_minutes);
        tables.history.push(history);
        Ok(true)
    }

    async fn record_timeout_warning(
        &self,
        subject_id: Uuid,
        state: InspectionState,
        offset_minutes: u32,
        history: HistoryEntry,
    ) -> PersistenceResult<bool> {
        let mut tables = self.tables.lock();
        let Some(inspection) = tables.inspections.get_mut(&subject_id) else {
            return Err(PersistenceError::NotFound { entity_id: subject_id });
        };
        if inspection.state != state
            || inspection.is_archived()
            || inspection.timeout_warning_sent(offset_minutes)
        {
            return Ok(false);
        }
        inspection.timeout_warnings_sent.push(offset_minutes);
        tables.history.push(history);
        Ok(true)
    }

    async fn mark_review_started(
        &self,
        workflow_id: Uuid,
        reviewer_id: &str,
        at: DateTime<Utc>,
        history: HistoryEntry,
    ) -> PersistenceResult<WorkflowRecord> {
        let mut tables = self.tables.lock();
        let Some(record) = tables.workflows.get_mut(&workflow_id) else {
            return Err(PersistenceError::NotFound { entity_id: workflow_id });
        };
        if !record.is_pending() {
            return Err(PersistenceError::ConcurrentModification { entity_id: workflow_id });
        }
        if record.review_started_at.is_some() {
            return Ok(record.clone());
        }
        record.review_started_at = Some(at);
        record.reviewer_id = Some(reviewer_id.to_string());
        record.updated_at = at;
        let started = record.clone();
        tables.history.push(history);
        Ok(started)
    }

    async fn find_in_state(
        &self,
        state: InspectionState,
        entered_before: DateTime<Utc>,
    ) -> PersistenceResult<Vec<Inspection>> {
        let tables = self.tables.lock();
        let mut found: Vec<_> = tables
            .inspections
            .values()
            .filter(|i| i.state == state && !i.is_archived() && i.state_entered_at <= entered_before)
            .cloned()
            .collect();
        found.sort_by_key(|i| i.state_entered_at);
        Ok(found)
    }

    async fn archive_subject(
        &self,
        subject_id: Uuid,
        expected_version: i64,
        at: DateTime<Utc>,
        history: HistoryEntry,
    ) -> PersistenceResult<Inspection> {
        let mut tables = self.tables.lock();
        let mut archived = tables.inspection_at(subject_id, expected_version)?.clone();
        archived.archived_at = Some(at);
        archived.version += 1;
        archived.updated_at = at;
        tables.inspections.insert(subject_id, archived.clone());
        for record in tables
            .workflows
            .values_mut()
            .filter(|w| w.subject_id == subject_id)
        {
            record.archived_at = Some(at);
        }
        tables.history.push(history);
        Ok(archived)
    }

    async fn history_for_subject(&self, subject_id: Uuid) -> PersistenceResult<Vec<HistoryEntry>> {
        Ok(self
            .tables
            .lock()
            .history
            .iter()
            .filter(|h| h.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn history_for_workflow(&self, workflow_id: Uuid) -> PersistenceResult<Vec<HistoryEntry>> {
        Ok(self
            .tables
            .lock()
            .history
            .iter()
            .filter(|h| h.workflow_id == Some(workflow_id))
            .cloned()
            .collect())
    }
}
