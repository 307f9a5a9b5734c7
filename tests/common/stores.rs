//! Store wrappers used to force interleavings the engine must tolerate.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inspection_workflow::database::InMemoryWorkflowStore;
use inspection_workflow::models::{HistoryEntry, Inspection, InspectionSnapshot, WorkflowRecord};
use inspection_workflow::state_machine::persistence::{CommittedTransition, EscalationUpdate, TransitionCommit};
use inspection_workflow::state_machine::{InspectionState, PersistenceError, Priority, WorkflowStore};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Barrier;
use uuid::Uuid;

type Result<T> = std::result::Result<T, PersistenceError>;

/// Holds every commit at a barrier while armed, so that `parties` attempts
/// which have all read the same subject version reach the store together.
pub struct BarrierStore {
    inner: Arc<InMemoryWorkflowStore>,
    barrier: Barrier,
    armed: AtomicBool,
}

impl BarrierStore {
    pub fn new(inner: Arc<InMemoryWorkflowStore>, parties: usize) -> Self {
        Self {
            inner,
            barrier: Barrier::new(parties),
            armed: AtomicBool::new(false),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl WorkflowStore for BarrierStore {
    async fn insert_inspection(&self, inspection: &Inspection) -> Result<()> {
        self.inner.insert_inspection(inspection).await
    }

    async fn load_inspection(&self, subject_id: Uuid) -> Result<Option<Inspection>> {
        self.inner.load_inspection(subject_id).await
    }

    async fn update_snapshot(
        &self,
        subject_id: Uuid,
        expected_version: i64,
        snapshot: InspectionSnapshot,
    ) -> Result<Inspection> {
        self.inner.update_snapshot(subject_id, expected_version, snapshot).await
    }

    async fn load_workflow(&self, workflow_id: Uuid) -> Result<Option<WorkflowRecord>> {
        self.inner.load_workflow(workflow_id).await
    }

    async fn find_pending_workflow(&self, subject_id: Uuid) -> Result<Option<WorkflowRecord>> {
        self.inner.find_pending_workflow(subject_id).await
    }

    async fn latest_workflow(&self, subject_id: Uuid) -> Result<Option<WorkflowRecord>> {
        self.inner.latest_workflow(subject_id).await
    }

    async fn commit_transition(&self, commit: TransitionCommit) -> Result<CommittedTransition> {
        if self.armed.load(Ordering::SeqCst) {
            self.barrier.wait().await;
        }
        self.inner.commit_transition(commit).await
    }

    async fn find_overdue(&self, priority: Priority, submitted_before: DateTime<Utc>) -> Result<Vec<WorkflowRecord>> {
        self.inner.find_overdue(priority, submitted_before).await
    }

    async fn escalate_if_pending(
        &self,
        workflow_id: Uuid,
        update: EscalationUpdate,
        history: HistoryEntry,
    ) -> Result<Option<WorkflowRecord>> {
        self.inner.escalate_if_pending(workflow_id, update, history).await
    }

    async fn record_escalation_warning(
        &self,
        workflow_id: Uuid,
        offset_minutes: u32,
        history: HistoryEntry,
    ) -> Result<bool> {
        self.inner
            .record_escalation_warning(workflow_id, offset_minutes, history)
            .await
    }

    async fn record_timeout_warning(
        &self,
        subject_id: Uuid,
        state: InspectionState,
        offset_minutes: u32,
        history: HistoryEntry,
    ) -> Result<bool> {
        self.inner
            .record_timeout_warning(subject_id, state, offset_minutes, history)
            .await
    }

    async fn mark_review_started(
        &self,
        workflow_id: Uuid,
        reviewer_id: &str,
        at: DateTime<Utc>,
        history: HistoryEntry,
    ) -> Result<WorkflowRecord> {
        self.inner
            .mark_review_started(workflow_id, reviewer_id, at, history)
            .await
    }

    async fn find_in_state(&self, state: InspectionState, entered_before: DateTime<Utc>) -> Result<Vec<Inspection>> {
        self.inner.find_in_state(state, entered_before).await
    }

    async fn archive_subject(
        &self,
        subject_id: Uuid,
        expected_version: i64,
        at: DateTime<Utc>,
        history: HistoryEntry,
    ) -> Result<Inspection> {
        self.inner
            .archive_subject(subject_id, expected_version, at, history)
            .await
    }

    async fn history_for_subject(&self, subject_id: Uuid) -> Result<Vec<HistoryEntry>> {
        self.inner.history_for_subject(subject_id).await
    }

    async fn history_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<HistoryEntry>> {
        self.inner.history_for_workflow(workflow_id).await
    }
}

/// Fails escalations of chosen reviews and commits on chosen inspections with
/// a storage error, leaving every other record to the inner store.
pub struct FaultyStore {
    inner: Arc<InMemoryWorkflowStore>,
    failing_workflows: Mutex<HashSet<Uuid>>,
    failing_subjects: Mutex<HashSet<Uuid>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<InMemoryWorkflowStore>) -> Self {
        Self {
            inner,
            failing_workflows: Mutex::new(HashSet::new()),
            failing_subjects: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail_escalation_of(&self, workflow_id: Uuid) {
        self.failing_workflows.lock().insert(workflow_id);
    }

    pub fn fail_commits_for(&self, subject_id: Uuid) {
        self.failing_subjects.lock().insert(subject_id);
    }
}

#[async_trait]
impl WorkflowStore for FaultyStore {
    async fn insert_inspection(&self, inspection: &Inspection) -> Result<()> {
        self.inner.insert_inspection(inspection).await
    }

    async fn load_inspection(&self, subject_id: Uuid) -> Result<Option<Inspection>> {
        self.inner.load_inspection(subject_id).await
    }

    async fn update_snapshot(
        &self,
        subject_id: Uuid,
        expected_version: i64,
        snapshot: InspectionSnapshot,
    ) -> Result<Inspection> {
        self.inner.update_snapshot(subject_id, expected_version, snapshot).await
    }

    async fn load_workflow(&self, workflow_id: Uuid) -> Result<Option<WorkflowRecord>> {
        self.inner.load_workflow(workflow_id).await
    }

    async fn find_pending_workflow(&self, subject_id: Uuid) -> Result<Option<WorkflowRecord>> {
        self.inner.find_pending_workflow(subject_id).await
    }

    async fn latest_workflow(&self, subject_id: Uuid) -> Result<Option<WorkflowRecord>> {
        self.inner.latest_workflow(subject_id).await
    }

    async fn commit_transition(&self, commit: TransitionCommit) -> Result<CommittedTransition> {
        if self.failing_subjects.lock().contains(&commit.inspection.id) {
            return Err(PersistenceError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.commit_transition(commit).await
    }

    async fn find_overdue(&self, priority: Priority, submitted_before: DateTime<Utc>) -> Result<Vec<WorkflowRecord>> {
        self.inner.find_overdue(priority, submitted_before).await
    }

    async fn escalate_if_pending(
        &self,
        workflow_id: Uuid,
        update: EscalationUpdate,
        history: HistoryEntry,
    ) -> Result<Option<WorkflowRecord>> {
        if self.failing_workflows.lock().contains(&workflow_id) {
            return Err(PersistenceError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.escalate_if_pending(workflow_id, update, history).await
    }

    async fn record_escalation_warning(
        &self,
        workflow_id: Uuid,
        offset_minutes: u32,
        history: HistoryEntry,
    ) -> Result<bool> {
        self.inner
            .record_escalation_warning(workflow_id, offset_minutes, history)
            .await
    }

    async fn record_timeout_warning(
        &self,
        subject_id: Uuid,
        state: InspectionState,
        offset_minutes: u32,
        history: HistoryEntry,
    ) -> Result<bool> {
        self.inner
            .record_timeout_warning(subject_id, state, offset_minutes, history)
            .await
    }

    async fn mark_review_started(
        &self,
        workflow_id: Uuid,
        reviewer_id: &str,
        at: DateTime<Utc>,
        history: HistoryEntry,
    ) -> Result<WorkflowRecord> {
        self.inner
            .mark_review_started(workflow_id, reviewer_id, at, history)
            .await
    }

    async fn find_in_state(&self, state: InspectionState, entered_before: DateTime<Utc>) -> Result<Vec<Inspection>> {
        self.inner.find_in_state(state, entered_before).await
    }

    async fn archive_subject(
        &self,
        subject_id: Uuid,
        expected_version: i64,
        at: DateTime<Utc>,
        history: HistoryEntry,
    ) -> Result<Inspection> {
        self.inner
            .archive_subject(subject_id, expected_version, at, history)
            .await
    }

    async fn history_for_subject(&self, subject_id: Uuid) -> Result<Vec<HistoryEntry>> {
        self.inner.history_for_subject(subject_id).await
    }

    async fn history_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<HistoryEntry>> {
        self.inner.history_for_workflow(workflow_id).await
    }
}
