//! # Postgres Workflow Store
//!
//! [`WorkflowStore`] over the schema in `migrations/`. Each mutating method
//! runs in one transaction; the subject row (or review row) is locked with
//! `SELECT ... FOR UPDATE` before its version or status is checked. The
//! partial unique index on pending reviews backs the single-pending rule even
//! if two transactions race past the version check.

use crate::models::{Assignee, HistoryEntry, Inspection, InspectionSnapshot, WorkflowRecord};
use crate::state_machine::errors::{PersistenceError, PersistenceResult};
use crate::state_machine::persistence::{
    CommittedTransition, EscalationUpdate, TransitionCommit, WorkflowStore, WorkflowWrite,
};
use crate::state_machine::states::{InspectionState, Priority};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};
use std::str::FromStr;
use tracing::{debug, instrument};
use uuid::Uuid;

fn parse_column<T>(value: &str, field: &str) -> PersistenceResult<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| PersistenceError::InvalidData {
            field: format!("{field}: {e}"),
        })
}

fn parse_optional<T>(value: Option<String>, field: &str) -> PersistenceResult<Option<T>>
where
    T: FromStr<Err = String>,
{
    value.map(|v| parse_column(&v, field)).transpose()
}

#[derive(Debug, FromRow)]
struct InspectionRow {
    id: Uuid,
    tenant_id: String,
    state: String,
    version: i64,
    technician_id: Option<String>,
    snapshot: Json<InspectionSnapshot>,
    editing_locked: bool,
    state_entered_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
    timeout_warnings_sent: Vec<i32>,
    archived_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn offsets_from_column(offsets: Vec<i32>) -> Vec<u32> {
    offsets.into_iter().map(|offset| offset.max(0) as u32).collect()
}

fn offsets_to_column(offsets: &[u32]) -> Vec<i32> {
    offsets.iter().map(|&offset| offset as i32).collect()
}

impl TryFrom<InspectionRow> for Inspection {
    type Error = PersistenceError;

    fn try_from(row: InspectionRow) -> PersistenceResult<Self> {
        Ok(Self {
            id: row.id,
            tenant_id: row.tenant_id,
            state: parse_column(&row.state, "inspections.state")?,
            version: row.version,
            technician_id: row.technician_id,
            snapshot: row.snapshot.0,
            editing_locked: row.editing_locked,
            state_entered_at: row.state_entered_at,
            delivered_at: row.delivered_at,
            timeout_warnings_sent: offsets_from_column(row.timeout_warnings_sent),
            archived_at: row.archived_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct WorkflowRow {
    id: Uuid,
    subject_id: Uuid,
    tenant_id: String,
    submitted_by: String,
    submitted_at: DateTime<Utc>,
    status: String,
    assigned_to: Option<String>,
    priority: String,
    approved_by: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    rejected_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
    manager_comments: Option<String>,
    escalated_at: Option<DateTime<Utc>>,
    escalated_to: Option<String>,
    review_started_at: Option<DateTime<Utc>>,
    reviewer_id: Option<String>,
    warnings_sent: Vec<i32>,
    archived_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<WorkflowRow> for WorkflowRecord {
    type Error = PersistenceError;

    fn try_from(row: WorkflowRow) -> PersistenceResult<Self> {
        Ok(Self {
            id: row.id,
            subject_id: row.subject_id,
            tenant_id: row.tenant_id,
            submitted_by: row.submitted_by,
            submitted_at: row.submitted_at,
            status: parse_column(&row.status, "inspection_workflows.status")?,
            assigned_to: parse_optional::<Assignee>(row.assigned_to, "inspection_workflows.assigned_to")?,
            priority: parse_column(&row.priority, "inspection_workflows.priority")?,
            approved_by: row.approved_by,
            approved_at: row.approved_at,
            rejected_at: row.rejected_at,
            rejection_reason: row.rejection_reason,
            manager_comments: row.manager_comments,
            escalated_at: row.escalated_at,
            escalated_to: parse_optional::<Assignee>(row.escalated_to, "inspection_workflows.escalated_to")?,
            review_started_at: row.review_started_at,
            reviewer_id: row.reviewer_id,
            warnings_sent: offsets_from_column(row.warnings_sent),
            archived_at: row.archived_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    id: Uuid,
    subject_id: Uuid,
    workflow_id: Option<Uuid>,
    actor_id: Option<String>,
    action: String,
    from_state: Option<String>,
    to_state: Option<String>,
    comments: Option<String>,
    metadata: Json<Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<HistoryRow> for HistoryEntry {
    type Error = PersistenceError;

    fn try_from(row: HistoryRow) -> PersistenceResult<Self> {
        Ok(Self {
            id: row.id,
            subject_id: row.subject_id,
            workflow_id: row.workflow_id,
            actor_id: row.actor_id,
            action: parse_column(&row.action, "inspection_workflow_history.action")?,
            from_state: parse_optional::<InspectionState>(row.from_state, "inspection_workflow_history.from_state")?,
            to_state: parse_optional::<InspectionState>(row.to_state, "inspection_workflow_history.to_state")?,
            comments: row.comments,
            metadata: row.metadata.0,
            created_at: row.created_at,
        })
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[derive(Debug, Clone)]
pub struct PgWorkflowStore {
    pool: PgPool,
}

impl PgWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_inspection(
        conn: &mut PgConnection,
        subject_id: Uuid,
        expected_version: i64,
    ) -> PersistenceResult<Inspection> {
        let row = sqlx::query_as::<_, InspectionRow>("SELECT * FROM inspections WHERE id = $1 FOR UPDATE")
            .bind(subject_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(PersistenceError::NotFound { entity_id: subject_id })?;
        if row.version != expected_version {
            return Err(PersistenceError::ConcurrentModification { entity_id: subject_id });
        }
        row.try_into()
    }

    async fn lock_workflow(conn: &mut PgConnection, workflow_id: Uuid) -> PersistenceResult<WorkflowRecord> {
        sqlx::query_as::<_, WorkflowRow>("SELECT * FROM inspection_workflows WHERE id = $1 FOR UPDATE")
            .bind(workflow_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(PersistenceError::NotFound { entity_id: workflow_id })?
            .try_into()
    }

    async fn write_inspection(conn: &mut PgConnection, inspection: &Inspection) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            UPDATE inspections
            SET state = $2, version = $3, technician_id = $4, snapshot = $5,
                editing_locked = $6, state_entered_at = $7, delivered_at = $8,
                archived_at = $9, updated_at = $10, timeout_warnings_sent = $11
            WHERE id = $1
            "#,
        )
        .bind(inspection.id)
        .bind(inspection.state.to_string())
        .bind(inspection.version)
        .bind(&inspection.technician_id)
        .bind(Json(&inspection.snapshot))
        .bind(inspection.editing_locked)
        .bind(inspection.state_entered_at)
        .bind(inspection.delivered_at)
        .bind(inspection.archived_at)
        .bind(inspection.updated_at)
        .bind(offsets_to_column(&inspection.timeout_warnings_sent))
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn write_workflow(conn: &mut PgConnection, record: &WorkflowRecord) -> Result<(), sqlx::Error> {
        let warnings = offsets_to_column(&record.warnings_sent);
        sqlx::query(
            r#"
            INSERT INTO inspection_workflows (
                id, subject_id, tenant_id, submitted_by, submitted_at, status,
                assigned_to, priority, approved_by, approved_at, rejected_at,
                rejection_reason, manager_comments, escalated_at, escalated_to,
                review_started_at, reviewer_id, warnings_sent, archived_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, $20
            )
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                assigned_to = EXCLUDED.assigned_to,
                priority = EXCLUDED.priority,
                approved_by = EXCLUDED.approved_by,
                approved_at = EXCLUDED.approved_at,
                rejected_at = EXCLUDED.rejected_at,
                rejection_reason = EXCLUDED.rejection_reason,
                manager_comments = EXCLUDED.manager_comments,
                escalated_at = EXCLUDED.escalated_at,
                escalated_to = EXCLUDED.escalated_to,
                review_started_at = EXCLUDED.review_started_at,
                reviewer_id = EXCLUDED.reviewer_id,
                warnings_sent = EXCLUDED.warnings_sent,
                archived_at = EXCLUDED.archived_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(record.id)
        .bind(record.subject_id)
        .bind(&record.tenant_id)
        .bind(&record.submitted_by)
        .bind(record.submitted_at)
        .bind(record.status.to_string())
        .bind(record.assigned_to.as_ref().map(|a| a.to_string()))
        .bind(record.priority.to_string())
        .bind(&record.approved_by)
        .bind(record.approved_at)
        .bind(record.rejected_at)
        .bind(&record.rejection_reason)
        .bind(&record.manager_comments)
        .bind(record.escalated_at)
        .bind(record.escalated_to.as_ref().map(|a| a.to_string()))
        .bind(record.review_started_at)
        .bind(&record.reviewer_id)
        .bind(warnings)
        .bind(record.archived_at)
        .bind(record.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn append_history(conn: &mut PgConnection, entry: &HistoryEntry) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO inspection_workflow_history (
                id, subject_id, workflow_id, actor_id, action,
                from_state, to_state, comments, metadata, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.subject_id)
        .bind(entry.workflow_id)
        .bind(&entry.actor_id)
        .bind(entry.action.to_string())
        .bind(entry.from_state.map(|s| s.to_string()))
        .bind(entry.to_state.map(|s| s.to_string()))
        .bind(&entry.comments)
        .bind(Json(&entry.metadata))
        .bind(entry.created_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn history_where(&self, column: &str, id: Uuid) -> PersistenceResult<Vec<HistoryEntry>> {
        let query = format!("SELECT * FROM inspection_workflow_history WHERE {column} = $1 ORDER BY seq");
        sqlx::query_as::<_, HistoryRow>(&query)
            .bind(id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(HistoryEntry::try_from)
            .collect()
    }
}

#[async_trait]
impl WorkflowStore for PgWorkflowStore {
    async fn insert_inspection(&self, inspection: &Inspection) -> PersistenceResult<()> {
        sqlx::query(
            r#"
            INSERT INTO inspections (
                id, tenant_id, state, version, technician_id, snapshot, editing_locked,
                state_entered_at, delivered_at, archived_at, created_at, updated_at,
                timeout_warnings_sent
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(inspection.id)
        .bind(&inspection.tenant_id)
        .bind(inspection.state.to_string())
        .bind(inspection.version)
        .bind(&inspection.technician_id)
        .bind(Json(&inspection.snapshot))
        .bind(inspection.editing_locked)
        .bind(inspection.state_entered_at)
        .bind(inspection.delivered_at)
        .bind(inspection.archived_at)
        .bind(inspection.created_at)
        .bind(inspection.updated_at)
        .bind(offsets_to_column(&inspection.timeout_warnings_sent))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_inspection(&self, subject_id: Uuid) -> PersistenceResult<Option<Inspection>> {
        sqlx::query_as::<_, InspectionRow>("SELECT * FROM inspections WHERE id = $1")
            .bind(subject_id)
            .fetch_optional(&self.pool)
            .await?
            .map(Inspection::try_from)
            .transpose()
    }

    #[instrument(skip(self, snapshot))]
    async fn update_snapshot(
        &self,
        subject_id: Uuid,
        expected_version: i64,
        snapshot: InspectionSnapshot,
    ) -> PersistenceResult<Inspection> {
        let mut tx = self.pool.begin().await?;
        let mut inspection = Self::lock_inspection(&mut tx, subject_id, expected_version).await?;
        inspection.snapshot = snapshot;
        inspection.version += 1;
        inspection.updated_at = Utc::now();
        Self::write_inspection(&mut tx, &inspection).await?;
        tx.commit().await?;
        Ok(inspection)
    }

    async fn load_workflow(&self, workflow_id: Uuid) -> PersistenceResult<Option<WorkflowRecord>> {
        sqlx::query_as::<_, WorkflowRow>("SELECT * FROM inspection_workflows WHERE id = $1")
            .bind(workflow_id)
            .fetch_optional(&self.pool)
            .await?
            .map(WorkflowRecord::try_from)
            .transpose()
    }

    async fn find_pending_workflow(&self, subject_id: Uuid) -> PersistenceResult<Option<WorkflowRecord>> {
        sqlx::query_as::<_, WorkflowRow>(
            "SELECT * FROM inspection_workflows WHERE subject_id = $1 AND status = 'pending'",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?
        .map(WorkflowRecord::try_from)
        .transpose()
    }

    async fn latest_workflow(&self, subject_id: Uuid) -> PersistenceResult<Option<WorkflowRecord>> {
        sqlx::query_as::<_, WorkflowRow>(
            "SELECT * FROM inspection_workflows WHERE subject_id = $1 ORDER BY submitted_at DESC LIMIT 1",
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?
        .map(WorkflowRecord::try_from)
        .transpose()
    }

    #[instrument(skip(self, commit), fields(subject_id = %commit.inspection.id, to = %commit.inspection.state))]
    async fn commit_transition(&self, commit: TransitionCommit) -> PersistenceResult<CommittedTransition> {
        let subject_id = commit.inspection.id;
        let mut tx = self.pool.begin().await?;
        Self::lock_inspection(&mut tx, subject_id, commit.expected_version).await?;

        let workflow = match commit.workflow {
            Some(WorkflowWrite::Open(record)) => {
                Self::write_workflow(&mut tx, &record).await.map_err(|e| {
                    if is_unique_violation(&e) {
                        PersistenceError::PendingReviewExists { subject_id }
                    } else {
                        PersistenceError::Database(e)
                    }
                })?;
                Some(record)
            }
            Some(WorkflowWrite::Resolve(resolution)) => {
                let mut record = Self::lock_workflow(&mut tx, resolution.workflow_id).await?;
                if !record.is_pending() {
                    return Err(PersistenceError::ConcurrentModification { entity_id: subject_id });
                }
                if resolution.require_not_under_review && record.review_started_at.is_some() {
                    return Err(PersistenceError::ReviewInProgress {
                        workflow_id: resolution.workflow_id,
                    });
                }
                resolution.apply(&mut record);
                Self::write_workflow(&mut tx, &record).await?;
                Some(record)
            }
            None => None,
        };

        Self::write_inspection(&mut tx, &commit.inspection).await?;
        Self::append_history(&mut tx, &commit.history).await?;
        tx.commit().await?;

        debug!(version = commit.inspection.version, "Transition committed");
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
        sqlx::query_as::<_, WorkflowRow>(
            r#"
            SELECT * FROM inspection_workflows
            WHERE status = 'pending'
              AND escalated_at IS NULL
              AND archived_at IS NULL
              AND priority = $1
              AND submitted_at <= $2
            ORDER BY submitted_at
            "#,
        )
        .bind(priority.to_string())
        .bind(submitted_before)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(WorkflowRecord::try_from)
        .collect()
    }

    #[instrument(skip(self, update, history))]
    async fn escalate_if_pending(
        &self,
        workflow_id: Uuid,
        update: EscalationUpdate,
        history: HistoryEntry,
    ) -> PersistenceResult<Option<WorkflowRecord>> {
        let mut tx = self.pool.begin().await?;
        let mut record = Self::lock_workflow(&mut tx, workflow_id).await?;
        if !record.is_pending() || record.is_escalated() {
            return Ok(None);
        }
        update.apply(&mut record);
        Self::write_workflow(&mut tx, &record).await?;
        Self::append_history(&mut tx, &history).await?;
        tx.commit().await?;
        Ok(Some(record))
    }

    async fn record_escalation_warning(
        &self,
        workflow_id: Uuid,
        offset_minutes: u32,
        history: HistoryEntry,
    ) -> PersistenceResult<bool> {
        let mut tx = self.pool.begin().await?;
        let mut record = Self::lock_workflow(&mut tx, workflow_id).await?;
        if !record.is_pending() || record.is_escalated() || record.warning_sent(offset_minutes) {
            return Ok(false);
        }
        record.warnings_sent.push(offset_minutes);
        Self::write_workflow(&mut tx, &record).await?;
        Self::append_history(&mut tx, &history).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn record_timeout_warning(
        &self,
        subject_id: Uuid,
        state: InspectionState,
        offset_minutes: u32,
        history: HistoryEntry,
    ) -> PersistenceResult<bool> {
        let mut tx = self.pool.begin().await?;
        let recorded = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE inspections
            SET timeout_warnings_sent = array_append(timeout_warnings_sent, $3)
            WHERE id = $1
              AND state = $2
              AND archived_at IS NULL
              AND NOT ($3 = ANY(timeout_warnings_sent))
            RETURNING id
            "#,
        )
        .bind(subject_id)
        .bind(state.to_string())
        .bind(offset_minutes as i32)
        .fetch_optional(&mut *tx)
        .await?;
        if recorded.is_none() {
            return Ok(false);
        }
        Self::append_history(&mut tx, &history).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn mark_review_started(
        &self,
        workflow_id: Uuid,
        reviewer_id: &str,
        at: DateTime<Utc>,
        history: HistoryEntry,
    ) -> PersistenceResult<WorkflowRecord> {
        let mut tx = self.pool.begin().await?;
        let mut record = Self::lock_workflow(&mut tx, workflow_id).await?;
        if !record.is_pending() {
            return Err(PersistenceError::ConcurrentModification { entity_id: workflow_id });
        }
        if record.review_started_at.is_some() {
            return Ok(record);
        }
        record.review_started_at = Some(at);
        record.reviewer_id = Some(reviewer_id.to_string());
        record.updated_at = at;
        Self::write_workflow(&mut tx, &record).await?;
        Self::append_history(&mut tx, &history).await?;
        tx.commit().await?;
        Ok(record)
    }

    async fn find_in_state(
        &self,
        state: InspectionState,
        entered_before: DateTime<Utc>,
    ) -> PersistenceResult<Vec<Inspection>> {
        sqlx::query_as::<_, InspectionRow>(
            r#"
            SELECT * FROM inspections
            WHERE state = $1 AND archived_at IS NULL AND state_entered_at <= $2
            ORDER BY state_entered_at
            "#,
        )
        .bind(state.to_string())
        .bind(entered_before)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Inspection::try_from)
        .collect()
    }

    #[instrument(skip(self, history))]
    async fn archive_subject(
        &self,
        subject_id: Uuid,
        expected_version: i64,
        at: DateTime<Utc>,
        history: HistoryEntry,
    ) -> PersistenceResult<Inspection> {
        let mut tx = self.pool.begin().await?;
        let mut inspection = Self::lock_inspection(&mut tx, subject_id, expected_version).await?;
        inspection.archived_at = Some(at);
        inspection.version += 1;
        inspection.updated_at = at;
        Self::write_inspection(&mut tx, &inspection).await?;
        sqlx::query("UPDATE inspection_workflows SET archived_at = $2 WHERE subject_id = $1")
            .bind(subject_id)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        Self::append_history(&mut tx, &history).await?;
        tx.commit().await?;
        Ok(inspection)
    }

    async fn history_for_subject(&self, subject_id: Uuid) -> PersistenceResult<Vec<HistoryEntry>> {
        self.history_where("subject_id", subject_id).await
    }

    async fn history_for_workflow(&self, workflow_id: Uuid) -> PersistenceResult<Vec<HistoryEntry>> {
        self.history_where("workflow_id", workflow_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow_row() -> WorkflowRow {
        let now = Utc::now();
        WorkflowRow {
            id: Uuid::new_v4(),
            subject_id: Uuid::new_v4(),
            tenant_id: "shop-1".to_string(),
            submitted_by: "tech-1".to_string(),
            submitted_at: now,
            status: "pending".to_string(),
            assigned_to: Some("role:shop_manager".to_string()),
            priority: "high".to_string(),
            approved_by: None,
            approved_at: None,
            rejected_at: None,
            rejection_reason: None,
            manager_comments: None,
            escalated_at: None,
            escalated_to: None,
            review_started_at: None,
            reviewer_id: None,
            warnings_sent: vec![30],
            archived_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_workflow_row_conversion() {
        let record = WorkflowRecord::try_from(workflow_row()).unwrap();
        assert!(record.is_pending());
        assert_eq!(record.priority, Priority::High);
        assert_eq!(
            record.assigned_to,
            Some(Assignee::Role(crate::models::Role::ShopManager))
        );
        assert!(record.warning_sent(30));
    }

    #[test]
    fn test_corrupt_column_is_invalid_data() {
        let mut row = workflow_row();
        row.status = "lost".to_string();
        let err = WorkflowRecord::try_from(row).unwrap_err();
        assert!(
            matches!(err, PersistenceError::InvalidData { ref field } if field.starts_with("inspection_workflows.status"))
        );
    }
}
