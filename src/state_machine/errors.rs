use super::guards::ConditionKind;
use super::states::InspectionState;
use crate::models::Role;
use crate::rules::RuleError;
use crate::validation::Violation;
use thiserror::Error;
use uuid::Uuid;

/// Outcome taxonomy for transition attempts; every variant is recoverable
#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("Inspection {subject_id} not found")]
    SubjectNotFound { subject_id: Uuid },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition {
        from: InspectionState,
        to: InspectionState,
    },

    #[error("Role {role} may not transition {from} to {to}")]
    Forbidden {
        role: Role,
        from: InspectionState,
        to: InspectionState,
    },

    #[error("Precondition failed: {condition} ({})", .condition.description())]
    PreconditionFailed { condition: ConditionKind },

    #[error("Validation failed with {} blocking violation(s)", .violations.len())]
    ValidationFailed { violations: Vec<Violation> },

    #[error("Inspection {subject_id} already has a pending review")]
    AlreadyPending { subject_id: Uuid },

    #[error("Inspection {subject_id} was modified concurrently; retry the transition")]
    ConcurrentModification { subject_id: Uuid },

    #[error("Inspection {subject_id} has no pending review")]
    NoPendingReview { subject_id: Uuid },

    #[error("Auto-action not eligible: {reason}")]
    AutoTriggerNotEligible { reason: String },

    #[error("Condition {condition} has no registered evaluator")]
    UnregisteredCondition { condition: ConditionKind },

    #[error("Inspection {subject_id} is archived")]
    Archived { subject_id: Uuid },

    #[error("Inspection {subject_id} cannot be archived while {state}")]
    NotArchivable {
        subject_id: Uuid,
        state: InspectionState,
    },

    #[error("Inspection {subject_id} is not editable")]
    NotEditable { subject_id: Uuid },

    #[error(transparent)]
    Config(#[from] RuleError),

    #[error("Persistence operation failed: {0}")]
    Persistence(PersistenceError),
}

impl TransitionError {
    /// Lost an optimistic race; the caller may retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

/// Specific error type for guard condition failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Condition not met: {condition}")]
    ConditionFailed { condition: ConditionKind },

    #[error("No evaluator registered for condition {condition}")]
    Unregistered { condition: ConditionKind },
}

/// Specific error type for persistence operations
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Record not found: {entity_id}")]
    NotFound { entity_id: Uuid },

    #[error("Concurrent modification detected for entity {entity_id}")]
    ConcurrentModification { entity_id: Uuid },

    #[error("Subject {subject_id} already has a pending review")]
    PendingReviewExists { subject_id: Uuid },

    #[error("Review {workflow_id} is being worked by a manager")]
    ReviewInProgress { workflow_id: Uuid },

    #[error("Invalid stored data: {field}")]
    InvalidData { field: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<GuardError> for TransitionError {
    fn from(err: GuardError) -> Self {
        match err {
            GuardError::ConditionFailed { condition } => Self::PreconditionFailed { condition },
            GuardError::Unregistered { condition } => Self::UnregisteredCondition { condition },
        }
    }
}

impl From<PersistenceError> for TransitionError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::ConcurrentModification { entity_id } => {
                Self::ConcurrentModification {
                    subject_id: entity_id,
                }
            }
            PersistenceError::PendingReviewExists { subject_id } => {
                Self::AlreadyPending { subject_id }
            }
            PersistenceError::NotFound { entity_id } => Self::SubjectNotFound {
                subject_id: entity_id,
            },
            PersistenceError::ReviewInProgress { workflow_id } => Self::AutoTriggerNotEligible {
                reason: format!("review {workflow_id} is in progress"),
            },
            other => Self::Persistence(other),
        }
    }
}

/// Result type alias for state machine operations
pub type TransitionResult<T> = Result<T, TransitionError>;
pub type GuardResult<T> = Result<T, GuardError>;
pub type PersistenceResult<T> = Result<T, PersistenceError>;
