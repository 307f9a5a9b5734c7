use crate::config::ConfigurationError;
use crate::rules::RuleError;
use crate::state_machine::errors::{PersistenceError, TransitionError};
use thiserror::Error;

/// Top-level error for the public facade
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Rule error: {0}")]
    Rules(#[from] RuleError),

    #[error("Transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl WorkflowError {
    /// The caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transition(e) => e.is_retryable(),
            Self::Persistence(PersistenceError::ConcurrentModification { .. }) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, WorkflowError>;
