use super::states::InspectionState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named workflow events; each history entry is tagged with one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    Started,
    SubmittedForReview,
    ReviewStarted,
    Approved,
    Rejected,
    ChangesRequested,
    Resumed,
    SentToCustomer,
    Completed,
    Escalated,
    EscalationWarning,
    /// An auto-action is about to fire on a timed-out state
    TimeoutWarning,
    Archived,
    /// Tenant-specific edge without a canonical name
    Transitioned,
}

impl WorkflowEvent {
    /// Name the event produced by moving an inspection from `from` to `to`
    pub fn for_transition(from: InspectionState, to: InspectionState) -> Self {
        use InspectionState as S;
        match (from, to) {
            (S::Draft, S::InProgress) => Self::Started,
            (S::Rejected | S::ChangesRequested, S::InProgress) => Self::Resumed,
            (_, S::PendingReview) => Self::SubmittedForReview,
            (S::PendingReview, S::Approved) => Self::Approved,
            (S::PendingReview, S::Rejected) => Self::Rejected,
            (S::PendingReview, S::ChangesRequested) => Self::ChangesRequested,
            (_, S::SentToCustomer) => Self::SentToCustomer,
            (_, S::Completed) => Self::Completed,
            _ => Self::Transitioned,
        }
    }

    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::SubmittedForReview => "submitted_for_review",
            Self::ReviewStarted => "review_started",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ChangesRequested => "changes_requested",
            Self::Resumed => "resumed",
            Self::SentToCustomer => "sent_to_customer",
            Self::Completed => "completed",
            Self::Escalated => "escalated",
            Self::EscalationWarning => "escalation_warning",
            Self::TimeoutWarning => "timeout_warning",
            Self::Archived => "archived",
            Self::Transitioned => "transitioned",
        }
    }

    /// Name used when publishing the event to in-process subscribers
    pub fn published_name(&self) -> String {
        match self {
            Self::Escalated | Self::EscalationWarning | Self::ReviewStarted => {
                format!("workflow.{}", self.event_type())
            }
            _ => format!("inspection.{}", self.event_type()),
        }
    }
}

impl fmt::Display for WorkflowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_type())
    }
}

impl std::str::FromStr for WorkflowEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(Self::Started),
            "submitted_for_review" => Ok(Self::SubmittedForReview),
            "review_started" => Ok(Self::ReviewStarted),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "changes_requested" => Ok(Self::ChangesRequested),
            "resumed" => Ok(Self::Resumed),
            "sent_to_customer" => Ok(Self::SentToCustomer),
            "completed" => Ok(Self::Completed),
            "escalated" => Ok(Self::Escalated),
            "escalation_warning" => Ok(Self::EscalationWarning),
            "timeout_warning" => Ok(Self::TimeoutWarning),
            "archived" => Ok(Self::Archived),
            "transitioned" => Ok(Self::Transitioned),
            _ => Err(format!("Invalid workflow event: {s}")),
        }
    }
}
