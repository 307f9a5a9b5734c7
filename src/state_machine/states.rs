use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an inspection (the subject under review)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionState {
    /// Created but no technician work recorded yet
    Draft,
    /// Technician is working on the inspection
    InProgress,
    /// Submitted and waiting on a manager decision
    PendingReview,
    /// Manager approved the inspection
    Approved,
    /// Manager rejected the inspection
    Rejected,
    /// Manager sent the inspection back for edits
    ChangesRequested,
    /// Report delivered to the customer
    SentToCustomer,
    /// Delivery confirmed or timed out
    Completed,
}

impl InspectionState {
    /// Every canonical state, in lifecycle order
    pub const ALL: [InspectionState; 8] = [
        Self::Draft,
        Self::InProgress,
        Self::PendingReview,
        Self::Approved,
        Self::Rejected,
        Self::ChangesRequested,
        Self::SentToCustomer,
        Self::Completed,
    ];

    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Check if technicians may still edit inspection items in this state
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::InProgress)
    }

    /// Check if this state is a manager decision on a pending review
    pub fn is_review_outcome(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::ChangesRequested
        )
    }
}

impl fmt::Display for InspectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::InProgress => write!(f, "in_progress"),
            Self::PendingReview => write!(f, "pending_review"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::ChangesRequested => write!(f, "changes_requested"),
            Self::SentToCustomer => write!(f, "sent_to_customer"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for InspectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "in_progress" => Ok(Self::InProgress),
            "pending_review" => Ok(Self::PendingReview),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "changes_requested" => Ok(Self::ChangesRequested),
            "sent_to_customer" => Ok(Self::SentToCustomer),
            "completed" => Ok(Self::Completed),
            _ => Err(format!("Invalid inspection state: {s}")),
        }
    }
}

impl Default for InspectionState {
    fn default() -> Self {
        Self::Draft
    }
}

/// Status of a manager review (one `WorkflowRecord` per submission)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
    ChangesRequested,
}

impl ReviewStatus {
    /// Approved and rejected reviews never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }

    /// Review status produced by moving the inspection out of `pending_review`
    pub fn from_outcome(state: InspectionState) -> Option<Self> {
        match state {
            InspectionState::Approved => Some(Self::Approved),
            InspectionState::Rejected => Some(Self::Rejected),
            InspectionState::ChangesRequested => Some(Self::ChangesRequested),
            _ => None,
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::ChangesRequested => write!(f, "changes_requested"),
        }
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "changes_requested" => Ok(Self::ChangesRequested),
            _ => Err(format!("Invalid review status: {s}")),
        }
    }
}

/// Review priority; escalation always bumps to `Urgent`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Self::Low, Self::Normal, Self::High, Self::Urgent];
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(format!("Invalid priority: {s}")),
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}
