//! # Transition Actions
//!
//! Side-effect hooks named by transition rules. Pre-actions adjust the records
//! written by the transition itself and therefore run inside the commit;
//! post-actions are notification signals handed to the dispatcher after the
//! commit, and their failure never undoes the transition.

use crate::models::{Assignee, Inspection, WorkflowRecord};
use crate::rules::types::{BusinessRules, NotificationEvent};
use crate::state_machine::context::TransitionPayload;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    // pre
    LockEditing,
    UnlockEditing,
    AssignReviewer,
    StampDelivery,
    // post
    NotifyReviewRequested,
    NotifyApproved,
    NotifyRejected,
    NotifyChangesRequested,
    NotifyCustomerReport,
    NotifyCompleted,
}

/// When an action runs relative to the commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionPhase {
    Pre,
    Post,
}

impl ActionKind {
    pub fn phase(&self) -> ActionPhase {
        match self {
            Self::LockEditing | Self::UnlockEditing | Self::AssignReviewer | Self::StampDelivery => {
                ActionPhase::Pre
            }
            _ => ActionPhase::Post,
        }
    }

    /// Notification signalled by a post-action
    pub fn notification_event(&self) -> Option<NotificationEvent> {
        match self {
            Self::NotifyReviewRequested => Some(NotificationEvent::ReviewRequested),
            Self::NotifyApproved => Some(NotificationEvent::ReviewApproved),
            Self::NotifyRejected => Some(NotificationEvent::ReviewRejected),
            Self::NotifyChangesRequested => Some(NotificationEvent::ChangesRequested),
            Self::NotifyCustomerReport => Some(NotificationEvent::ReportReady),
            Self::NotifyCompleted => Some(NotificationEvent::InspectionCompleted),
            _ => None,
        }
    }

    /// Get a description of this action for logging
    pub fn description(&self) -> &'static str {
        match self {
            Self::LockEditing => "Lock inspection items against technician edits",
            Self::UnlockEditing => "Unlock inspection items for technician edits",
            Self::AssignReviewer => "Assign the new review to a reviewer",
            Self::StampDelivery => "Record customer delivery time",
            Self::NotifyReviewRequested => "Notify reviewers that a review is waiting",
            Self::NotifyApproved => "Notify the technician of approval",
            Self::NotifyRejected => "Notify the technician of rejection",
            Self::NotifyChangesRequested => "Notify the technician that changes are requested",
            Self::NotifyCustomerReport => "Send the inspection report to the customer",
            Self::NotifyCompleted => "Notify the shop that the inspection is complete",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LockEditing => "lock_editing",
            Self::UnlockEditing => "unlock_editing",
            Self::AssignReviewer => "assign_reviewer",
            Self::StampDelivery => "stamp_delivery",
            Self::NotifyReviewRequested => "notify_review_requested",
            Self::NotifyApproved => "notify_approved",
            Self::NotifyRejected => "notify_rejected",
            Self::NotifyChangesRequested => "notify_changes_requested",
            Self::NotifyCustomerReport => "notify_customer_report",
            Self::NotifyCompleted => "notify_completed",
        };
        f.write_str(name)
    }
}

/// Apply pre-actions to the records about to be committed
pub fn apply_pre_actions(
    actions: &[ActionKind],
    inspection: &mut Inspection,
    opened_review: Option<&mut WorkflowRecord>,
    payload: &TransitionPayload,
    business_rules: &BusinessRules,
    now: DateTime<Utc>,
) {
    let mut opened_review = opened_review;
    for action in actions {
        match action {
            ActionKind::LockEditing => inspection.editing_locked = true,
            ActionKind::UnlockEditing => inspection.editing_locked = false,
            ActionKind::AssignReviewer => {
                if let Some(review) = opened_review.as_deref_mut() {
                    review.assigned_to = Some(match &payload.assign_to {
                        Some(id) => Assignee::Principal(id.clone()),
                        None => Assignee::Role(business_rules.default_reviewer_role),
                    });
                }
            }
            ActionKind::StampDelivery if payload.delivery_confirmed => inspection.delivered_at = Some(now),
            ActionKind::StampDelivery => {
                tracing::debug!(subject_id = %inspection.id, "Delivery not confirmed, leaving delivered_at unset");
            }
            post => {
                tracing::debug!(action = %post, "Skipping post-action in pre-action phase");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::state_machine::states::Priority;

    #[test]
    fn test_phases() {
        assert_eq!(ActionKind::LockEditing.phase(), ActionPhase::Pre);
        assert_eq!(ActionKind::NotifyApproved.phase(), ActionPhase::Post);
        assert_eq!(ActionKind::AssignReviewer.notification_event(), None);
        assert_eq!(
            ActionKind::NotifyCustomerReport.notification_event(),
            Some(NotificationEvent::ReportReady)
        );
    }

    #[test]
    fn test_assign_reviewer_prefers_payload() {
        let now = Utc::now();
        let mut inspection = Inspection::new("shop-1", None);
        let mut review = WorkflowRecord::pending(inspection.id, "shop-1", "tech", Priority::Normal, now);
        let rules = BusinessRules::default();

        apply_pre_actions(
            &[ActionKind::LockEditing, ActionKind::AssignReviewer],
            &mut inspection,
            Some(&mut review),
            &TransitionPayload::new(),
            &rules,
            now,
        );
        assert!(inspection.editing_locked);
        assert_eq!(review.assigned_to, Some(Assignee::Role(Role::ShopManager)));

        apply_pre_actions(
            &[ActionKind::AssignReviewer],
            &mut inspection,
            Some(&mut review),
            &TransitionPayload::new().with_assignee("mgr-9"),
            &rules,
            now,
        );
        assert_eq!(
            review.assigned_to,
            Some(Assignee::Principal("mgr-9".to_string()))
        );
    }

    #[test]
    fn test_delivery_stamped_only_when_confirmed() {
        let now = Utc::now();
        let rules = BusinessRules::default();
        let mut inspection = Inspection::new("shop-1", None);

        apply_pre_actions(
            &[ActionKind::StampDelivery],
            &mut inspection,
            None,
            &TransitionPayload::new(),
            &rules,
            now,
        );
        assert_eq!(inspection.delivered_at, None);

        apply_pre_actions(
            &[ActionKind::StampDelivery],
            &mut inspection,
            None,
            &TransitionPayload::new().with_delivery_confirmed(),
            &rules,
            now,
        );
        assert_eq!(inspection.delivered_at, Some(now));
    }
}
