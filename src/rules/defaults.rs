//! Built-in rule set. Every tenant starts from this table; overrides only add
//! to or replace parts of it.

use super::types::{
    AutoAction, AutoTrigger, BusinessRules, Channel, EscalationRule, NotificationEvent,
    NotificationRule, Recipient, RuleSet, TimeoutRule, TransitionRule,
};
use crate::models::{ItemStatus, Role};
use crate::state_machine::actions::ActionKind;
use crate::state_machine::guards::ConditionKind;
use crate::state_machine::states::{InspectionState as S, Priority};
use crate::validation::{
    RuleCondition, Severity, ValidationCheck, ValidationRule, ValidationScope,
};

const MANAGERS: [Role; 3] = [Role::ShopManager, Role::Owner, Role::Admin];

/// Pending reviews auto-approve after this long when enabled
pub const AUTO_APPROVE_AFTER_MINUTES: u32 = 30;
/// Approved reports auto-send after four hours when enabled
pub const AUTO_SEND_AFTER_MINUTES: u32 = 240;
/// Sent reports complete after a week without confirmation
pub const AUTO_COMPLETE_AFTER_MINUTES: u32 = 7 * 24 * 60;

pub fn default_rule_set() -> RuleSet {
    RuleSet {
        business_rules: BusinessRules::default(),
        transitions: default_transitions(),
        validation_rules: default_validation_rules(),
        timeout_rules: default_timeout_rules(),
        escalation_rules: default_escalation_rules(),
        notifications: default_notifications(),
    }
}

fn with_managers(roles: &[Role]) -> Vec<Role> {
    roles.iter().chain(MANAGERS.iter()).copied().collect()
}

fn default_transitions() -> Vec<TransitionRule> {
    vec![
        TransitionRule::new(
            S::Draft,
            S::InProgress,
            with_managers(&[Role::Mechanic, Role::ServiceAdvisor]),
        ),
        TransitionRule::new(S::InProgress, S::PendingReview, with_managers(&[Role::Mechanic]))
            .requires([ConditionKind::HasItems])
            .checks([
                "minimum_items",
                "required_categories",
                "critical_items_documented",
                "all_items_inspected",
                "attention_item_photos",
            ])
            .before([ActionKind::LockEditing, ActionKind::AssignReviewer])
            .after([ActionKind::NotifyReviewRequested]),
        TransitionRule::new(S::PendingReview, S::Approved, with_managers(&[Role::System]))
            .advises([ConditionKind::AllItemsInspected])
            .after([ActionKind::NotifyApproved])
            .auto(AutoTrigger {
                condition: Some(ConditionKind::NoCriticalItems),
                delay_minutes: Some(AUTO_APPROVE_AFTER_MINUTES),
                requires_confirmation: false,
            }),
        TransitionRule::new(S::PendingReview, S::Rejected, MANAGERS)
            .requires([ConditionKind::HasRejectionReason])
            .before([ActionKind::UnlockEditing])
            .after([ActionKind::NotifyRejected]),
        TransitionRule::new(S::PendingReview, S::ChangesRequested, MANAGERS)
            .requires([ConditionKind::HasManagerComments])
            .before([ActionKind::UnlockEditing])
            .after([ActionKind::NotifyChangesRequested]),
        TransitionRule::new(S::Rejected, S::InProgress, with_managers(&[Role::Mechanic]))
            .before([ActionKind::UnlockEditing]),
        TransitionRule::new(
            S::ChangesRequested,
            S::InProgress,
            with_managers(&[Role::Mechanic]),
        )
        .before([ActionKind::UnlockEditing]),
        TransitionRule::new(
            S::Approved,
            S::SentToCustomer,
            with_managers(&[Role::ServiceAdvisor, Role::System]),
        )
        .requires([ConditionKind::HasCustomerContact])
        .after([ActionKind::NotifyCustomerReport])
        .auto(AutoTrigger {
            condition: Some(ConditionKind::HasCustomerContact),
            delay_minutes: Some(AUTO_SEND_AFTER_MINUTES),
            requires_confirmation: false,
        }),
        TransitionRule::new(
            S::SentToCustomer,
            S::Completed,
            with_managers(&[Role::ServiceAdvisor, Role::System]),
        )
        .advises([ConditionKind::DeliveryConfirmed])
        .before([ActionKind::StampDelivery])
        .after([ActionKind::NotifyCompleted])
        .auto(AutoTrigger {
            condition: None,
            delay_minutes: Some(AUTO_COMPLETE_AFTER_MINUTES),
            requires_confirmation: false,
        }),
    ]
}

fn default_validation_rules() -> Vec<ValidationRule> {
    vec![
        ValidationRule::new(
            "minimum_items",
            ValidationScope::Transition,
            Severity::Error,
            ValidationCheck::MinimumItemCount { min: None },
            "Inspection does not have enough items for review",
        )
        .when(RuleCondition::ToState(S::PendingReview)),
        ValidationRule::new(
            "required_categories",
            ValidationScope::Transition,
            Severity::Error,
            ValidationCheck::RequiredCategories {
                categories: Vec::new(),
            },
            "Required inspection categories are not covered",
        )
        .when(RuleCondition::ToState(S::PendingReview)),
        ValidationRule::new(
            "critical_items_documented",
            ValidationScope::Transition,
            Severity::Error,
            ValidationCheck::CriticalItemsDocumented {
                min_photos: None,
                require_notes: true,
            },
            "Safety-critical items need photos and notes",
        )
        .when(RuleCondition::ToState(S::PendingReview)),
        ValidationRule::new(
            "all_items_inspected",
            ValidationScope::Transition,
            Severity::Warning,
            ValidationCheck::AllItemsInspected,
            "Some items have not been inspected",
        )
        .when(RuleCondition::ToState(S::PendingReview)),
        ValidationRule::new(
            "attention_item_photos",
            ValidationScope::Item,
            Severity::Warning,
            ValidationCheck::ItemHasPhotos { min: 1 },
            "Items needing attention should include a photo",
        )
        .when(RuleCondition::ItemStatus(ItemStatus::NeedsAttention)),
        ValidationRule::new(
            "vehicle_identified",
            ValidationScope::Record,
            Severity::Warning,
            ValidationCheck::VehicleIdentified,
            "Vehicle has no VIN or description",
        ),
        ValidationRule::new(
            "customer_contact",
            ValidationScope::Record,
            Severity::Warning,
            ValidationCheck::CustomerContactPresent,
            "Customer has no phone number or email on file",
        ),
    ]
}

fn default_timeout_rules() -> Vec<TimeoutRule> {
    vec![
        TimeoutRule {
            state: S::PendingReview,
            threshold_minutes: AUTO_APPROVE_AFTER_MINUTES,
            auto_action: AutoAction::AutoApprove,
            notify_before_minutes: Vec::new(),
        },
        TimeoutRule {
            state: S::Approved,
            threshold_minutes: AUTO_SEND_AFTER_MINUTES,
            auto_action: AutoAction::AutoSend,
            notify_before_minutes: Vec::new(),
        },
        TimeoutRule {
            state: S::SentToCustomer,
            threshold_minutes: AUTO_COMPLETE_AFTER_MINUTES,
            auto_action: AutoAction::AutoComplete,
            notify_before_minutes: Vec::new(),
        },
    ]
}

fn default_escalation_rules() -> Vec<EscalationRule> {
    [
        (Priority::Low, 24 * 60),
        (Priority::Normal, 8 * 60),
        (Priority::High, 4 * 60),
        (Priority::Urgent, 2 * 60),
    ]
    .into_iter()
    .map(|(priority, threshold_minutes)| EscalationRule {
        priority,
        threshold_minutes,
        escalate_to_role: Role::Owner,
        escalate_to: None,
        notify_before_minutes: vec![30],
    })
    .collect()
}

fn default_notifications() -> Vec<NotificationRule> {
    let rule = |event, recipients: Vec<Recipient>, channels: Vec<Channel>, template: &str| {
        NotificationRule {
            event,
            recipients,
            channels,
            template: template.to_string(),
        }
    };
    vec![
        rule(
            NotificationEvent::ReviewRequested,
            vec![Recipient::Assignee, Recipient::Role(Role::ShopManager)],
            vec![Channel::Push, Channel::InApp],
            "review_requested",
        ),
        rule(
            NotificationEvent::ReviewApproved,
            vec![Recipient::Technician, Recipient::Role(Role::ServiceAdvisor)],
            vec![Channel::InApp],
            "review_approved",
        ),
        rule(
            NotificationEvent::ReviewRejected,
            vec![Recipient::Technician],
            vec![Channel::Push, Channel::InApp],
            "review_rejected",
        ),
        rule(
            NotificationEvent::ChangesRequested,
            vec![Recipient::Technician],
            vec![Channel::Push, Channel::InApp],
            "changes_requested",
        ),
        rule(
            NotificationEvent::ReportReady,
            vec![Recipient::Customer],
            vec![Channel::Sms, Channel::Email],
            "customer_report",
        ),
        rule(
            NotificationEvent::InspectionCompleted,
            vec![Recipient::Role(Role::ServiceAdvisor)],
            vec![Channel::InApp],
            "inspection_completed",
        ),
        rule(
            NotificationEvent::ReviewEscalated,
            vec![Recipient::Assignee, Recipient::Role(Role::Owner)],
            vec![Channel::Push, Channel::Email],
            "review_escalated",
        ),
        rule(
            NotificationEvent::EscalationWarning,
            vec![Recipient::Assignee],
            vec![Channel::Push],
            "escalation_warning",
        ),
        rule(
            NotificationEvent::TimeoutWarning,
            vec![Recipient::Role(Role::ShopManager)],
            vec![Channel::InApp],
            "timeout_warning",
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::resolver::merge;
    use crate::rules::validate::validate;
    use crate::state_machine::guards::ConditionRegistry;

    #[test]
    fn test_default_rule_set_is_valid() {
        let config = merge(&default_rule_set(), None);
        let report = validate(&config, &ConditionRegistry::with_defaults());
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn test_every_edge_has_roles() {
        for rule in default_transitions() {
            assert!(!rule.allowed_roles.is_empty(), "{} -> {}", rule.from, rule.to);
        }
    }

    #[test]
    fn test_rejection_requires_reason() {
        let rules = default_transitions();
        let reject = rules
            .iter()
            .find(|r| r.edge() == (S::PendingReview, S::Rejected))
            .unwrap();
        assert_eq!(
            reject.required_conditions,
            vec![ConditionKind::HasRejectionReason]
        );
        assert!(!reject.permits(Role::Mechanic));
    }
}
