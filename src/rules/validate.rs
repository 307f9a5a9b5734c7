//! Structural validation of an effective configuration. Runs whenever an
//! override is saved so an invalid rule set never reaches live records.

use super::effective::EffectiveConfig;
use crate::state_machine::actions::ActionPhase;
use crate::state_machine::guards::ConditionRegistry;
use crate::state_machine::states::InspectionState;
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigValidation {
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub fn validate(config: &EffectiveConfig, registry: &ConditionRegistry) -> ConfigValidation {
    let mut errors = Vec::new();
    let table = &config.transitions;

    let reachable = table.reachable_from(InspectionState::Draft);
    for state in InspectionState::ALL {
        if !reachable.contains(&state) {
            errors.push(format!("State {state} is not reachable from draft"));
        }
    }

    for rule in table.iter() {
        let edge = format!("{} -> {}", rule.from, rule.to);
        if rule.from == rule.to {
            errors.push(format!("Transition {edge} loops on itself"));
        }
        if rule.allowed_roles.is_empty() {
            errors.push(format!("Transition {edge} has no allowed roles"));
        }
        if !permitted_edge(rule.from, rule.to) {
            errors.push(format!("Transition {edge} leaves the canonical lifecycle"));
        }
        for condition in rule
            .required_conditions
            .iter()
            .chain(rule.optional_conditions.iter())
            .chain(rule.auto_triggers.iter().filter_map(|t| t.condition.as_ref()))
        {
            if !registry.is_registered(*condition) {
                errors.push(format!(
                    "Transition {edge} uses condition {condition} with no registered evaluator"
                ));
            }
        }
        for action in rule.pre_actions.iter().filter(|a| a.phase() != ActionPhase::Pre) {
            errors.push(format!("Transition {edge} runs post-action {action} before commit"));
        }
        for action in rule.post_actions.iter().filter(|a| a.phase() != ActionPhase::Post) {
            errors.push(format!("Transition {edge} runs pre-action {action} after commit"));
        }
        for check in &rule.validation_checks {
            if config.validation_rule(check).is_none() {
                errors.push(format!("Transition {edge} references unknown validation rule {check}"));
            }
        }
    }

    let mut timeout_states = HashSet::new();
    for rule in &config.timeout_rules {
        if !timeout_states.insert(rule.state) {
            errors.push(format!("Duplicate timeout rule for state {}", rule.state));
        }
        if rule.threshold_minutes == 0 {
            errors.push(format!("Timeout rule for {} has a zero threshold", rule.state));
        }
        let target = rule.auto_action.target_state();
        if table.get(rule.state, target).is_none() {
            errors.push(format!(
                "Timeout rule for {} targets {target} but no such transition exists",
                rule.state
            ));
        }
        check_offsets(
            &mut errors,
            &format!("Timeout rule for {}", rule.state),
            rule.threshold_minutes,
            &rule.notify_before_minutes,
        );
    }

    let mut priorities = HashSet::new();
    for rule in &config.escalation_rules {
        if !priorities.insert(rule.priority) {
            errors.push(format!("Duplicate escalation rule for priority {}", rule.priority));
        }
        if rule.threshold_minutes == 0 {
            errors.push(format!("Escalation rule for {} has a zero threshold", rule.priority));
        }
        check_offsets(
            &mut errors,
            &format!("Escalation rule for {}", rule.priority),
            rule.threshold_minutes,
            &rule.notify_before_minutes,
        );
    }

    let mut ids = HashSet::new();
    for rule in &config.validation_rules {
        if !ids.insert(rule.id.as_str()) {
            errors.push(format!("Duplicate validation rule id {}", rule.id));
        }
    }

    ConfigValidation { errors }
}

fn check_offsets(errors: &mut Vec<String>, label: &str, threshold: u32, offsets: &[u32]) {
    for &offset in offsets {
        if offset == 0 || offset >= threshold {
            errors.push(format!(
                "{label} has warning offset {offset} outside (0, {threshold}) minutes"
            ));
        }
    }
}

/// Edges the lifecycle allows tenants to configure
fn permitted_edge(from: InspectionState, to: InspectionState) -> bool {
    use InspectionState as S;
    match from {
        S::PendingReview => to.is_review_outcome(),
        S::Rejected | S::ChangesRequested => to == S::InProgress,
        S::Completed => false,
        _ => to != S::Draft,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::rules::defaults::default_rule_set;
    use crate::rules::resolver::merge;
    use crate::rules::types::{AutoAction, TimeoutRule, TransitionRule};
    use crate::rules::TenantOverride;
    use crate::state_machine::actions::ActionKind;
    use crate::state_machine::guards::ConditionKind;

    fn registry() -> ConditionRegistry {
        ConditionRegistry::with_defaults()
    }

    #[test]
    fn test_missing_states_are_reported() {
        let mut rules = default_rule_set();
        rules
            .transitions
            .retain(|r| r.to != InspectionState::Completed);
        rules.timeout_rules.retain(|r| r.auto_action != AutoAction::AutoComplete);
        let report = validate(&merge(&rules, None), &registry());
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e.contains("completed")));
    }

    #[test]
    fn test_edge_without_roles_is_invalid() {
        let mut rules = default_rule_set();
        rules.transitions.push(TransitionRule::new(
            InspectionState::InProgress,
            InspectionState::Draft,
            Vec::<Role>::new(),
        ));
        let report = validate(&merge(&rules, None), &registry());
        assert!(report.errors.iter().any(|e| e.contains("no allowed roles")));
        assert!(report.errors.iter().any(|e| e.contains("canonical lifecycle")));
    }

    #[test]
    fn test_zero_timeout_is_invalid() {
        let tenant = TenantOverride::new("shop-9").with_timeout_rule(TimeoutRule {
            state: InspectionState::PendingReview,
            threshold_minutes: 0,
            auto_action: AutoAction::AutoApprove,
            notify_before_minutes: vec![],
        });
        let report = validate(&merge(&default_rule_set(), Some(&tenant)), &registry());
        assert!(report.errors.iter().any(|e| e.contains("zero threshold")));
    }

    #[test]
    fn test_unregistered_condition_is_invalid() {
        let mut registry = ConditionRegistry::empty();
        registry.register(ConditionKind::HasItems, |_| true);
        let report = validate(&merge(&default_rule_set(), None), &registry);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("has_rejection_reason")));
    }

    #[test]
    fn test_unknown_validation_check_is_invalid() {
        let tenant = TenantOverride::new("shop-9").with_transition(
            TransitionRule::new(
                InspectionState::Approved,
                InspectionState::SentToCustomer,
                [Role::Mechanic],
            )
            .checks(["photo_audit"]),
        );
        let report = validate(&merge(&default_rule_set(), Some(&tenant)), &registry());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("photo_audit"));
    }

    #[test]
    fn test_action_in_wrong_phase_is_invalid() {
        let tenant = TenantOverride::new("shop-9").with_transition(
            TransitionRule::new(
                InspectionState::Approved,
                InspectionState::SentToCustomer,
                [Role::ServiceAdvisor],
            )
            .before([ActionKind::NotifyCustomerReport])
            .after([ActionKind::StampDelivery]),
        );
        let report = validate(&merge(&default_rule_set(), Some(&tenant)), &registry());
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].contains("post-action notify_customer_report before commit"));
        assert!(report.errors[1].contains("pre-action stamp_delivery after commit"));
    }
}
