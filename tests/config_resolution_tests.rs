//! Tenant overrides: validation before save, versioning, merge semantics
//! and their effect on live transitions.

mod common;

use common::*;
use inspection_workflow::config::ConfigLoader;
use inspection_workflow::models::{InspectionItem, InspectionSnapshot, ItemStatus, Role};
use inspection_workflow::rules::{BusinessRulesOverride, RuleError, RuleStore, TransitionRule};
use inspection_workflow::state_machine::{InspectionState, Priority, TransitionError, TransitionPayload};
use inspection_workflow::validation::{
    RuleCondition, Severity, ValidationCheck, ValidationRule, ValidationScope,
};
use inspection_workflow::{EngineConfig, TenantOverride, WorkflowCore, WorkflowError};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

#[tokio::test]
async fn test_override_versions_accumulate() {
    let h = TestHarness::new();
    h.set_business_rules(BusinessRulesOverride {
        min_items_for_review: Some(8),
        ..Default::default()
    })
    .await;
    h.set_business_rules(BusinessRulesOverride {
        min_items_for_review: Some(6),
        default_priority: Some(Priority::High),
        ..Default::default()
    })
    .await;

    let versions: Vec<u64> = h
        .rules
        .override_history(TENANT)
        .await
        .unwrap()
        .iter()
        .map(|o| o.version)
        .collect();
    assert_eq!(versions, vec![1, 2]);

    let config = h.core.resolve_config(TENANT).await.unwrap();
    assert_eq!(config.override_version, Some(2));
    assert_eq!(config.business_rules.min_items_for_review, 6);
    assert_eq!(config.business_rules.default_priority, Priority::High);
    assert_eq!(config.business_rules.required_categories, vec!["brakes", "tires"]);
}

#[tokio::test]
async fn test_override_is_scoped_to_its_tenant() {
    let h = TestHarness::new();
    h.enable_auto_actions().await;

    assert!(h.core.resolve_config(TENANT).await.unwrap().business_rules.auto_approve_enabled);
    let other = h.core.resolve_config(OTHER_TENANT).await.unwrap();
    assert!(!other.business_rules.auto_approve_enabled);
    assert!(other.is_default());
}

#[tokio::test]
async fn test_invalid_override_is_refused_and_not_stored() {
    let h = TestHarness::new();
    let fragment = TenantOverride::new(TENANT).with_transition(TransitionRule::new(
        InspectionState::Completed,
        InspectionState::Draft,
        [Role::Owner],
    ));

    let report = h.core.validate_override(&fragment).await.unwrap();
    assert!(!report.is_valid());
    assert!(report
        .errors
        .iter()
        .any(|e| e.contains("completed -> draft")));

    let err = h.core.save_override(fragment).await.unwrap_err();
    let WorkflowError::Rules(RuleError::ConfigInvalid { tenant_id, errors }) = err else {
        panic!("expected an invalid configuration");
    };
    assert_eq!(tenant_id, TENANT);
    assert_eq!(errors, report.errors);
    assert!(h.rules.override_history(TENANT).await.unwrap().is_empty());
    assert!(h.core.resolve_config(TENANT).await.unwrap().is_default());
}

#[tokio::test]
async fn test_extra_transition_widens_roles() {
    let h = TestHarness::new();
    h.core
        .save_override(TenantOverride::new(TENANT).with_transition(TransitionRule::new(
            InspectionState::PendingReview,
            InspectionState::Approved,
            [Role::ServiceAdvisor],
        )))
        .await
        .unwrap();
    let inspection = h.submitted(Priority::Normal).await;

    let outcome = h
        .core
        .attempt_transition(inspection.id, InspectionState::Approved, &advisor(), TransitionPayload::new())
        .await
        .unwrap();
    assert_eq!(outcome.inspection.state, InspectionState::Approved);
}

#[tokio::test]
async fn test_custom_rule_replaces_default_by_id() {
    let h = TestHarness::new();
    h.core
        .save_override(
            TenantOverride::new(TENANT).with_validation_rule(
                ValidationRule::new(
                    "minimum_items",
                    ValidationScope::Transition,
                    Severity::Error,
                    ValidationCheck::MinimumItemCount { min: Some(3) },
                    "Quick inspections need three items",
                )
                .when(RuleCondition::ToState(InspectionState::PendingReview)),
            ),
        )
        .await
        .unwrap();

    let snapshot = InspectionSnapshot {
        items: vec![
            InspectionItem::new("brake-front", "brakes", ItemStatus::Ok),
            InspectionItem::new("tire-fl", "tires", ItemStatus::Ok),
            InspectionItem::new("battery", "electrical", ItemStatus::Ok),
        ],
        ..ready_snapshot()
    };
    let inspection = h.submitted_with(snapshot, Priority::Normal).await;
    assert_eq!(inspection.state, InspectionState::PendingReview);

    let config = h.core.resolve_config(TENANT).await.unwrap();
    assert_eq!(
        config
            .validation_rules
            .iter()
            .filter(|r| r.id == "minimum_items")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_custom_item_rule_blocks_submission() {
    let h = TestHarness::new();
    let mut rule = ValidationRule::new(
        "critical_estimate",
        ValidationScope::Transition,
        Severity::Error,
        ValidationCheck::ItemHasEstimate,
        "Critical items need a repair estimate",
    )
    .when(RuleCondition::ToState(InspectionState::PendingReview));
    rule.conditions.push(RuleCondition::ItemStatus(ItemStatus::Critical));
    h.core
        .save_override(TenantOverride::new(TENANT).with_validation_rule(rule))
        .await
        .unwrap();

    let mut snapshot = critical_snapshot();
    if let Some(item) = snapshot.items.iter_mut().find(|i| i.status == ItemStatus::Critical) {
        item.estimated_cost_cents = None;
    }
    let inspection = h.create(snapshot).await;
    h.core
        .attempt_transition(inspection.id, InspectionState::InProgress, &mechanic(), TransitionPayload::new())
        .await
        .unwrap();

    let err = refusal(
        h.core
            .attempt_transition(inspection.id, InspectionState::PendingReview, &mechanic(), TransitionPayload::new())
            .await,
    );
    let TransitionError::ValidationFailed { violations } = err else {
        panic!("expected validation failure");
    };
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule_id, "critical_estimate");
    assert_eq!(violations[0].item_id.as_deref(), Some("tire-rl"));
}

#[tokio::test]
async fn test_core_boots_from_config_file() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("workflow.toml"),
        "[scheduler]\nsweep_interval_seconds = 15\nmax_concurrent_records = 2\n\n[rules]\ncache_enabled = false\n",
    )
    .unwrap();

    let config = ConfigLoader::load_from(dir.path(), "test").unwrap();
    assert_eq!(config.database.url, None);

    let core = WorkflowCore::from_config(config).await.unwrap();
    assert_eq!(core.config().scheduler.max_concurrent_records, 2);
    assert!(!core.config().rules.cache_enabled);

    // Uncached resolution still yields one config per call
    let first = core.resolve_config(TENANT).await.unwrap();
    let second = core.resolve_config(TENANT).await.unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_invalid_engine_config_is_refused() {
    let mut config = EngineConfig::default();
    config.scheduler.max_concurrent_records = 0;

    let err = WorkflowCore::from_config(config).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Configuration(_)));
}
