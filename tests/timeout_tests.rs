//! Timeout sweep: auto-approve, auto-send and auto-complete fire only when
//! the tenant enables them and the edge's trigger conditions hold.

mod common;

use chrono::Duration;
use common::*;
use inspection_workflow::database::InMemoryWorkflowStore;
use inspection_workflow::rules::{AutoAction, BusinessRulesOverride, NotificationEvent, TimeoutRule};
use inspection_workflow::state_machine::{
    InspectionState, Priority, ReviewStatus, TransitionPayload, WorkflowEvent, WorkflowStore,
};
use inspection_workflow::TenantOverride;
use serde_json::json;
use std::sync::Arc;

/// Tenant override with auto-approve on or off and a 30 minute review
/// timeout that warns 10 minutes ahead
async fn warn_ahead_of_auto_approve(h: &TestHarness, enabled: bool) {
    h.core
        .save_override(
            TenantOverride::new(TENANT)
                .with_business_rules(BusinessRulesOverride {
                    auto_approve_enabled: Some(enabled),
                    ..Default::default()
                })
                .with_timeout_rule(TimeoutRule {
                    state: InspectionState::PendingReview,
                    threshold_minutes: 30,
                    auto_action: AutoAction::AutoApprove,
                    notify_before_minutes: vec![10],
                }),
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_auto_approve_is_off_by_default() {
    let h = TestHarness::new();
    let inspection = h.submitted(Priority::Normal).await;
    h.backdate_state(inspection.id, Duration::hours(1)).await;

    let report = h.core.run_timeout_sweep().await.unwrap();

    assert_eq!(report.candidates, 1);
    assert!(report.transitioned.is_empty());
    assert_eq!(report.skipped, 1);
    assert!(report.errors.is_empty());
    assert_eq!(h.load(inspection.id).await.state, InspectionState::PendingReview);
}

#[tokio::test]
async fn test_auto_approve_fires_as_system() {
    let h = TestHarness::new();
    h.enable_auto_actions().await;
    let inspection = h.submitted(Priority::Normal).await;
    h.backdate_state(inspection.id, Duration::minutes(45)).await;

    let report = h.core.run_timeout_sweep().await.unwrap();

    assert_eq!(report.transitioned, vec![inspection.id]);
    assert_eq!(h.load(inspection.id).await.state, InspectionState::Approved);

    let review = &h.store.workflows_for(inspection.id)[0];
    assert_eq!(review.status, ReviewStatus::Approved);
    assert_eq!(review.approved_by, None);

    let history = h.core.get_history(inspection.id).await.unwrap();
    let approval = history.last().unwrap();
    assert_eq!(approval.actor_id, None);
    assert!(approval.is_system_action());
    assert_eq!(approval.metadata["auto_action"], json!("auto_approve"));
    assert_eq!(approval.metadata["context"]["source"], json!("timeout_sweep"));
}

#[tokio::test]
async fn test_fresh_inspection_is_not_a_candidate() {
    let h = TestHarness::new();
    h.enable_auto_actions().await;
    let inspection = h.submitted(Priority::Normal).await;
    h.backdate_state(inspection.id, Duration::minutes(10)).await;

    let report = h.core.run_timeout_sweep().await.unwrap();

    assert_eq!(report.candidates, 0);
    assert_eq!(h.load(inspection.id).await.state, InspectionState::PendingReview);
}

#[tokio::test]
async fn test_started_review_suppresses_auto_approve() {
    let h = TestHarness::new();
    h.enable_auto_actions().await;
    let inspection = h.submitted(Priority::Normal).await;
    h.core.start_review(inspection.id, &manager()).await.unwrap();
    h.backdate_state(inspection.id, Duration::hours(2)).await;

    let report = h.core.run_timeout_sweep().await.unwrap();

    assert!(report.transitioned.is_empty());
    assert_eq!(report.skipped, 1);
    assert_eq!(h.load(inspection.id).await.state, InspectionState::PendingReview);

    // The reviewer can still decide
    h.core
        .attempt_transition(inspection.id, InspectionState::Approved, &manager(), TransitionPayload::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_critical_findings_block_auto_approve() {
    let h = TestHarness::new();
    h.enable_auto_actions().await;
    let inspection = h.submitted_with(critical_snapshot(), Priority::High).await;
    h.backdate_state(inspection.id, Duration::hours(1)).await;

    let report = h.core.run_timeout_sweep().await.unwrap();

    assert!(report.transitioned.is_empty());
    assert_eq!(report.skipped, 1);
    assert_eq!(h.load(inspection.id).await.state, InspectionState::PendingReview);
}

#[tokio::test]
async fn test_auto_send_then_auto_complete() {
    let h = TestHarness::new();
    h.enable_auto_actions().await;
    let inspection = h.submitted(Priority::Normal).await;
    h.core
        .attempt_transition(inspection.id, InspectionState::Approved, &manager(), TransitionPayload::new())
        .await
        .unwrap();
    h.dispatcher.clear();

    h.backdate_state(inspection.id, Duration::hours(5)).await;
    let sent = h.core.run_timeout_sweep().await.unwrap();
    assert_eq!(sent.transitioned, vec![inspection.id]);
    assert_eq!(h.load(inspection.id).await.state, InspectionState::SentToCustomer);
    assert_eq!(h.dispatcher.events(), vec![NotificationEvent::ReportReady]);

    h.backdate_state(inspection.id, Duration::days(8)).await;
    let completed = h.core.run_timeout_sweep().await.unwrap();
    assert_eq!(completed.transitioned, vec![inspection.id]);

    let stored = h.load(inspection.id).await;
    assert_eq!(stored.state, InspectionState::Completed);
    assert_eq!(stored.delivered_at, None);
}

#[tokio::test]
async fn test_auto_send_needs_reachable_customer() {
    let h = TestHarness::new();
    h.enable_auto_actions().await;
    let inspection = h
        .submitted_with(unreachable_customer_snapshot(), Priority::Normal)
        .await;
    h.core
        .attempt_transition(inspection.id, InspectionState::Approved, &manager(), TransitionPayload::new())
        .await
        .unwrap();
    h.backdate_state(inspection.id, Duration::hours(5)).await;

    let report = h.core.run_timeout_sweep().await.unwrap();

    assert!(report.transitioned.is_empty());
    assert_eq!(report.skipped, 1);
    assert_eq!(h.load(inspection.id).await.state, InspectionState::Approved);
}

#[tokio::test]
async fn test_sweep_loop_fires_auto_actions() {
    let h = TestHarness::new();
    h.enable_auto_actions().await;
    let inspection = h.submitted(Priority::Normal).await;
    h.backdate_state(inspection.id, Duration::hours(1)).await;

    let handle = h.core.spawn_sweep_loop(std::time::Duration::from_millis(20));
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    handle.shutdown().await;

    assert_eq!(h.load(inspection.id).await.state, InspectionState::Approved);
}

#[tokio::test]
async fn test_timeout_warning_sent_once_before_auto_approve() {
    let h = TestHarness::new();
    warn_ahead_of_auto_approve(&h, true).await;
    let inspection = h.submitted(Priority::Normal).await;
    h.dispatcher.clear();
    h.backdate_state(inspection.id, Duration::minutes(25)).await;

    let report = h.core.run_timeout_sweep().await.unwrap();
    assert_eq!(report.candidates, 1);
    assert_eq!(report.warnings_sent, 1);
    assert!(report.transitioned.is_empty());
    assert_eq!(h.dispatcher.events(), vec![NotificationEvent::TimeoutWarning]);

    let stored = h.load(inspection.id).await;
    assert_eq!(stored.state, InspectionState::PendingReview);
    assert!(stored.timeout_warning_sent(10));
    assert_eq!(stored.version, inspection.version);

    let again = h.core.run_timeout_sweep().await.unwrap();
    assert_eq!(again.warnings_sent, 0);
    assert_eq!(again.skipped, 1);
    assert_eq!(h.dispatcher.events().len(), 1);

    let warnings: Vec<_> = h
        .core
        .get_history(inspection.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.action == WorkflowEvent::TimeoutWarning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].actor_id, None);
    assert_eq!(warnings[0].metadata["offset_minutes"], 10);

    h.backdate_state(inspection.id, Duration::minutes(10)).await;
    let fired = h.core.run_timeout_sweep().await.unwrap();
    assert_eq!(fired.transitioned, vec![inspection.id]);

    let approved = h.load(inspection.id).await;
    assert_eq!(approved.state, InspectionState::Approved);
    assert!(approved.timeout_warnings_sent.is_empty());
}

#[tokio::test]
async fn test_no_timeout_warning_when_auto_action_disabled() {
    let h = TestHarness::new();
    warn_ahead_of_auto_approve(&h, false).await;
    let inspection = h.submitted(Priority::Normal).await;
    h.dispatcher.clear();
    h.backdate_state(inspection.id, Duration::minutes(25)).await;

    let report = h.core.run_timeout_sweep().await.unwrap();

    assert_eq!(report.warnings_sent, 0);
    assert_eq!(report.skipped, 1);
    assert!(h.dispatcher.events().is_empty());
    assert!(h.load(inspection.id).await.timeout_warnings_sent.is_empty());
}

#[tokio::test]
async fn test_failed_commit_does_not_stop_other_auto_actions() {
    let inner = Arc::new(InMemoryWorkflowStore::new());
    let faulty = Arc::new(FaultyStore::new(Arc::clone(&inner)));
    let wrapper: Arc<dyn WorkflowStore> = faulty.clone();
    let h = TestHarness::over(inner, Some(wrapper));
    h.enable_auto_actions().await;

    let broken = h.submitted(Priority::Normal).await;
    let healthy = [
        h.submitted(Priority::Normal).await,
        h.submitted(Priority::Normal).await,
    ];
    for inspection in healthy.iter().chain([&broken]) {
        h.backdate_state(inspection.id, Duration::minutes(45)).await;
    }
    faulty.fail_commits_for(broken.id);

    let report = h.core.run_timeout_sweep().await.unwrap();

    assert_eq!(report.candidates, 3);
    let mut transitioned = report.transitioned.clone();
    transitioned.sort();
    let mut expected: Vec<_> = healthy.iter().map(|i| i.id).collect();
    expected.sort();
    assert_eq!(transitioned, expected);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].record_id, Some(broken.id));
    assert_eq!(h.load(broken.id).await.state, InspectionState::PendingReview);
}
