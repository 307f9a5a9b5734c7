//! Shared fixtures for integration tests: a core over in-memory stores with
//! handles kept to the pieces tests inspect directly, plus principals and
//! inspection snapshots that satisfy the default submission checks.

#![allow(dead_code)]

use chrono::Duration;
use inspection_workflow::database::InMemoryWorkflowStore;
use inspection_workflow::events::RecordingDispatcher;
use inspection_workflow::models::{
    CustomerContact, Inspection, InspectionItem, InspectionSnapshot, ItemStatus, Principal, Role,
    VehicleInfo,
};
use inspection_workflow::rules::{BusinessRulesOverride, InMemoryRuleStore, TenantOverride};
use inspection_workflow::state_machine::{InspectionState, Priority, TransitionPayload, WorkflowStore};
use inspection_workflow::{EngineConfig, TransitionError, WorkflowCore, WorkflowError};
use std::sync::Arc;
use uuid::Uuid;

pub const TENANT: &str = "shop-1";
pub const OTHER_TENANT: &str = "shop-2";

pub fn mechanic() -> Principal {
    Principal::new("tech-1", Role::Mechanic, TENANT)
}

pub fn advisor() -> Principal {
    Principal::new("advisor-1", Role::ServiceAdvisor, TENANT)
}

pub fn manager() -> Principal {
    Principal::new("mgr-1", Role::ShopManager, TENANT)
}

pub fn second_manager() -> Principal {
    Principal::new("mgr-2", Role::ShopManager, TENANT)
}

pub fn owner() -> Principal {
    Principal::new("owner-1", Role::Owner, TENANT)
}

/// Core plus direct handles to its stores and dispatcher
pub struct TestHarness {
    pub core: WorkflowCore,
    pub store: Arc<InMemoryWorkflowStore>,
    pub rules: Arc<InMemoryRuleStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::over(Arc::new(InMemoryWorkflowStore::new()), None)
    }

    /// Harness whose engine commits through `wrapper` instead of `store`
    /// directly; `store` stays reachable for seeding and inspection.
    pub fn over(store: Arc<InMemoryWorkflowStore>, wrapper: Option<Arc<dyn WorkflowStore>>) -> Self {
        let rules = Arc::new(InMemoryRuleStore::default());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let engine_store = match wrapper {
            Some(wrapper) => wrapper,
            None => Arc::clone(&store) as Arc<dyn WorkflowStore>,
        };
        let core = WorkflowCore::with_stores(
            EngineConfig::default(),
            engine_store,
            rules.clone(),
            dispatcher.clone(),
        );
        Self {
            core,
            store,
            rules,
            dispatcher,
        }
    }

    /// Save a tenant override that only changes business rules
    pub async fn set_business_rules(&self, rules: BusinessRulesOverride) {
        self.core
            .save_override(TenantOverride::new(TENANT).with_business_rules(rules))
            .await
            .expect("business rules override should be valid");
    }

    pub async fn enable_auto_actions(&self) {
        self.set_business_rules(BusinessRulesOverride {
            auto_approve_enabled: Some(true),
            auto_send_enabled: Some(true),
            ..Default::default()
        })
        .await;
    }

    /// New draft inspection carrying `snapshot`
    pub async fn create(&self, snapshot: InspectionSnapshot) -> Inspection {
        self.core
            .create_inspection(Inspection::new(TENANT, Some("tech-1".to_string())).with_snapshot(snapshot))
            .await
            .expect("create inspection")
    }

    /// Inspection moved through draft and in-progress into pending review
    pub async fn submitted(&self, priority: Priority) -> Inspection {
        self.submitted_with(ready_snapshot(), priority).await
    }

    pub async fn submitted_with(&self, snapshot: InspectionSnapshot, priority: Priority) -> Inspection {
        let inspection = self.create(snapshot).await;
        self.core
            .attempt_transition(inspection.id, InspectionState::InProgress, &mechanic(), TransitionPayload::new())
            .await
            .expect("start inspection");
        self.core
            .attempt_transition(
                inspection.id,
                InspectionState::PendingReview,
                &mechanic(),
                TransitionPayload::new().with_priority(priority),
            )
            .await
            .expect("submit for review")
            .inspection
    }

    pub async fn load(&self, subject_id: Uuid) -> Inspection {
        self.store
            .load_inspection(subject_id)
            .await
            .expect("load inspection")
            .expect("inspection exists")
    }

    /// Pretend the inspection entered its current state `age` ago
    pub async fn backdate_state(&self, subject_id: Uuid, age: Duration) {
        let mut inspection = self.load(subject_id).await;
        inspection.state_entered_at = inspection.state_entered_at - age;
        self.store
            .insert_inspection(&inspection)
            .await
            .expect("rewrite inspection");
    }

    pub fn pending_reviews(&self, subject_id: Uuid) -> usize {
        self.store
            .workflows_for(subject_id)
            .iter()
            .filter(|w| w.is_pending())
            .count()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Findings that pass every blocking submission check and raise no warnings
pub fn ready_snapshot() -> InspectionSnapshot {
    InspectionSnapshot {
        items: vec![
            InspectionItem::new("brake-front", "brakes", ItemStatus::Ok),
            InspectionItem::new("brake-rear", "brakes", ItemStatus::NeedsAttention)
                .with_photos(1)
                .with_notes("rear pads at 3mm")
                .with_estimate(18_000),
            InspectionItem::new("tire-fl", "tires", ItemStatus::Ok),
            InspectionItem::new("tire-fr", "tires", ItemStatus::Ok),
            InspectionItem::new("wipers", "visibility", ItemStatus::Ok),
        ],
        vehicle: Some(VehicleInfo {
            vin: Some("1HGCM82633A004352".to_string()),
            description: Some("2019 Honda Civic".to_string()),
            mileage: Some(48_210),
        }),
        customer: Some(CustomerContact {
            name: Some("Dana Ortiz".to_string()),
            phone: Some("555-0142".to_string()),
            email: Some("dana@example.com".to_string()),
        }),
    }
}

/// Ready findings plus one documented safety-critical item
pub fn critical_snapshot() -> InspectionSnapshot {
    let mut snapshot = ready_snapshot();
    snapshot.items.push(
        InspectionItem::new("tire-rl", "tires", ItemStatus::Critical)
            .with_photos(2)
            .with_notes("sidewall bulge")
            .with_estimate(24_000),
    );
    snapshot
}

/// Ready findings with the customer unreachable
pub fn unreachable_customer_snapshot() -> InspectionSnapshot {
    InspectionSnapshot {
        customer: Some(CustomerContact {
            name: Some("Dana Ortiz".to_string()),
            phone: None,
            email: None,
        }),
        ..ready_snapshot()
    }
}

/// Unwrap the engine refusal from a facade result
pub fn refusal<T: std::fmt::Debug>(result: inspection_workflow::Result<T>) -> TransitionError {
    match result {
        Err(WorkflowError::Transition(e)) => e,
        other => panic!("expected a transition refusal, got {other:?}"),
    }
}
