//! # Workflow Core
//!
//! Single entry point that wires stores, the config resolver, the transition
//! engine, both sweeps and the event publisher from one [`EngineConfig`].
//!
//! - [`WorkflowCore::from_config`] connects to Postgres when a database URL
//!   is configured and falls back to in-memory stores otherwise
//! - [`WorkflowCore::with_stores`] takes caller-supplied stores and dispatcher
//! - [`WorkflowCore::spawn_sweep_loop`] runs both sweeps on a fixed interval
//!   until its handle is shut down

use super::escalation::EscalationScheduler;
use super::timeouts::TimeoutScheduler;
use super::types::{EscalationSweepReport, TimeoutSweepReport};
use crate::audit::AuditTrail;
use crate::config::EngineConfig;
use crate::database::{DatabaseConnection, InMemoryWorkflowStore, PgRuleStore, PgWorkflowStore};
use crate::error::Result;
use crate::events::{EventPublisher, NoopDispatcher, NotificationDispatcher, PublishedEvent};
use crate::models::{HistoryEntry, Inspection, InspectionSnapshot, Principal, WorkflowRecord};
use crate::rules::{ConfigResolver, ConfigValidation, EffectiveConfig, InMemoryRuleStore, RuleStore, TenantOverride};
use crate::state_machine::context::TransitionPayload;
use crate::state_machine::guards::ConditionRegistry;
use crate::state_machine::persistence::WorkflowStore;
use crate::state_machine::states::InspectionState;
use crate::state_machine::{TransitionEngine, TransitionOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub struct WorkflowCore {
    engine: Arc<TransitionEngine>,
    resolver: Arc<ConfigResolver>,
    escalations: EscalationScheduler,
    timeouts: TimeoutScheduler,
    publisher: EventPublisher,
    audit: AuditTrail,
    config: EngineConfig,
}

impl std::fmt::Debug for WorkflowCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCore")
            .field("engine", &self.engine)
            .field("scheduler", &self.config.scheduler)
            .finish()
    }
}

impl WorkflowCore {
    /// Bootstrap from configuration
    pub async fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let Some(url) = config.database.url.clone() else {
            info!("No database configured, using in-memory stores");
            return Ok(Self::in_memory(config));
        };

        let connection = DatabaseConnection::connect(&url, &config.database).await?;
        let pool = connection.pool().clone();
        Ok(Self::with_stores(
            config,
            Arc::new(PgWorkflowStore::new(pool.clone())),
            Arc::new(PgRuleStore::new(pool)),
            Arc::new(NoopDispatcher),
        ))
    }

    /// In-memory stores with the built-in rule set and no notification delivery
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::with_stores(
            config,
            Arc::new(InMemoryWorkflowStore::new()),
            Arc::new(InMemoryRuleStore::default()),
            Arc::new(NoopDispatcher),
        )
    }

    pub fn with_stores(
        config: EngineConfig,
        store: Arc<dyn WorkflowStore>,
        rules: Arc<dyn RuleStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let registry = Arc::new(ConditionRegistry::with_defaults());
        let resolver = Arc::new(ConfigResolver::new(rules, registry, config.rules.cache_enabled));
        let publisher = EventPublisher::new(config.events.channel_capacity);
        let audit = AuditTrail::new(Arc::clone(&store));
        let engine = Arc::new(TransitionEngine::new(
            store,
            Arc::clone(&resolver),
            dispatcher,
            publisher.clone(),
        ));

        info!(
            sweep_interval_seconds = config.scheduler.sweep_interval_seconds,
            max_concurrent_records = config.scheduler.max_concurrent_records,
            cache_enabled = config.rules.cache_enabled,
            "Workflow core initialized"
        );

        Self {
            escalations: EscalationScheduler::new(Arc::clone(&engine), config.scheduler.clone()),
            timeouts: TimeoutScheduler::new(Arc::clone(&engine), config.scheduler.clone()),
            engine,
            resolver,
            publisher,
            audit,
            config,
        }
    }

    pub fn engine(&self) -> &Arc<TransitionEngine> {
        &self.engine
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.publisher.subscribe()
    }

    /// Store a new draft inspection
    pub async fn create_inspection(&self, inspection: Inspection) -> Result<Inspection> {
        self.engine.store().insert_inspection(&inspection).await?;
        info!(subject_id = %inspection.id, tenant_id = %inspection.tenant_id, "Created inspection");
        Ok(inspection)
    }

    pub async fn attempt_transition(
        &self,
        subject_id: Uuid,
        to: InspectionState,
        principal: &Principal,
        payload: TransitionPayload,
    ) -> Result<TransitionOutcome> {
        Ok(self
            .engine
            .attempt_transition(subject_id, to, principal, payload)
            .await?)
    }

    pub async fn start_review(&self, subject_id: Uuid, principal: &Principal) -> Result<WorkflowRecord> {
        Ok(self.engine.start_review(subject_id, principal).await?)
    }

    pub async fn record_findings(
        &self,
        subject_id: Uuid,
        principal: &Principal,
        snapshot: InspectionSnapshot,
    ) -> Result<Inspection> {
        Ok(self.engine.record_findings(subject_id, principal, snapshot).await?)
    }

    pub async fn archive_subject(&self, subject_id: Uuid, principal: &Principal) -> Result<Inspection> {
        Ok(self.engine.archive_subject(subject_id, principal).await?)
    }

    pub async fn get_history(&self, subject_id: Uuid) -> Result<Vec<HistoryEntry>> {
        Ok(self.engine.history(subject_id).await?)
    }

    /// History of one review, across its escalation and warnings
    pub async fn get_workflow_history(&self, workflow_id: Uuid) -> Result<Vec<HistoryEntry>> {
        Ok(self.audit.workflow_history(workflow_id).await?)
    }

    pub async fn resolve_config(&self, tenant_id: &str) -> Result<Arc<EffectiveConfig>> {
        Ok(self.resolver.resolve(tenant_id).await?)
    }

    pub async fn validate_override(&self, fragment: &TenantOverride) -> Result<ConfigValidation> {
        Ok(self.resolver.validate_override(fragment).await?)
    }

    pub async fn save_override(&self, fragment: TenantOverride) -> Result<TenantOverride> {
        Ok(self.resolver.save_override(fragment).await?)
    }

    pub async fn run_escalation_sweep(&self) -> Result<EscalationSweepReport> {
        Ok(self.escalations.run_escalation_sweep().await?)
    }

    pub async fn run_escalation_sweep_at(&self, now: chrono::DateTime<chrono::Utc>) -> Result<EscalationSweepReport> {
        Ok(self.escalations.run_escalation_sweep_at(now).await?)
    }

    pub async fn run_timeout_sweep(&self) -> Result<TimeoutSweepReport> {
        Ok(self.timeouts.run_timeout_sweep().await?)
    }

    /// Run both sweeps every `interval` on a background task
    #[instrument(skip(self))]
    pub fn spawn_sweep_loop(&self, interval: Duration) -> SweepLoopHandle {
        let (shutdown, mut stop) = watch::channel(false);
        let escalations = self.escalations.clone();
        let timeouts = self.timeouts.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = escalations.run_escalation_sweep().await {
                            warn!(error = %e, "Escalation sweep failed");
                        }
                        if let Err(e) = timeouts.run_timeout_sweep().await {
                            warn!(error = %e, "Timeout sweep failed");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Sweep loop stopped");
        });

        SweepLoopHandle { shutdown, handle }
    }
}

/// Handle to a running sweep loop
#[derive(Debug)]
pub struct SweepLoopHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweepLoopHandle {
    /// Stop after the sweep in progress, if any, completes
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Sweep loop task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
