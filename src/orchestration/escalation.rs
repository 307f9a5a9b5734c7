//! # Escalation Scheduler
//!
//! Periodic sweep over pending reviews. For each priority it selects reviews
//! that are pending, unescalated and older than the earliest point at which
//! any tenant's rule for that priority acts. Each candidate is then
//! re-checked against its own tenant's rule and either:
//!
//! - escalated (set-once, via the store's conditional update), or
//! - sent any warnings whose lead time has arrived (once per offset), or
//! - skipped.
//!
//! Records are independent units of work; a failure on one is reported in the
//! sweep result and never aborts the others.

use super::types::{run_bounded, sweep_configs, EscalationSweepReport, RecordOutcome, SweepFailure};
use crate::config::SchedulerConfig;
use crate::logging::{log_error, log_sweep};
use crate::models::WorkflowRecord;
use crate::rules::RuleResult;
use crate::state_machine::states::Priority;
use crate::state_machine::TransitionEngine;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct EscalationScheduler {
    engine: Arc<TransitionEngine>,
    settings: SchedulerConfig,
}

impl EscalationScheduler {
    pub fn new(engine: Arc<TransitionEngine>, settings: SchedulerConfig) -> Self {
        Self { engine, settings }
    }

    pub async fn run_escalation_sweep(&self) -> RuleResult<EscalationSweepReport> {
        self.run_escalation_sweep_at(Utc::now()).await
    }

    /// Run one sweep as of `now`
    #[instrument(skip(self))]
    pub async fn run_escalation_sweep_at(&self, now: DateTime<Utc>) -> RuleResult<EscalationSweepReport> {
        let started = Instant::now();
        let configs = sweep_configs(self.engine.resolver()).await?;
        let mut report = EscalationSweepReport::default();

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for priority in Priority::ALL {
            let Some(earliest) = configs
                .iter()
                .filter_map(|config| config.escalation_rule(priority))
                .map(|rule| rule.earliest_lead())
                .min()
            else {
                continue;
            };
            match self.engine.store().find_overdue(priority, now - earliest).await {
                Ok(records) => candidates.extend(
                    records
                        .into_iter()
                        .filter(|record| seen.insert(record.id))
                        .map(|record| (record.id, record)),
                ),
                Err(e) => {
                    let error = format!("overdue query for {priority}: {e}");
                    log_error("escalation_sweep", "find_overdue", &error, None);
                    report.errors.push(SweepFailure { record_id: None, error });
                }
            }
        }
        report.candidates = candidates.len();

        let outcomes = run_bounded(candidates, &self.settings, |record| self.process(record, now)).await;
        for outcome in outcomes {
            report.record(outcome);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        log_sweep(
            "escalation",
            report.candidates,
            report.escalated.len(),
            report.skipped,
            report.errors.len(),
            report.duration_ms,
        );
        Ok(report)
    }

    async fn process(&self, record: WorkflowRecord, now: DateTime<Utc>) -> RecordOutcome {
        let config = match self.engine.resolver().resolve(&record.tenant_id).await {
            Ok(config) => config,
            Err(e) => return RecordOutcome::failed(record.id, e),
        };
        let Some(rule) = config.escalation_rule(record.priority) else {
            return RecordOutcome::Skipped;
        };

        if record.is_overdue(rule.threshold(), now) {
            return match self.engine.escalate(&record, rule, &config, now).await {
                Ok(Some(escalated)) => RecordOutcome::Fired(escalated.id),
                Ok(None) => RecordOutcome::Skipped,
                Err(e) => RecordOutcome::failed(record.id, e),
            };
        }

        let mut sent = 0;
        for &offset in &rule.notify_before_minutes {
            let due_at = record.submitted_at + rule.threshold() - Duration::minutes(i64::from(offset));
            if due_at > now || record.warning_sent(offset) {
                continue;
            }
            match self
                .engine
                .warn_before_escalation(&record, rule, offset, &config, now)
                .await
            {
                Ok(true) => sent += 1,
                Ok(false) => {}
                Err(e) => return RecordOutcome::failed(record.id, e),
            }
        }

        if sent > 0 {
            RecordOutcome::Warned(sent)
        } else {
            RecordOutcome::Skipped
        }
    }
}
