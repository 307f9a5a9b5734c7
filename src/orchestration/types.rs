//! Shared sweep plumbing: reports, per-record outcomes and the bounded
//! runner both sweeps use.

use crate::config::SchedulerConfig;
use crate::logging::log_error;
use crate::rules::{ConfigResolver, EffectiveConfig, RuleResult};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

/// One record that failed during a sweep
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepFailure {
    /// `None` when the candidate query itself failed
    pub record_id: Option<Uuid>,
    pub error: String,
}

/// Result of one escalation sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct EscalationSweepReport {
    pub candidates: usize,
    /// Reviews escalated by this sweep
    pub escalated: Vec<Uuid>,
    pub warnings_sent: usize,
    /// Not yet due, already handled elsewhere, or timed out
    pub skipped: usize,
    pub errors: Vec<SweepFailure>,
    pub duration_ms: u64,
}

/// Result of one timeout sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct TimeoutSweepReport {
    pub candidates: usize,
    /// Inspections moved by an auto-action
    pub transitioned: Vec<Uuid>,
    /// Timeout warnings sent ahead of an auto-action
    pub warnings_sent: usize,
    pub skipped: usize,
    pub errors: Vec<SweepFailure>,
    pub duration_ms: u64,
}

#[derive(Debug)]
pub(crate) enum RecordOutcome {
    Fired(Uuid),
    Warned(usize),
    Skipped,
    Failed(SweepFailure),
}

impl RecordOutcome {
    pub(crate) fn failed(record_id: Uuid, error: impl ToString) -> Self {
        let error = error.to_string();
        log_error("sweep", "process_record", &error, Some(&record_id.to_string()));
        Self::Failed(SweepFailure {
            record_id: Some(record_id),
            error,
        })
    }
}

impl EscalationSweepReport {
    pub(crate) fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Fired(id) => self.escalated.push(id),
            RecordOutcome::Warned(count) => self.warnings_sent += count,
            RecordOutcome::Skipped => self.skipped += 1,
            RecordOutcome::Failed(failure) => self.errors.push(failure),
        }
    }
}

impl TimeoutSweepReport {
    pub(crate) fn record(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Fired(id) => self.transitioned.push(id),
            RecordOutcome::Warned(count) => self.warnings_sent += count,
            RecordOutcome::Skipped => self.skipped += 1,
            RecordOutcome::Failed(failure) => self.errors.push(failure),
        }
    }
}

/// Process `records` with at most `max_concurrent_records` in flight. A
/// record exceeding the per-record timeout is skipped; its own store writes
/// are all-or-nothing, so it is simply picked up again next sweep.
pub(crate) async fn run_bounded<T, F, Fut>(
    records: Vec<(Uuid, T)>,
    settings: &SchedulerConfig,
    work: F,
) -> Vec<RecordOutcome>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = RecordOutcome>,
{
    let limit = settings.per_record_timeout();
    stream::iter(records)
        .map(|(record_id, record)| {
            let unit = work(record);
            async move {
                match timeout(limit, unit).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        warn!(record_id = %record_id, "Sweep record timed out, retrying next sweep");
                        RecordOutcome::Skipped
                    }
                }
            }
        })
        .buffer_unordered(settings.max_concurrent_records.max(1))
        .collect()
        .await
}

/// Defaults plus every tenant override, for computing the widest candidate
/// window. A tenant whose configuration cannot be resolved is left out and
/// its records are re-checked individually.
pub(crate) async fn sweep_configs(resolver: &ConfigResolver) -> RuleResult<Vec<Arc<EffectiveConfig>>> {
    let mut configs = vec![Arc::new(resolver.resolve_default().await?)];
    for tenant_id in resolver.tenants_with_overrides().await? {
        match resolver.resolve(&tenant_id).await {
            Ok(config) => configs.push(config),
            Err(e) => warn!(tenant_id = %tenant_id, error = %e, "Skipping tenant configuration in sweep"),
        }
    }
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_slow_record_is_skipped() {
        let settings = SchedulerConfig {
            sweep_interval_seconds: 60,
            max_concurrent_records: 2,
            per_record_timeout_ms: 20,
        };
        let fast = Uuid::new_v4();
        let slow = Uuid::new_v4();
        let outcomes = run_bounded(vec![(fast, 0u64), (slow, 500u64)], &settings, |delay_ms| async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            RecordOutcome::Fired(if delay_ms == 0 { fast } else { slow })
        })
        .await;

        let mut report = EscalationSweepReport::default();
        for outcome in outcomes {
            report.record(outcome);
        }
        assert_eq!(report.escalated, vec![fast]);
        assert_eq!(report.skipped, 1);
    }
}
