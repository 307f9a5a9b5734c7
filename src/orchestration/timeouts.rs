//! # Timeout Sweep
//!
//! Fires state-keyed auto-actions (auto-approve, auto-send, auto-complete)
//! for inspections that have sat in a state past their tenant's threshold.
//! Every firing goes through [`TransitionEngine::attempt_transition`] as the
//! tenant's system principal, so the same role, condition, trigger and
//! version checks apply as for a manual request. A subject the engine finds
//! ineligible (trigger disabled, condition unmet, review in progress, moved
//! concurrently) is skipped rather than reported as an error.
//!
//! Before the threshold, a rule's `notify_before_minutes` offsets send a
//! timeout warning once each per stay in the state, and only while the
//! tenant's business rules allow the auto-action at all.

use super::types::{run_bounded, sweep_configs, RecordOutcome, SweepFailure, TimeoutSweepReport};
use crate::config::SchedulerConfig;
use crate::logging::{log_error, log_sweep};
use crate::models::{Inspection, Principal};
use crate::rules::RuleResult;
use crate::state_machine::context::TransitionPayload;
use crate::state_machine::errors::TransitionError;
use crate::state_machine::states::InspectionState;
use crate::state_machine::TransitionEngine;
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

#[derive(Debug, Clone)]
pub struct TimeoutScheduler {
    engine: Arc<TransitionEngine>,
    settings: SchedulerConfig,
}

impl TimeoutScheduler {
    pub fn new(engine: Arc<TransitionEngine>, settings: SchedulerConfig) -> Self {
        Self { engine, settings }
    }

    pub async fn run_timeout_sweep(&self) -> RuleResult<TimeoutSweepReport> {
        self.run_timeout_sweep_at(Utc::now()).await
    }

    /// Select candidates as of `now`. Trigger delays are re-checked by the
    /// engine against the wall clock at commit time.
    #[instrument(skip(self))]
    pub async fn run_timeout_sweep_at(&self, now: DateTime<Utc>) -> RuleResult<TimeoutSweepReport> {
        let started = Instant::now();
        let configs = sweep_configs(self.engine.resolver()).await?;
        let mut report = TimeoutSweepReport::default();

        let mut candidates = Vec::new();
        for state in InspectionState::ALL {
            let Some(shortest) = configs
                .iter()
                .filter_map(|config| config.timeout_rule(state))
                .map(|rule| rule.earliest_lead())
                .min()
            else {
                continue;
            };
            match self.engine.store().find_in_state(state, now - shortest).await {
                Ok(found) => candidates.extend(found.into_iter().map(|i| (i.id, i))),
                Err(e) => {
                    let error = format!("stale subject query for {state}: {e}");
                    log_error("timeout_sweep", "find_in_state", &error, None);
                    report.errors.push(SweepFailure { record_id: None, error });
                }
            }
        }
        report.candidates = candidates.len();

        let outcomes = run_bounded(candidates, &self.settings, |inspection| self.process(inspection, now)).await;
        for outcome in outcomes {
            report.record(outcome);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        log_sweep(
            "timeout",
            report.candidates,
            report.transitioned.len(),
            report.skipped,
            report.errors.len(),
            report.duration_ms,
        );
        Ok(report)
    }

    async fn process(&self, inspection: Inspection, now: DateTime<Utc>) -> RecordOutcome {
        let config = match self.engine.resolver().resolve(&inspection.tenant_id).await {
            Ok(config) => config,
            Err(e) => return RecordOutcome::failed(inspection.id, e),
        };
        let Some(rule) = config.timeout_rule(inspection.state) else {
            return RecordOutcome::Skipped;
        };
        if inspection.state_entered_at + rule.threshold() > now {
            if !config.business_rules.allows(rule.auto_action) {
                return RecordOutcome::Skipped;
            }
            let mut sent = 0;
            for &offset in &rule.notify_before_minutes {
                let due_at = inspection.state_entered_at + rule.threshold() - Duration::minutes(i64::from(offset));
                if due_at > now || inspection.timeout_warning_sent(offset) {
                    continue;
                }
                match self
                    .engine
                    .warn_before_timeout(&inspection, rule, offset, &config, now)
                    .await
                {
                    Ok(true) => sent += 1,
                    Ok(false) => {}
                    Err(e) => return RecordOutcome::failed(inspection.id, e),
                }
            }
            return if sent > 0 {
                RecordOutcome::Warned(sent)
            } else {
                RecordOutcome::Skipped
            };
        }

        let payload = TransitionPayload::new()
            .with_auto_action(rule.auto_action)
            .with_metadata(json!({
                "source": "timeout_sweep",
                "threshold_minutes": rule.threshold_minutes,
            }));
        let principal = Principal::system(inspection.tenant_id.clone());
        match self
            .engine
            .attempt_transition(inspection.id, rule.auto_action.target_state(), &principal, payload)
            .await
        {
            Ok(outcome) => RecordOutcome::Fired(outcome.inspection.id),
            Err(e) if is_ineligible(&e) => {
                debug!(subject_id = %inspection.id, reason = %e, "Auto-action not taken");
                RecordOutcome::Skipped
            }
            Err(e) => RecordOutcome::failed(inspection.id, e),
        }
    }
}

/// Refusals that mean "not now" rather than a fault
fn is_ineligible(error: &TransitionError) -> bool {
    matches!(
        error,
        TransitionError::AutoTriggerNotEligible { .. }
            | TransitionError::PreconditionFailed { .. }
            | TransitionError::ConcurrentModification { .. }
            | TransitionError::InvalidTransition { .. }
            | TransitionError::Archived { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::guards::ConditionKind;

    #[test]
    fn test_ineligible_refusals_are_skips() {
        assert!(is_ineligible(&TransitionError::AutoTriggerNotEligible {
            reason: "delay".to_string()
        }));
        assert!(is_ineligible(&TransitionError::PreconditionFailed {
            condition: ConditionKind::HasCustomerContact
        }));
        assert!(!is_ineligible(&TransitionError::ValidationFailed { violations: vec![] }));
    }
}
