//! # Transition Engine
//!
//! Drives an inspection along one edge of its tenant's rule table:
//!
//! 1. Load the subject and resolve the tenant's effective configuration
//! 2. Look up the `(current, target)` edge, else `InvalidTransition`
//! 3. Authorize the acting role, else `Forbidden`; a second submission while
//!    a review is pending is refused here with `AlreadyPending`
//! 4. Evaluate required conditions, else `PreconditionFailed`
//! 5. Run transition-scope validation; errors block, warnings are returned
//! 6. Commit subject, review and history together, guarded by the version read in step 1
//! 7. Signal post-actions and publish the lifecycle event
//!
//! Step 6 is where concurrent attempts on the same subject are linearized:
//! the store refuses the commit if the subject moved since it was read, and
//! the caller receives `ConcurrentModification`.

use super::actions::{apply_pre_actions, ActionPhase};
use super::context::TransitionPayload;
use super::errors::{TransitionError, TransitionResult};
use super::events::WorkflowEvent;
use super::guards::{ConditionContext, ConditionKind, ConditionRegistry};
use super::persistence::{
    EscalationUpdate, ReviewResolution, TransitionCommit, WorkflowStore, WorkflowWrite,
};
use super::states::{InspectionState, Priority, ReviewStatus};
use crate::audit;
use crate::events::notification::{dispatch_all, Notification, NotificationDispatcher};
use crate::events::EventPublisher;
use crate::logging::log_transition;
use crate::models::{HistoryEntry, Inspection, InspectionSnapshot, Principal, Role, WorkflowRecord};
use crate::rules::types::{AutoAction, EscalationRule, NotificationEvent, TimeoutRule, TransitionRule};
use crate::rules::{ConfigResolver, EffectiveConfig};
use crate::validation::{self, ValidationContext, ValidationScope, Violation};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Roles that may archive a completed inspection
const ARCHIVE_ROLES: [Role; 4] = [Role::ShopManager, Role::Owner, Role::Admin, Role::System];

/// Result of a committed transition
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub inspection: Inspection,
    /// Review opened or resolved by the transition, if any
    pub workflow: Option<WorkflowRecord>,
    pub history: HistoryEntry,
    /// Non-blocking validation violations
    pub warnings: Vec<Violation>,
    /// Optional conditions that did not hold
    pub advisories: Vec<ConditionKind>,
}

pub struct TransitionEngine {
    store: Arc<dyn WorkflowStore>,
    resolver: Arc<ConfigResolver>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    publisher: EventPublisher,
}

impl std::fmt::Debug for TransitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionEngine")
            .field("resolver", &self.resolver)
            .field("subscribers", &self.publisher.subscriber_count())
            .finish()
    }
}

impl TransitionEngine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        resolver: Arc<ConfigResolver>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            store,
            resolver,
            dispatcher,
            publisher,
        }
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    /// Attempt to move `subject_id` to `to` on behalf of `principal`
    #[instrument(skip(self, principal, payload), fields(principal_id = %principal.id, role = %principal.role))]
    pub async fn attempt_transition(
        &self,
        subject_id: Uuid,
        to: InspectionState,
        principal: &Principal,
        payload: TransitionPayload,
    ) -> TransitionResult<TransitionOutcome> {
        let now = Utc::now();
        let inspection = self.load_subject(subject_id, principal).await?;
        let config = self.resolver.resolve(&inspection.tenant_id).await?;
        let from = inspection.state;

        let result = self
            .run_transition(&inspection, &config, to, principal, &payload, now)
            .await;

        match &result {
            Ok(outcome) => {
                log_transition(
                    subject_id,
                    &inspection.tenant_id,
                    from,
                    to,
                    principal.actor_id().as_deref(),
                    "committed",
                    None,
                );
                self.signal_post_actions(&config, from, to, &outcome.inspection, outcome.workflow.as_ref())
                    .await;
                self.publish(
                    outcome.history.action,
                    &outcome.inspection,
                    json!({
                        "from": from,
                        "to": to,
                        "workflow_id": outcome.workflow.as_ref().map(|w| w.id),
                        "actor_id": principal.actor_id(),
                    }),
                );
            }
            Err(e) => {
                let details = e.to_string();
                log_transition(
                    subject_id,
                    &inspection.tenant_id,
                    from,
                    to,
                    principal.actor_id().as_deref(),
                    "refused",
                    Some(details.as_str()),
                );
            }
        }
        result
    }

    async fn run_transition(
        &self,
        inspection: &Inspection,
        config: &EffectiveConfig,
        to: InspectionState,
        principal: &Principal,
        payload: &TransitionPayload,
        now: DateTime<Utc>,
    ) -> TransitionResult<TransitionOutcome> {
        let subject_id = inspection.id;
        let from = inspection.state;
        let rule = config
            .transition(from, to)
            .ok_or(TransitionError::InvalidTransition { from, to })?;

        if !rule.permits(principal.role) {
            return Err(TransitionError::Forbidden {
                role: principal.role,
                from,
                to,
            });
        }

        let pending = self.store.find_pending_workflow(subject_id).await?;
        if to == InspectionState::PendingReview && pending.is_some() {
            return Err(TransitionError::AlreadyPending { subject_id });
        }
        let registry = self.resolver.registry();
        let context = ConditionContext {
            inspection,
            workflow: pending.as_ref(),
            payload,
            principal,
        };
        registry.check_all(&rule.required_conditions, &context)?;
        let advisories = registry.unmet(&rule.optional_conditions, &context)?;

        if let Some(action) = payload.auto_action {
            check_auto_trigger(rule, action, config, registry, &context, now)?;
        }

        validation::validate_metadata(&payload.metadata).map_err(|violation| {
            TransitionError::ValidationFailed {
                violations: vec![violation],
            }
        })?;

        let priority = pending
            .as_ref()
            .map(|w| w.priority)
            .or(payload.priority)
            .unwrap_or(config.business_rules.default_priority);
        let report = validation::evaluate(
            ValidationScope::Transition,
            &ValidationContext {
                snapshot: &inspection.snapshot,
                from: Some(from),
                to: Some(to),
                role: principal.role,
                priority,
                business_rules: &config.business_rules,
            },
            config,
        );
        if report.is_blocking() {
            return Err(TransitionError::ValidationFailed {
                violations: report.errors,
            });
        }

        let mut next = inspection.advanced_to(to, now);
        let mut opened = None;
        let mut resolution = None;
        if to == InspectionState::PendingReview {
            let submitter = principal.actor_id().unwrap_or_else(|| principal.id.clone());
            opened = Some(WorkflowRecord::pending(
                subject_id,
                inspection.tenant_id.clone(),
                submitter,
                priority,
                now,
            ));
        } else if from == InspectionState::PendingReview {
            let review = pending
                .as_ref()
                .ok_or(TransitionError::NoPendingReview { subject_id })?;
            let status =
                ReviewStatus::from_outcome(to).ok_or(TransitionError::InvalidTransition { from, to })?;
            resolution = Some(ReviewResolution {
                workflow_id: review.id,
                status,
                actor_id: principal.actor_id(),
                at: now,
                rejection_reason: payload.rejection_reason().map(str::to_string),
                manager_comments: payload.manager_comments().map(str::to_string),
                require_not_under_review: payload.auto_action == Some(AutoAction::AutoApprove),
            });
        }

        apply_pre_actions(
            &rule.pre_actions,
            &mut next,
            opened.as_mut(),
            payload,
            &config.business_rules,
            now,
        );

        let workflow_id = opened
            .as_ref()
            .map(|w| w.id)
            .or(resolution.as_ref().map(|r| r.workflow_id));
        let comments = payload
            .comments
            .clone()
            .or_else(|| payload.rejection_reason().map(str::to_string))
            .or_else(|| payload.manager_comments().map(str::to_string));
        let history = HistoryEntry::new(
            subject_id,
            workflow_id,
            principal.actor_id(),
            WorkflowEvent::for_transition(from, to),
            now,
        )
        .with_states(from, to)
        .with_comments(comments)
        .with_metadata(audit::transition_metadata(
            principal,
            priority,
            &report.warnings,
            &advisories,
            payload,
        ));

        let workflow = match (opened, resolution) {
            (Some(record), _) => Some(WorkflowWrite::Open(record)),
            (None, Some(resolution)) => Some(WorkflowWrite::Resolve(resolution)),
            (None, None) => None,
        };

        let committed = self
            .store
            .commit_transition(TransitionCommit {
                expected_version: inspection.version,
                inspection: next,
                workflow,
                history: history.clone(),
            })
            .await?;

        Ok(TransitionOutcome {
            inspection: committed.inspection,
            workflow: committed.workflow,
            history,
            warnings: report.warnings,
            advisories,
        })
    }

    /// Escalate a pending review per `rule`. Returns `None` when the review
    /// was already escalated or resolved.
    #[instrument(skip(self, record, rule, config), fields(workflow_id = %record.id, priority = %record.priority))]
    pub async fn escalate(
        &self,
        record: &WorkflowRecord,
        rule: &EscalationRule,
        config: &EffectiveConfig,
        now: DateTime<Utc>,
    ) -> TransitionResult<Option<WorkflowRecord>> {
        let update = EscalationUpdate {
            escalate_to: rule.target(),
            priority: Priority::Urgent,
            at: now,
        };
        let history = HistoryEntry::new(
            record.subject_id,
            Some(record.id),
            None,
            WorkflowEvent::Escalated,
            now,
        )
        .with_states(InspectionState::PendingReview, InspectionState::PendingReview)
        .with_metadata(audit::escalation_metadata(record, rule));

        let Some(escalated) = self
            .store
            .escalate_if_pending(record.id, update, history)
            .await?
        else {
            debug!(workflow_id = %record.id, "Review already escalated or resolved");
            return Ok(None);
        };

        info!(
            workflow_id = %escalated.id,
            subject_id = %escalated.subject_id,
            escalated_to = ?escalated.escalated_to,
            "Escalated overdue review"
        );
        let context = review_context(&escalated);
        dispatch_all(
            self.dispatcher.as_ref(),
            Notification::for_event(config, NotificationEvent::ReviewEscalated, &context),
        )
        .await;
        self.publisher
            .publish(WorkflowEvent::Escalated, escalated.subject_id, &escalated.tenant_id, context)
            .unwrap_or_else(|e| warn!(error = %e, "Failed to publish escalation event"));
        Ok(Some(escalated))
    }

    /// Send the warning for `offset_minutes` before escalation, once
    pub async fn warn_before_escalation(
        &self,
        record: &WorkflowRecord,
        rule: &EscalationRule,
        offset_minutes: u32,
        config: &EffectiveConfig,
        now: DateTime<Utc>,
    ) -> TransitionResult<bool> {
        let history = HistoryEntry::new(
            record.subject_id,
            Some(record.id),
            None,
            WorkflowEvent::EscalationWarning,
            now,
        )
        .with_metadata(audit::warning_metadata(record, rule, offset_minutes));

        if !self
            .store
            .record_escalation_warning(record.id, offset_minutes, history)
            .await?
        {
            return Ok(false);
        }

        let mut context = review_context(record);
        context["minutes_until_escalation"] = json!(offset_minutes);
        dispatch_all(
            self.dispatcher.as_ref(),
            Notification::for_event(config, NotificationEvent::EscalationWarning, &context),
        )
        .await;
        self.publisher
            .publish(
                WorkflowEvent::EscalationWarning,
                record.subject_id,
                &record.tenant_id,
                context,
            )
            .unwrap_or_else(|e| warn!(error = %e, "Failed to publish escalation warning"));
        Ok(true)
    }

    /// Warn `offset_minutes` ahead of a timeout auto-action, once per stay in
    /// the current state
    pub async fn warn_before_timeout(
        &self,
        inspection: &Inspection,
        rule: &TimeoutRule,
        offset_minutes: u32,
        config: &EffectiveConfig,
        now: DateTime<Utc>,
    ) -> TransitionResult<bool> {
        let history = HistoryEntry::new(inspection.id, None, None, WorkflowEvent::TimeoutWarning, now)
            .with_states(inspection.state, inspection.state)
            .with_metadata(audit::timeout_warning_metadata(inspection, rule, offset_minutes));

        if !self
            .store
            .record_timeout_warning(inspection.id, inspection.state, offset_minutes, history)
            .await?
        {
            return Ok(false);
        }

        let context = json!({
            "subject_id": inspection.id,
            "tenant_id": inspection.tenant_id,
            "technician_id": inspection.technician_id,
            "state": inspection.state,
            "auto_action": rule.auto_action,
            "minutes_until_action": offset_minutes,
        });
        dispatch_all(
            self.dispatcher.as_ref(),
            Notification::for_event(config, NotificationEvent::TimeoutWarning, &context),
        )
        .await;
        self.publish(WorkflowEvent::TimeoutWarning, inspection, context);
        Ok(true)
    }

    /// Mark the pending review as opened by a manager.
    ///
    /// An opened review suppresses the auto-approve timeout. Opening an
    /// already-opened review returns it unchanged.
    #[instrument(skip(self, principal), fields(principal_id = %principal.id))]
    pub async fn start_review(
        &self,
        subject_id: Uuid,
        principal: &Principal,
    ) -> TransitionResult<WorkflowRecord> {
        let inspection = self.load_subject(subject_id, principal).await?;
        let config = self.resolver.resolve(&inspection.tenant_id).await?;
        let approve = config
            .transition(InspectionState::PendingReview, InspectionState::Approved)
            .ok_or(TransitionError::InvalidTransition {
                from: InspectionState::PendingReview,
                to: InspectionState::Approved,
            })?;
        if !approve.permits(principal.role) || principal.is_system() {
            return Err(TransitionError::Forbidden {
                role: principal.role,
                from: inspection.state,
                to: InspectionState::Approved,
            });
        }

        let pending = self
            .store
            .find_pending_workflow(subject_id)
            .await?
            .ok_or(TransitionError::NoPendingReview { subject_id })?;
        if pending.is_under_review() {
            return Ok(pending);
        }

        let now = Utc::now();
        let history = HistoryEntry::new(
            subject_id,
            Some(pending.id),
            principal.actor_id(),
            WorkflowEvent::ReviewStarted,
            now,
        )
        .with_metadata(json!({ "role": principal.role }));
        let record = self
            .store
            .mark_review_started(pending.id, &principal.id, now, history)
            .await?;

        self.publish(WorkflowEvent::ReviewStarted, &inspection, review_context(&record));
        Ok(record)
    }

    /// Archive a completed inspection and its reviews. Nothing is deleted.
    #[instrument(skip(self, principal), fields(principal_id = %principal.id))]
    pub async fn archive_subject(
        &self,
        subject_id: Uuid,
        principal: &Principal,
    ) -> TransitionResult<Inspection> {
        let inspection = self.load_subject(subject_id, principal).await?;
        if !ARCHIVE_ROLES.contains(&principal.role) {
            return Err(TransitionError::Forbidden {
                role: principal.role,
                from: inspection.state,
                to: inspection.state,
            });
        }
        if !inspection.state.is_terminal() {
            return Err(TransitionError::NotArchivable {
                subject_id,
                state: inspection.state,
            });
        }

        let now = Utc::now();
        let history = HistoryEntry::new(subject_id, None, principal.actor_id(), WorkflowEvent::Archived, now)
            .with_metadata(json!({ "role": principal.role }));
        let archived = self
            .store
            .archive_subject(subject_id, inspection.version, now, history)
            .await?;

        info!(subject_id = %subject_id, "Archived inspection");
        self.publish(WorkflowEvent::Archived, &archived, Value::Null);
        Ok(archived)
    }

    /// Replace the item snapshot while the inspection is editable
    pub async fn record_findings(
        &self,
        subject_id: Uuid,
        principal: &Principal,
        snapshot: InspectionSnapshot,
    ) -> TransitionResult<Inspection> {
        let inspection = self.load_subject(subject_id, principal).await?;
        if !inspection.state.is_editable() || inspection.editing_locked {
            return Err(TransitionError::NotEditable { subject_id });
        }
        Ok(self
            .store
            .update_snapshot(subject_id, inspection.version, snapshot)
            .await?)
    }

    /// Chronological history of an inspection
    pub async fn history(&self, subject_id: Uuid) -> TransitionResult<Vec<HistoryEntry>> {
        Ok(self.store.history_for_subject(subject_id).await?)
    }

    /// Load a live subject visible to `principal`'s tenant
    async fn load_subject(&self, subject_id: Uuid, principal: &Principal) -> TransitionResult<Inspection> {
        let inspection = self
            .store
            .load_inspection(subject_id)
            .await?
            .filter(|i| i.tenant_id == principal.tenant_id)
            .ok_or(TransitionError::SubjectNotFound { subject_id })?;
        if inspection.is_archived() {
            return Err(TransitionError::Archived { subject_id });
        }
        Ok(inspection)
    }

    async fn signal_post_actions(
        &self,
        config: &EffectiveConfig,
        from: InspectionState,
        to: InspectionState,
        inspection: &Inspection,
        workflow: Option<&WorkflowRecord>,
    ) {
        let Some(rule) = config.transition(from, to) else {
            return;
        };
        let mut context = json!({
            "subject_id": inspection.id,
            "tenant_id": inspection.tenant_id,
            "technician_id": inspection.technician_id,
            "from": from,
            "to": to,
        });
        if let Some(workflow) = workflow {
            context["workflow"] = review_context(workflow);
        }

        let notifications: Vec<Notification> = rule
            .post_actions
            .iter()
            .filter(|action| action.phase() == ActionPhase::Post)
            .filter_map(|action| action.notification_event())
            .flat_map(|event| Notification::for_event(config, event, &context))
            .collect();
        if notifications.is_empty() {
            return;
        }
        let total = notifications.len();
        let delivered = dispatch_all(self.dispatcher.as_ref(), notifications).await;
        debug!(subject_id = %inspection.id, total, delivered, "Signalled post-actions");
    }

    fn publish(&self, event: WorkflowEvent, inspection: &Inspection, context: Value) {
        if let Err(e) = self
            .publisher
            .publish(event, inspection.id, &inspection.tenant_id, context)
        {
            warn!(error = %e, event = %event, "Failed to publish lifecycle event");
        }
    }
}

/// An auto-action may only take an edge that declares an unattended trigger
/// whose condition and delay are satisfied
fn check_auto_trigger(
    rule: &TransitionRule,
    action: AutoAction,
    config: &EffectiveConfig,
    registry: &ConditionRegistry,
    context: &ConditionContext<'_>,
    now: DateTime<Utc>,
) -> TransitionResult<()> {
    let not_eligible = |reason: &str| TransitionError::AutoTriggerNotEligible {
        reason: reason.to_string(),
    };

    if !context.principal.is_system() {
        return Err(not_eligible("auto actions run only as the system principal"));
    }
    if action.target_state() != rule.to {
        return Err(not_eligible("auto action does not target this transition"));
    }
    if !config.business_rules.allows(action) {
        return Err(not_eligible("auto action disabled by business rules"));
    }
    let trigger = rule
        .unattended_trigger()
        .ok_or_else(|| not_eligible("transition declares no unattended auto trigger"))?;
    if let Some(condition) = trigger.condition {
        if !registry.evaluate(condition, context)? {
            return Err(TransitionError::AutoTriggerNotEligible {
                reason: format!("trigger condition {condition} not met"),
            });
        }
    }
    if let Some(delay) = trigger.delay() {
        if context.inspection.state_entered_at + delay > now {
            return Err(not_eligible("trigger delay has not elapsed"));
        }
    }
    if action == AutoAction::AutoApprove && context.workflow.is_some_and(|w| w.is_under_review()) {
        return Err(not_eligible("a manager is reviewing this inspection"));
    }
    Ok(())
}

fn review_context(record: &WorkflowRecord) -> Value {
    json!({
        "workflow_id": record.id,
        "subject_id": record.subject_id,
        "tenant_id": record.tenant_id,
        "priority": record.priority,
        "assigned_to": record.assigned_to.as_ref().map(|a| a.to_string()),
        "submitted_by": record.submitted_by,
        "submitted_at": record.submitted_at,
    })
}
