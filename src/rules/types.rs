//! Plain-data rule records. Rule sets are flat tables of tagged records; the
//! resolver turns them into an immutable lookup per tenant.

use crate::models::{Assignee, Role};
use crate::state_machine::actions::ActionKind;
use crate::state_machine::guards::ConditionKind;
use crate::state_machine::states::{InspectionState, Priority};
use crate::validation::ValidationRule;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// One guarded edge of the inspection lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub from: InspectionState,
    pub to: InspectionState,
    pub allowed_roles: BTreeSet<Role>,
    #[serde(default)]
    pub required_conditions: Vec<ConditionKind>,
    #[serde(default)]
    pub optional_conditions: Vec<ConditionKind>,
    /// Ids of validation rules run for this edge
    #[serde(default)]
    pub validation_checks: Vec<String>,
    #[serde(default)]
    pub pre_actions: Vec<ActionKind>,
    #[serde(default)]
    pub post_actions: Vec<ActionKind>,
    #[serde(default)]
    pub auto_triggers: Vec<AutoTrigger>,
}

impl TransitionRule {
    pub fn new(from: InspectionState, to: InspectionState, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            from,
            to,
            allowed_roles: roles.into_iter().collect(),
            required_conditions: Vec::new(),
            optional_conditions: Vec::new(),
            validation_checks: Vec::new(),
            pre_actions: Vec::new(),
            post_actions: Vec::new(),
            auto_triggers: Vec::new(),
        }
    }

    pub fn requires(mut self, conditions: impl IntoIterator<Item = ConditionKind>) -> Self {
        self.required_conditions.extend(conditions);
        self
    }

    pub fn advises(mut self, conditions: impl IntoIterator<Item = ConditionKind>) -> Self {
        self.optional_conditions.extend(conditions);
        self
    }

    pub fn checks(mut self, rule_ids: impl IntoIterator<Item = &'static str>) -> Self {
        self.validation_checks
            .extend(rule_ids.into_iter().map(str::to_string));
        self
    }

    pub fn before(mut self, actions: impl IntoIterator<Item = ActionKind>) -> Self {
        self.pre_actions.extend(actions);
        self
    }

    pub fn after(mut self, actions: impl IntoIterator<Item = ActionKind>) -> Self {
        self.post_actions.extend(actions);
        self
    }

    pub fn auto(mut self, trigger: AutoTrigger) -> Self {
        self.auto_triggers.push(trigger);
        self
    }

    pub fn edge(&self) -> (InspectionState, InspectionState) {
        (self.from, self.to)
    }

    pub fn permits(&self, role: Role) -> bool {
        self.allowed_roles.contains(&role)
    }

    /// Fold another rule for the same edge into this one (set union)
    pub fn absorb(&mut self, other: &TransitionRule) {
        self.allowed_roles.extend(other.allowed_roles.iter().copied());
        extend_unique(&mut self.required_conditions, &other.required_conditions);
        extend_unique(&mut self.optional_conditions, &other.optional_conditions);
        extend_unique(&mut self.validation_checks, &other.validation_checks);
        extend_unique(&mut self.pre_actions, &other.pre_actions);
        extend_unique(&mut self.post_actions, &other.post_actions);
        extend_unique(&mut self.auto_triggers, &other.auto_triggers);
    }

    /// First trigger that can fire without a human confirming it
    pub fn unattended_trigger(&self) -> Option<&AutoTrigger> {
        self.auto_triggers.iter().find(|t| !t.requires_confirmation)
    }
}

fn extend_unique<T: Clone + PartialEq>(target: &mut Vec<T>, extra: &[T]) {
    for item in extra {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}

/// Declares that an edge may be taken automatically by the timeout sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoTrigger {
    pub condition: Option<ConditionKind>,
    /// Minimum time in the source state before the trigger may fire
    pub delay_minutes: Option<u32>,
    #[serde(default)]
    pub requires_confirmation: bool,
}

impl AutoTrigger {
    pub fn delay(&self) -> Option<Duration> {
        self.delay_minutes.map(|m| Duration::minutes(i64::from(m)))
    }
}

/// Automatic action taken when an inspection sits in a state too long
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoAction {
    AutoApprove,
    AutoSend,
    AutoComplete,
}

impl AutoAction {
    pub fn target_state(&self) -> InspectionState {
        match self {
            Self::AutoApprove => InspectionState::Approved,
            Self::AutoSend => InspectionState::SentToCustomer,
            Self::AutoComplete => InspectionState::Completed,
        }
    }
}

impl fmt::Display for AutoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutoApprove => write!(f, "auto_approve"),
            Self::AutoSend => write!(f, "auto_send"),
            Self::AutoComplete => write!(f, "auto_complete"),
        }
    }
}

/// State-keyed timeout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeoutRule {
    pub state: InspectionState,
    pub threshold_minutes: u32,
    pub auto_action: AutoAction,
    #[serde(default)]
    pub notify_before_minutes: Vec<u32>,
}

impl TimeoutRule {
    pub fn threshold(&self) -> Duration {
        Duration::minutes(i64::from(self.threshold_minutes))
    }

    /// Earliest time in the state at which this rule acts, warnings included
    pub fn earliest_lead(&self) -> Duration {
        let max_offset = self.notify_before_minutes.iter().copied().max().unwrap_or(0);
        self.threshold() - Duration::minutes(i64::from(max_offset))
    }
}

/// Priority-keyed escalation of pending reviews
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationRule {
    pub priority: Priority,
    pub threshold_minutes: u32,
    pub escalate_to_role: Role,
    /// Specific user to escalate to; otherwise the role queue
    pub escalate_to: Option<String>,
    #[serde(default)]
    pub notify_before_minutes: Vec<u32>,
}

impl EscalationRule {
    pub fn threshold(&self) -> Duration {
        Duration::minutes(i64::from(self.threshold_minutes))
    }

    pub fn target(&self) -> Assignee {
        match &self.escalate_to {
            Some(id) => Assignee::Principal(id.clone()),
            None => Assignee::Role(self.escalate_to_role),
        }
    }

    /// Earliest lead time before the threshold at which this rule acts
    pub fn earliest_lead(&self) -> Duration {
        let max_offset = self.notify_before_minutes.iter().copied().max().unwrap_or(0);
        self.threshold() - Duration::minutes(i64::from(max_offset))
    }
}

/// Notification events the engine can signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    ReviewRequested,
    ReviewApproved,
    ReviewRejected,
    ChangesRequested,
    ReportReady,
    InspectionCompleted,
    ReviewEscalated,
    EscalationWarning,
    TimeoutWarning,
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReviewRequested => "review_requested",
            Self::ReviewApproved => "review_approved",
            Self::ReviewRejected => "review_rejected",
            Self::ChangesRequested => "changes_requested",
            Self::ReportReady => "report_ready",
            Self::InspectionCompleted => "inspection_completed",
            Self::ReviewEscalated => "review_escalated",
            Self::EscalationWarning => "escalation_warning",
            Self::TimeoutWarning => "timeout_warning",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
    Push,
    InApp,
}

/// Who receives a notification; the dispatcher resolves actual addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Role(Role),
    Technician,
    Assignee,
    Customer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRule {
    pub event: NotificationEvent,
    pub recipients: Vec<Recipient>,
    pub channels: Vec<Channel>,
    pub template: String,
}

/// Tenant-tunable scalars
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessRules {
    pub auto_approve_enabled: bool,
    pub auto_send_enabled: bool,
    pub min_items_for_review: u32,
    pub required_categories: Vec<String>,
    pub critical_photo_minimum: u32,
    pub default_priority: Priority,
    pub default_reviewer_role: Role,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            auto_approve_enabled: false,
            auto_send_enabled: false,
            min_items_for_review: 5,
            required_categories: vec!["brakes".to_string(), "tires".to_string()],
            critical_photo_minimum: 1,
            default_priority: Priority::Normal,
            default_reviewer_role: Role::ShopManager,
        }
    }
}

impl BusinessRules {
    /// Whether the tenant lets `action` fire unattended
    pub fn allows(&self, action: AutoAction) -> bool {
        match action {
            AutoAction::AutoApprove => self.auto_approve_enabled,
            AutoAction::AutoSend => self.auto_send_enabled,
            AutoAction::AutoComplete => true,
        }
    }
}

/// Partial business rules; every present field replaces the default
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BusinessRulesOverride {
    pub auto_approve_enabled: Option<bool>,
    pub auto_send_enabled: Option<bool>,
    pub min_items_for_review: Option<u32>,
    pub required_categories: Option<Vec<String>>,
    pub critical_photo_minimum: Option<u32>,
    pub default_priority: Option<Priority>,
    pub default_reviewer_role: Option<Role>,
}

impl BusinessRulesOverride {
    pub fn apply_to(&self, base: &BusinessRules) -> BusinessRules {
        BusinessRules {
            auto_approve_enabled: self.auto_approve_enabled.unwrap_or(base.auto_approve_enabled),
            auto_send_enabled: self.auto_send_enabled.unwrap_or(base.auto_send_enabled),
            min_items_for_review: self.min_items_for_review.unwrap_or(base.min_items_for_review),
            required_categories: self
                .required_categories
                .clone()
                .unwrap_or_else(|| base.required_categories.clone()),
            critical_photo_minimum: self
                .critical_photo_minimum
                .unwrap_or(base.critical_photo_minimum),
            default_priority: self.default_priority.unwrap_or(base.default_priority),
            default_reviewer_role: self
                .default_reviewer_role
                .unwrap_or(base.default_reviewer_role),
        }
    }
}

/// The full default rule table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub business_rules: BusinessRules,
    pub transitions: Vec<TransitionRule>,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub timeout_rules: Vec<TimeoutRule>,
    #[serde(default)]
    pub escalation_rules: Vec<EscalationRule>,
    #[serde(default)]
    pub notifications: Vec<NotificationRule>,
}
