//! # Validation Evaluator
//!
//! Scoped validation rules run against an inspection snapshot. Each rule has
//! conditions that decide whether it applies and a severity: `error`
//! violations block a transition, `warning` violations are returned to the
//! caller alongside a successful commit.
//!
//! The snapshot evaluated here is the one loaded for the transition attempt;
//! the store commits only if that snapshot's version is still current.

use crate::models::{InspectionItem, InspectionSnapshot, ItemStatus, Role};
use crate::rules::types::BusinessRules;
use crate::rules::EffectiveConfig;
use crate::state_machine::states::{InspectionState, Priority};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Maximum serialized size for caller-supplied transition metadata (64KB)
const MAX_METADATA_BYTES: usize = 64 * 1024;

/// Maximum nesting depth for transition metadata
const MAX_METADATA_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationScope {
    Record,
    Item,
    Transition,
}

impl fmt::Display for ValidationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record => write!(f, "record"),
            Self::Item => write!(f, "item"),
            Self::Transition => write!(f, "transition"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// Applicability test; all conditions of a rule must match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RuleCondition {
    FromState(InspectionState),
    ToState(InspectionState),
    Priority(Priority),
    Role(Role),
    /// Restricts item checks to items in the category
    ItemCategory(String),
    /// Restricts item checks to items with the status
    ItemStatus(ItemStatus),
}

impl RuleCondition {
    fn is_item_filter(&self) -> bool {
        matches!(self, Self::ItemCategory(_) | Self::ItemStatus(_))
    }

    fn matches_context(&self, context: &ValidationContext<'_>) -> bool {
        match self {
            Self::FromState(state) => context.from == Some(*state),
            Self::ToState(state) => context.to == Some(*state),
            Self::Priority(priority) => context.priority == *priority,
            Self::Role(role) => context.role == *role,
            Self::ItemCategory(_) | Self::ItemStatus(_) => true,
        }
    }

    fn matches_item(&self, item: &InspectionItem) -> bool {
        match self {
            Self::ItemCategory(category) => item.category.eq_ignore_ascii_case(category),
            Self::ItemStatus(status) => item.status == *status,
            _ => true,
        }
    }
}

/// Deterministic check evaluated against the snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationCheck {
    /// Falls back to `min_items_for_review` when unset
    MinimumItemCount { min: Option<u32> },
    /// Falls back to the business-rule categories when empty
    RequiredCategories {
        #[serde(default)]
        categories: Vec<String>,
    },
    /// Safety-critical items need photos (and optionally notes)
    CriticalItemsDocumented {
        min_photos: Option<u32>,
        #[serde(default)]
        require_notes: bool,
    },
    AllItemsInspected,
    ItemHasPhotos { min: u32 },
    ItemHasNotes,
    ItemHasEstimate,
    CustomerContactPresent,
    VehicleIdentified,
}

impl ValidationCheck {
    /// Checks that run once per item and report the item id
    pub fn is_item_check(&self) -> bool {
        matches!(
            self,
            Self::ItemHasPhotos { .. } | Self::ItemHasNotes | Self::ItemHasEstimate
        )
    }

    /// Checks that count the filtered items, so an empty selection is a finding
    pub fn is_count_check(&self) -> bool {
        matches!(self, Self::MinimumItemCount { .. } | Self::RequiredCategories { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    pub id: String,
    pub scope: ValidationScope,
    pub severity: Severity,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    pub check: ValidationCheck,
    pub message: String,
}

impl ValidationRule {
    pub fn new(
        id: impl Into<String>,
        scope: ValidationScope,
        severity: Severity,
        check: ValidationCheck,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            scope,
            severity,
            conditions: Vec::new(),
            check,
            message: message.into(),
        }
    }

    pub fn when(mut self, condition: RuleCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    fn applies_to(&self, context: &ValidationContext<'_>) -> bool {
        self.conditions.iter().all(|c| c.matches_context(context))
    }

    fn item_filter<'s>(&'s self, items: &'s [InspectionItem]) -> impl Iterator<Item = &'s InspectionItem> {
        items.iter().filter(move |item| {
            self.conditions
                .iter()
                .filter(|c| c.is_item_filter())
                .all(|c| c.matches_item(item))
        })
    }

    fn has_item_filter(&self) -> bool {
        self.conditions.iter().any(RuleCondition::is_item_filter)
    }
}

/// One failed rule, optionally pinned to an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.rule_id, self.message)?;
        if let Some(detail) = &self.detail {
            write!(f, ": {detail}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<Violation>,
    pub warnings: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_blocking(&self) -> bool {
        !self.errors.is_empty()
    }

    fn push(&mut self, violation: Violation) {
        match violation.severity {
            Severity::Error => self.errors.push(violation),
            Severity::Warning => self.warnings.push(violation),
        }
    }
}

/// Data a rule is evaluated against
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub snapshot: &'a InspectionSnapshot,
    pub from: Option<InspectionState>,
    pub to: Option<InspectionState>,
    pub role: Role,
    pub priority: Priority,
    pub business_rules: &'a BusinessRules,
}

/// Run every rule applicable to `scope`.
///
/// At transition scope this includes the checks named by the edge being
/// taken, whatever scope they were declared with, plus any rule declared at
/// transition scope whose conditions match.
pub fn evaluate(
    scope: ValidationScope,
    context: &ValidationContext<'_>,
    config: &EffectiveConfig,
) -> ValidationReport {
    let mut selected: Vec<&ValidationRule> = Vec::new();
    let mut seen = HashSet::new();

    if scope == ValidationScope::Transition {
        if let (Some(from), Some(to)) = (context.from, context.to) {
            if let Some(rule) = config.transition(from, to) {
                for id in &rule.validation_checks {
                    if let Some(check) = config.validation_rule(id) {
                        if seen.insert(check.id.as_str()) {
                            selected.push(check);
                        }
                    }
                }
            }
        }
    }

    for rule in config.validation_rules.iter().filter(|r| r.scope == scope) {
        if seen.insert(rule.id.as_str()) {
            selected.push(rule);
        }
    }

    let mut report = ValidationReport::default();
    for rule in selected {
        if rule.applies_to(context) {
            for violation in run_rule(rule, context) {
                report.push(violation);
            }
        }
    }

    tracing::debug!(
        scope = %scope,
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "Validation evaluated"
    );
    report
}

fn run_rule(rule: &ValidationRule, context: &ValidationContext<'_>) -> Vec<Violation> {
    let snapshot = context.snapshot;
    let business = context.business_rules;
    let violation = |detail: Option<String>, item_id: Option<String>| Violation {
        rule_id: rule.id.clone(),
        severity: rule.severity,
        message: rule.message.clone(),
        detail,
        item_id,
    };

    // Item filters narrow the set of items record-level checks look at too.
    // With no matching item, a counting check still runs against the empty set.
    let items: Vec<&InspectionItem> = rule.item_filter(&snapshot.items).collect();
    if rule.has_item_filter()
        && items.is_empty()
        && !rule.check.is_item_check()
        && !rule.check.is_count_check()
    {
        return Vec::new();
    }

    match &rule.check {
        ValidationCheck::MinimumItemCount { min } => {
            let required = min.unwrap_or(business.min_items_for_review) as usize;
            if items.len() < required {
                vec![violation(
                    Some(format!("{} of {required} items recorded", items.len())),
                    None,
                )]
            } else {
                Vec::new()
            }
        }
        ValidationCheck::RequiredCategories { categories } => {
            let required = if categories.is_empty() {
                &business.required_categories
            } else {
                categories
            };
            let missing: Vec<&str> = required
                .iter()
                .filter(|category| {
                    !items
                        .iter()
                        .any(|item| item.category.eq_ignore_ascii_case(category))
                })
                .map(String::as_str)
                .collect();
            if missing.is_empty() {
                Vec::new()
            } else {
                vec![violation(Some(format!("missing {}", missing.join(", "))), None)]
            }
        }
        ValidationCheck::CriticalItemsDocumented {
            min_photos,
            require_notes,
        } => {
            let photos = min_photos.unwrap_or(business.critical_photo_minimum);
            items
                .iter()
                .filter(|item| item.status == ItemStatus::Critical)
                .filter(|item| item.photo_count < photos || (*require_notes && !item.has_notes()))
                .map(|item| {
                    violation(
                        Some(format!(
                            "{} has {} photo(s), notes {}",
                            item.category,
                            item.photo_count,
                            if item.has_notes() { "present" } else { "missing" }
                        )),
                        Some(item.id.clone()),
                    )
                })
                .collect()
        }
        ValidationCheck::AllItemsInspected => {
            let pending = items
                .iter()
                .filter(|item| item.status == ItemStatus::NotInspected)
                .count();
            if pending == 0 {
                Vec::new()
            } else {
                vec![violation(Some(format!("{pending} item(s) not inspected")), None)]
            }
        }
        ValidationCheck::ItemHasPhotos { min } => items
            .iter()
            .filter(|item| item.photo_count < *min)
            .map(|item| violation(None, Some(item.id.clone())))
            .collect(),
        ValidationCheck::ItemHasNotes => items
            .iter()
            .filter(|item| !item.has_notes())
            .map(|item| violation(None, Some(item.id.clone())))
            .collect(),
        ValidationCheck::ItemHasEstimate => items
            .iter()
            .filter(|item| item.estimated_cost_cents.is_none())
            .map(|item| violation(None, Some(item.id.clone())))
            .collect(),
        ValidationCheck::CustomerContactPresent => {
            if snapshot.customer.as_ref().is_some_and(|c| c.is_reachable()) {
                Vec::new()
            } else {
                vec![violation(None, None)]
            }
        }
        ValidationCheck::VehicleIdentified => {
            let identified = snapshot
                .vehicle
                .as_ref()
                .is_some_and(|v| v.vin.is_some() || v.description.is_some());
            if identified {
                Vec::new()
            } else {
                vec![violation(None, None)]
            }
        }
    }
}

/// Size and depth limits for caller-supplied metadata stored in history
pub fn validate_metadata(value: &Value) -> Result<(), Violation> {
    let reject = |detail: String| Violation {
        rule_id: "metadata_limits".to_string(),
        severity: Severity::Error,
        message: "Transition metadata exceeds storage limits".to_string(),
        detail: Some(detail),
        item_id: None,
    };

    let serialized = serde_json::to_string(value).map_err(|e| reject(e.to_string()))?;
    if serialized.len() > MAX_METADATA_BYTES {
        return Err(reject(format!(
            "{} bytes (max: {MAX_METADATA_BYTES})",
            serialized.len()
        )));
    }

    let depth = json_depth(value);
    if depth > MAX_METADATA_DEPTH {
        return Err(reject(format!("nesting depth {depth} (max: {MAX_METADATA_DEPTH})")));
    }
    Ok(())
}

fn json_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{defaults, resolver};
    use serde_json::json;

    fn item(id: &str, category: &str, status: ItemStatus) -> InspectionItem {
        InspectionItem::new(id, category, status)
    }

    fn submit_context<'a>(
        snapshot: &'a InspectionSnapshot,
        business_rules: &'a BusinessRules,
    ) -> ValidationContext<'a> {
        ValidationContext {
            snapshot,
            from: Some(InspectionState::InProgress),
            to: Some(InspectionState::PendingReview),
            role: Role::Mechanic,
            priority: Priority::Normal,
            business_rules,
        }
    }

    fn complete_snapshot() -> InspectionSnapshot {
        InspectionSnapshot {
            items: vec![
                item("1", "brakes", ItemStatus::Ok),
                item("2", "tires", ItemStatus::Ok),
                item("3", "lights", ItemStatus::Ok),
                item("4", "fluids", ItemStatus::Ok),
                item("5", "wipers", ItemStatus::Ok),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_complete_snapshot_passes_submission_checks() {
        let config = resolver::merge(&defaults::default_rule_set(), None);
        let snapshot = complete_snapshot();
        let report = evaluate(
            ValidationScope::Transition,
            &submit_context(&snapshot, &config.business_rules),
            &config,
        );
        assert!(report.errors.is_empty(), "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn test_too_few_items_blocks() {
        let config = resolver::merge(&defaults::default_rule_set(), None);
        let snapshot = InspectionSnapshot {
            items: vec![item("1", "brakes", ItemStatus::Ok)],
            ..Default::default()
        };
        let report = evaluate(
            ValidationScope::Transition,
            &submit_context(&snapshot, &config.business_rules),
            &config,
        );
        assert!(report.is_blocking());
        let ids: Vec<_> = report.errors.iter().map(|v| v.rule_id.as_str()).collect();
        assert!(ids.contains(&"minimum_items"));
        assert!(ids.contains(&"required_categories"));
    }

    #[test]
    fn test_uninspected_items_only_warn() {
        let config = resolver::merge(&defaults::default_rule_set(), None);
        let mut snapshot = complete_snapshot();
        snapshot.items[4].status = ItemStatus::NotInspected;
        let report = evaluate(
            ValidationScope::Transition,
            &submit_context(&snapshot, &config.business_rules),
            &config,
        );
        assert!(!report.is_blocking());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].rule_id, "all_items_inspected");
    }

    #[test]
    fn test_undocumented_critical_item_is_reported_per_item() {
        let config = resolver::merge(&defaults::default_rule_set(), None);
        let mut snapshot = complete_snapshot();
        snapshot.items[0] = item("1", "brakes", ItemStatus::Critical);
        snapshot.items[1] = item("2", "tires", ItemStatus::Critical)
            .with_photos(2)
            .with_notes("sidewall bulge");
        let report = evaluate(
            ValidationScope::Transition,
            &submit_context(&snapshot, &config.business_rules),
            &config,
        );
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].item_id.as_deref(), Some("1"));
    }

    #[test]
    fn test_item_filters_narrow_item_checks() {
        let rule = ValidationRule::new(
            "attention_estimates",
            ValidationScope::Item,
            Severity::Warning,
            ValidationCheck::ItemHasEstimate,
            "Items needing attention should carry an estimate",
        )
        .when(RuleCondition::ItemStatus(ItemStatus::NeedsAttention));

        let business = BusinessRules::default();
        let snapshot = InspectionSnapshot {
            items: vec![
                item("1", "brakes", ItemStatus::NeedsAttention),
                item("2", "tires", ItemStatus::NeedsAttention).with_estimate(12_000),
                item("3", "lights", ItemStatus::Ok),
            ],
            ..Default::default()
        };
        let violations = run_rule(&rule, &submit_context(&snapshot, &business));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].item_id.as_deref(), Some("1"));
    }

    #[test]
    fn test_count_check_fails_when_no_item_matches_filter() {
        let rule = ValidationRule::new(
            "two_brake_items",
            ValidationScope::Transition,
            Severity::Error,
            ValidationCheck::MinimumItemCount { min: Some(2) },
            "Record both brake axles",
        )
        .when(RuleCondition::ItemCategory("brakes".to_string()));

        let business = BusinessRules::default();
        let snapshot = InspectionSnapshot {
            items: vec![item("1", "tires", ItemStatus::Ok)],
            ..Default::default()
        };
        let violations = run_rule(&rule, &submit_context(&snapshot, &business));
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].detail.as_deref(), Some("0 of 2 items recorded"));

        let categories = ValidationRule::new(
            "critical_categories",
            ValidationScope::Transition,
            Severity::Error,
            ValidationCheck::RequiredCategories {
                categories: vec!["brakes".to_string()],
            },
            "Critical findings must include brakes",
        )
        .when(RuleCondition::ItemStatus(ItemStatus::Critical));
        assert_eq!(run_rule(&categories, &submit_context(&snapshot, &business)).len(), 1);
    }

    #[test]
    fn test_documentation_check_skips_when_no_item_matches_filter() {
        let rule = ValidationRule::new(
            "brake_criticals",
            ValidationScope::Transition,
            Severity::Error,
            ValidationCheck::CriticalItemsDocumented {
                min_photos: Some(2),
                require_notes: true,
            },
            "Critical brake items need photos and notes",
        )
        .when(RuleCondition::ItemCategory("brakes".to_string()));

        let business = BusinessRules::default();
        let snapshot = InspectionSnapshot {
            items: vec![item("1", "tires", ItemStatus::Critical)],
            ..Default::default()
        };
        assert!(run_rule(&rule, &submit_context(&snapshot, &business)).is_empty());
    }

    #[test]
    fn test_context_conditions_gate_rule() {
        let rule = ValidationRule::new(
            "urgent_vehicle",
            ValidationScope::Record,
            Severity::Error,
            ValidationCheck::VehicleIdentified,
            "Urgent inspections must identify the vehicle",
        )
        .when(RuleCondition::Priority(Priority::Urgent));

        let business = BusinessRules::default();
        let snapshot = InspectionSnapshot::default();
        let ctx = submit_context(&snapshot, &business);
        assert!(!rule.applies_to(&ctx));
        let urgent = ValidationContext {
            priority: Priority::Urgent,
            ..ctx
        };
        assert!(rule.applies_to(&urgent));
    }

    #[test]
    fn test_metadata_limits() {
        assert!(validate_metadata(&json!({"source": "tablet"})).is_ok());

        let mut deep = json!(1);
        for _ in 0..10 {
            deep = json!({ "n": deep });
        }
        let err = validate_metadata(&deep).unwrap_err();
        assert_eq!(err.rule_id, "metadata_limits");

        let big = json!({ "blob": "x".repeat(MAX_METADATA_BYTES) });
        assert!(validate_metadata(&big).is_err());
    }
}
