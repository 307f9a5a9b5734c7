//! # Transition Guards
//!
//! Conditions named by transition rules are a closed vocabulary
//! ([`ConditionKind`]). Each kind is bound to a plain evaluator function in a
//! [`ConditionRegistry`] built at startup; rule sets that reference a kind
//! with no registered evaluator are rejected when the configuration is
//! validated, never silently treated as passing.

use super::context::TransitionPayload;
use super::errors::{GuardError, GuardResult};
use crate::models::{Inspection, ItemStatus, Principal, WorkflowRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Known guard conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    HasRejectionReason,
    HasManagerComments,
    HasItems,
    AllItemsInspected,
    HasCustomerContact,
    HasVehicle,
    NoCriticalItems,
    DeliveryConfirmed,
}

impl ConditionKind {
    pub const ALL: [ConditionKind; 8] = [
        Self::HasRejectionReason,
        Self::HasManagerComments,
        Self::HasItems,
        Self::AllItemsInspected,
        Self::HasCustomerContact,
        Self::HasVehicle,
        Self::NoCriticalItems,
        Self::DeliveryConfirmed,
    ];

    /// Get a description of this condition for logging and error messages
    pub fn description(&self) -> &'static str {
        match self {
            Self::HasRejectionReason => "A rejection reason must be provided",
            Self::HasManagerComments => "Manager comments must be provided",
            Self::HasItems => "Inspection must contain at least one item",
            Self::AllItemsInspected => "Every inspection item must be inspected",
            Self::HasCustomerContact => "Customer must have a phone number or email on file",
            Self::HasVehicle => "Vehicle must be identified",
            Self::NoCriticalItems => "Inspection must have no safety-critical items",
            Self::DeliveryConfirmed => "Customer delivery must be confirmed",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::HasRejectionReason => "has_rejection_reason",
            Self::HasManagerComments => "has_manager_comments",
            Self::HasItems => "has_items",
            Self::AllItemsInspected => "all_items_inspected",
            Self::HasCustomerContact => "has_customer_contact",
            Self::HasVehicle => "has_vehicle",
            Self::NoCriticalItems => "no_critical_items",
            Self::DeliveryConfirmed => "delivery_confirmed",
        }
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a condition may look at, captured at attempt time
#[derive(Debug, Clone, Copy)]
pub struct ConditionContext<'a> {
    pub inspection: &'a Inspection,
    pub workflow: Option<&'a WorkflowRecord>,
    pub payload: &'a TransitionPayload,
    pub principal: &'a Principal,
}

pub type ConditionEvaluator = fn(&ConditionContext<'_>) -> bool;

/// Lookup from condition kind to its evaluator
#[derive(Clone)]
pub struct ConditionRegistry {
    evaluators: HashMap<ConditionKind, ConditionEvaluator>,
}

impl fmt::Debug for ConditionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<_> = self.evaluators.keys().collect();
        kinds.sort();
        f.debug_struct("ConditionRegistry")
            .field("registered", &kinds)
            .finish()
    }
}

impl ConditionRegistry {
    /// Registry with nothing bound
    pub fn empty() -> Self {
        Self {
            evaluators: HashMap::new(),
        }
    }

    /// Registry with the built-in evaluator for every [`ConditionKind`]
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(ConditionKind::HasRejectionReason, has_rejection_reason);
        registry.register(ConditionKind::HasManagerComments, has_manager_comments);
        registry.register(ConditionKind::HasItems, has_items);
        registry.register(ConditionKind::AllItemsInspected, all_items_inspected);
        registry.register(ConditionKind::HasCustomerContact, has_customer_contact);
        registry.register(ConditionKind::HasVehicle, has_vehicle);
        registry.register(ConditionKind::NoCriticalItems, no_critical_items);
        registry.register(ConditionKind::DeliveryConfirmed, delivery_confirmed);
        registry
    }

    pub fn register(&mut self, kind: ConditionKind, evaluator: ConditionEvaluator) {
        self.evaluators.insert(kind, evaluator);
    }

    pub fn is_registered(&self, kind: ConditionKind) -> bool {
        self.evaluators.contains_key(&kind)
    }

    /// Evaluate one condition
    pub fn evaluate(&self, kind: ConditionKind, context: &ConditionContext<'_>) -> GuardResult<bool> {
        let evaluator = self
            .evaluators
            .get(&kind)
            .ok_or(GuardError::Unregistered { condition: kind })?;
        Ok(evaluator(context))
    }

    /// Check every required condition; the first failure is reported
    pub fn check_all(&self, kinds: &[ConditionKind], context: &ConditionContext<'_>) -> GuardResult<()> {
        for &kind in kinds {
            if !self.evaluate(kind, context)? {
                return Err(GuardError::ConditionFailed { condition: kind });
            }
        }
        Ok(())
    }

    /// Advisory conditions that do not hold
    pub fn unmet(&self, kinds: &[ConditionKind], context: &ConditionContext<'_>) -> GuardResult<Vec<ConditionKind>> {
        let mut unmet = Vec::new();
        for &kind in kinds {
            if !self.evaluate(kind, context)? {
                unmet.push(kind);
            }
        }
        Ok(unmet)
    }
}

impl Default for ConditionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn has_rejection_reason(ctx: &ConditionContext<'_>) -> bool {
    ctx.payload.rejection_reason().is_some()
}

fn has_manager_comments(ctx: &ConditionContext<'_>) -> bool {
    ctx.payload.manager_comments().is_some()
}

fn has_items(ctx: &ConditionContext<'_>) -> bool {
    !ctx.inspection.snapshot.items.is_empty()
}

fn all_items_inspected(ctx: &ConditionContext<'_>) -> bool {
    ctx.inspection
        .snapshot
        .items
        .iter()
        .all(|item| item.status != ItemStatus::NotInspected)
}

fn has_customer_contact(ctx: &ConditionContext<'_>) -> bool {
    ctx.inspection
        .snapshot
        .customer
        .as_ref()
        .is_some_and(|c| c.is_reachable())
}

fn has_vehicle(ctx: &ConditionContext<'_>) -> bool {
    ctx.inspection
        .snapshot
        .vehicle
        .as_ref()
        .is_some_and(|v| v.vin.is_some() || v.description.is_some())
}

fn no_critical_items(ctx: &ConditionContext<'_>) -> bool {
    !ctx.inspection.snapshot.has_critical_items()
}

fn delivery_confirmed(ctx: &ConditionContext<'_>) -> bool {
    ctx.payload.delivery_confirmed
}
