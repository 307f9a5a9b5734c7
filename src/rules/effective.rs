//! # Effective Configuration
//!
//! The merged rule set for one tenant. Built once by the resolver, shared as
//! `Arc<EffectiveConfig>` and never mutated afterwards.

use super::types::{
    BusinessRules, EscalationRule, NotificationEvent, NotificationRule, TimeoutRule,
    TransitionRule,
};
use crate::state_machine::states::{InspectionState, Priority};
use crate::validation::ValidationRule;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Transition rules keyed by `(from, to)`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionTable {
    rules: BTreeMap<(InspectionState, InspectionState), TransitionRule>,
}

impl TransitionTable {
    pub fn from_rules<'a>(rules: impl IntoIterator<Item = &'a TransitionRule>) -> Self {
        let mut table = Self::default();
        for rule in rules {
            table.insert_or_absorb(rule);
        }
        table
    }

    /// Add a new edge, or union `rule` into the edge already present
    pub fn insert_or_absorb(&mut self, rule: &TransitionRule) {
        match self.rules.get_mut(&rule.edge()) {
            Some(existing) => existing.absorb(rule),
            None => {
                self.rules.insert(rule.edge(), rule.clone());
            }
        }
    }

    pub fn get(&self, from: InspectionState, to: InspectionState) -> Option<&TransitionRule> {
        self.rules.get(&(from, to))
    }

    pub fn outgoing(&self, from: InspectionState) -> impl Iterator<Item = &TransitionRule> {
        self.rules.values().filter(move |rule| rule.from == from)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransitionRule> {
        self.rules.values()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// States reachable from `start` by following edges
    pub fn reachable_from(&self, start: InspectionState) -> BTreeSet<InspectionState> {
        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(state) = queue.pop_front() {
            for rule in self.outgoing(state) {
                if seen.insert(rule.to) {
                    queue.push_back(rule.to);
                }
            }
        }
        seen
    }
}

impl Serialize for TransitionTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.rules.values())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfig {
    /// `None` for the untouched default configuration
    pub tenant_id: Option<String>,
    pub override_version: Option<u64>,
    pub business_rules: BusinessRules,
    pub transitions: TransitionTable,
    pub validation_rules: Vec<ValidationRule>,
    pub timeout_rules: Vec<TimeoutRule>,
    pub escalation_rules: Vec<EscalationRule>,
    pub notifications: Vec<NotificationRule>,
}

impl EffectiveConfig {
    pub fn transition(&self, from: InspectionState, to: InspectionState) -> Option<&TransitionRule> {
        self.transitions.get(from, to)
    }

    pub fn validation_rule(&self, id: &str) -> Option<&ValidationRule> {
        self.validation_rules.iter().find(|rule| rule.id == id)
    }

    pub fn timeout_rule(&self, state: InspectionState) -> Option<&TimeoutRule> {
        self.timeout_rules.iter().find(|rule| rule.state == state)
    }

    pub fn escalation_rule(&self, priority: Priority) -> Option<&EscalationRule> {
        self.escalation_rules
            .iter()
            .find(|rule| rule.priority == priority)
    }

    pub fn notifications_for(&self, event: NotificationEvent) -> impl Iterator<Item = &NotificationRule> {
        self.notifications
            .iter()
            .filter(move |rule| rule.event == event)
    }

    pub fn is_default(&self) -> bool {
        self.tenant_id.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_reachability_follows_edges() {
        let rules = [
            TransitionRule::new(InspectionState::Draft, InspectionState::InProgress, [Role::Mechanic]),
            TransitionRule::new(
                InspectionState::InProgress,
                InspectionState::PendingReview,
                [Role::Mechanic],
            ),
            TransitionRule::new(InspectionState::Approved, InspectionState::Completed, [Role::Admin]),
        ];
        let table = TransitionTable::from_rules(rules.iter());
        let reachable = table.reachable_from(InspectionState::Draft);
        assert!(reachable.contains(&InspectionState::PendingReview));
        assert!(!reachable.contains(&InspectionState::Approved));
        assert!(!reachable.contains(&InspectionState::Completed));
    }

    #[test]
    fn test_duplicate_edges_are_unioned() {
        let rules = [
            TransitionRule::new(InspectionState::Draft, InspectionState::InProgress, [Role::Mechanic]),
            TransitionRule::new(InspectionState::Draft, InspectionState::InProgress, [Role::Owner]),
        ];
        let table = TransitionTable::from_rules(rules.iter());
        assert_eq!(table.len(), 1);
        let edge = table
            .get(InspectionState::Draft, InspectionState::InProgress)
            .unwrap();
        assert!(edge.permits(Role::Mechanic) && edge.permits(Role::Owner));
    }
}
