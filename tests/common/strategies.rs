#![allow(dead_code)]

use inspection_workflow::models::Role;
use inspection_workflow::state_machine::{InspectionState, Priority};
use proptest::prelude::*;
use proptest::sample::select;

pub fn role_strategy() -> impl Strategy<Value = Role> {
    select(Role::ALL.to_vec())
}

pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    select(Priority::ALL.to_vec())
}

pub fn state_strategy() -> impl Strategy<Value = InspectionState> {
    select(InspectionState::ALL.to_vec())
}

/// Any ordered pair of distinct states
pub fn state_pair_strategy() -> impl Strategy<Value = (InspectionState, InspectionState)> {
    (state_strategy(), state_strategy()).prop_filter("distinct states", |(from, to)| from != to)
}

/// Minutes a review has been waiting when a sweep runs, up to two days
pub fn review_age_strategy() -> impl Strategy<Value = i64> {
    0i64..(48 * 60)
}
