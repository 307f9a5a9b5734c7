//! # Inspection Model
//!
//! The subject record whose lifecycle the engine drives. The item snapshot is
//! stored with the inspection and versioned together with its state, so guards
//! and validation always run against the same data the commit checks.

use crate::state_machine::states::InspectionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inspection {
    pub id: Uuid,
    pub tenant_id: String,
    pub state: InspectionState,
    /// Optimistic concurrency token, bumped on every write
    pub version: i64,
    pub technician_id: Option<String>,
    pub snapshot: InspectionSnapshot,
    pub editing_locked: bool,
    pub state_entered_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    /// Timeout warning offsets already sent since entering `state`
    #[serde(default)]
    pub timeout_warnings_sent: Vec<u32>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Inspection {
    /// Create a new draft inspection
    pub fn new(tenant_id: impl Into<String>, technician_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            state: InspectionState::Draft,
            version: 0,
            technician_id,
            snapshot: InspectionSnapshot::default(),
            editing_locked: false,
            state_entered_at: now,
            delivered_at: None,
            timeout_warnings_sent: Vec::new(),
            archived_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_snapshot(mut self, snapshot: InspectionSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn timeout_warning_sent(&self, offset_minutes: u32) -> bool {
        self.timeout_warnings_sent.contains(&offset_minutes)
    }

    /// Copy of this inspection moved to `state` at `now`, one version ahead
    pub fn advanced_to(&self, state: InspectionState, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.state = state;
        next.version = self.version + 1;
        next.state_entered_at = now;
        next.timeout_warnings_sent.clear();
        next.updated_at = now;
        next
    }
}

/// Technician findings captured on the inspection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InspectionSnapshot {
    #[serde(default)]
    pub items: Vec<InspectionItem>,
    pub vehicle: Option<VehicleInfo>,
    pub customer: Option<CustomerContact>,
}

impl InspectionSnapshot {
    pub fn critical_items(&self) -> impl Iterator<Item = &InspectionItem> {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Critical)
    }

    pub fn has_critical_items(&self) -> bool {
        self.critical_items().next().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionItem {
    pub id: String,
    pub category: String,
    pub status: ItemStatus,
    #[serde(default)]
    pub photo_count: u32,
    pub notes: Option<String>,
    pub estimated_cost_cents: Option<i64>,
}

impl InspectionItem {
    pub fn new(id: impl Into<String>, category: impl Into<String>, status: ItemStatus) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            status,
            photo_count: 0,
            notes: None,
            estimated_cost_cents: None,
        }
    }

    pub fn with_photos(mut self, count: u32) -> Self {
        self.photo_count = count;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_estimate(mut self, cents: i64) -> Self {
        self.estimated_cost_cents = Some(cents);
        self
    }

    pub fn has_notes(&self) -> bool {
        self.notes.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

/// Traffic-light result of a single inspection point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    NotInspected,
    Ok,
    NeedsAttention,
    /// Safety critical finding
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub vin: Option<String>,
    pub description: Option<String>,
    pub mileage: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerContact {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl CustomerContact {
    /// A customer is reachable when at least one channel is on file
    pub fn is_reachable(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.phone) || present(&self.email)
    }
}
