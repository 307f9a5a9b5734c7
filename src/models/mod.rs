pub mod history_entry;
pub mod inspection;
pub mod principal;
pub mod workflow_record;

// Re-export core models for easy access
pub use history_entry::HistoryEntry;
pub use inspection::{
    CustomerContact, Inspection, InspectionItem, InspectionSnapshot, ItemStatus, VehicleInfo,
};
pub use principal::{AuthorizationContext, Principal, Role, SYSTEM_PRINCIPAL_ID};
pub use workflow_record::{Assignee, WorkflowRecord};
