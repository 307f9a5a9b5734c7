//! # Principals and Roles
//!
//! The acting principal for a transition is supplied by the calling API/auth
//! layer through [`AuthorizationContext`]; the engine only ever sees the
//! resolved [`Principal`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier used for the background sweep principal
pub const SYSTEM_PRINCIPAL_ID: &str = "system";

/// Shop roles known to the rule tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Mechanic,
    ServiceAdvisor,
    ShopManager,
    Owner,
    Admin,
    /// Background scheduler acting on its own
    System,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Self::Mechanic,
        Self::ServiceAdvisor,
        Self::ShopManager,
        Self::Owner,
        Self::Admin,
        Self::System,
    ];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mechanic => write!(f, "mechanic"),
            Self::ServiceAdvisor => write!(f, "service_advisor"),
            Self::ShopManager => write!(f, "shop_manager"),
            Self::Owner => write!(f, "owner"),
            Self::Admin => write!(f, "admin"),
            Self::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mechanic" => Ok(Self::Mechanic),
            "service_advisor" => Ok(Self::ServiceAdvisor),
            "shop_manager" => Ok(Self::ShopManager),
            "owner" => Ok(Self::Owner),
            "admin" => Ok(Self::Admin),
            "system" => Ok(Self::System),
            _ => Err(format!("Invalid role: {s}")),
        }
    }
}

/// Identity facts the auth layer hands to the engine
pub trait AuthorizationContext {
    fn principal_id(&self) -> &str;
    fn role(&self) -> Role;
    fn tenant_id(&self) -> &str;
}

/// The acting principal for one engine call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
    pub tenant_id: String,
}

impl Principal {
    pub fn new(id: impl Into<String>, role: Role, tenant_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            tenant_id: tenant_id.into(),
        }
    }

    /// Principal used by the escalation and timeout sweeps
    pub fn system(tenant_id: impl Into<String>) -> Self {
        Self::new(SYSTEM_PRINCIPAL_ID, Role::System, tenant_id)
    }

    pub fn from_context(context: &impl AuthorizationContext) -> Self {
        Self::new(context.principal_id(), context.role(), context.tenant_id())
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    /// Actor id recorded in history; system actions are unattributed
    pub fn actor_id(&self) -> Option<String> {
        if self.is_system() {
            None
        } else {
            Some(self.id.clone())
        }
    }
}

impl AuthorizationContext for Principal {
    fn principal_id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> Role {
        self.role
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}
