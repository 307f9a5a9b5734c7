use super::defaults::default_rule_set;
use super::overrides::TenantOverride;
use super::types::RuleSet;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuleStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid stored override for tenant {tenant_id}: {reason}")]
    InvalidData { tenant_id: String, reason: String },
}

/// Source of the default rule set and versioned tenant overrides
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn default_rules(&self) -> Result<RuleSet, RuleStoreError>;

    /// Latest override for the tenant, if any
    async fn load_override(&self, tenant_id: &str) -> Result<Option<TenantOverride>, RuleStoreError>;

    /// Persist `fragment` as the tenant's next version and return it as stored
    async fn save_override(&self, fragment: TenantOverride) -> Result<TenantOverride, RuleStoreError>;

    /// Every stored version, oldest first
    async fn override_history(&self, tenant_id: &str) -> Result<Vec<TenantOverride>, RuleStoreError>;

    async fn tenants_with_overrides(&self) -> Result<Vec<String>, RuleStoreError>;
}

/// Process-local rule store
#[derive(Debug)]
pub struct InMemoryRuleStore {
    defaults: RuleSet,
    overrides: RwLock<HashMap<String, Vec<TenantOverride>>>,
}

impl InMemoryRuleStore {
    pub fn new(defaults: RuleSet) -> Self {
        Self {
            defaults,
            overrides: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRuleStore {
    fn default() -> Self {
        Self::new(default_rule_set())
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn default_rules(&self) -> Result<RuleSet, RuleStoreError> {
        Ok(self.defaults.clone())
    }

    async fn load_override(&self, tenant_id: &str) -> Result<Option<TenantOverride>, RuleStoreError> {
        Ok(self
            .overrides
            .read()
            .get(tenant_id)
            .and_then(|versions| versions.last().cloned()))
    }

    async fn save_override(&self, mut fragment: TenantOverride) -> Result<TenantOverride, RuleStoreError> {
        let mut overrides = self.overrides.write();
        let versions = overrides.entry(fragment.tenant_id.clone()).or_default();
        fragment.version = versions.last().map_or(1, |latest| latest.version + 1);
        fragment.updated_at = Utc::now();
        versions.push(fragment.clone());
        Ok(fragment)
    }

    async fn override_history(&self, tenant_id: &str) -> Result<Vec<TenantOverride>, RuleStoreError> {
        Ok(self
            .overrides
            .read()
            .get(tenant_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn tenants_with_overrides(&self) -> Result<Vec<String>, RuleStoreError> {
        let mut tenants: Vec<String> = self.overrides.read().keys().cloned().collect();
        tenants.sort();
        Ok(tenants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_versions_increment_per_tenant() {
        let store = InMemoryRuleStore::default();
        let first = store.save_override(TenantOverride::new("shop-1")).await.unwrap();
        let second = store.save_override(TenantOverride::new("shop-1")).await.unwrap();
        let other = store.save_override(TenantOverride::new("shop-2")).await.unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(other.version, 1);

        let latest = store.load_override("shop-1").await.unwrap().unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(store.override_history("shop-1").await.unwrap().len(), 2);
        assert_eq!(
            store.tenants_with_overrides().await.unwrap(),
            vec!["shop-1".to_string(), "shop-2".to_string()]
        );
        assert!(store.load_override("shop-3").await.unwrap().is_none());
    }
}
