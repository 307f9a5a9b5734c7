//! # Config Resolver
//!
//! [`merge`] is the pure composition of the default rule set with one tenant
//! override. [`ConfigResolver`] wraps it with a per-tenant cache that is
//! invalidated synchronously by [`ConfigResolver::save_override`], so a
//! transition is never authorized against a superseded configuration.

use super::effective::{EffectiveConfig, TransitionTable};
use super::overrides::TenantOverride;
use super::store::RuleStore;
use super::types::RuleSet;
use super::validate::{validate, ConfigValidation};
use super::{RuleError, RuleResult};
use crate::state_machine::guards::ConditionRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Compose the default rule set with an optional tenant override.
///
/// Without an override the defaults are returned untouched.
pub fn merge(defaults: &RuleSet, tenant: Option<&TenantOverride>) -> EffectiveConfig {
    let Some(tenant) = tenant else {
        return EffectiveConfig {
            tenant_id: None,
            override_version: None,
            business_rules: defaults.business_rules.clone(),
            transitions: TransitionTable::from_rules(&defaults.transitions),
            validation_rules: defaults.validation_rules.clone(),
            timeout_rules: defaults.timeout_rules.clone(),
            escalation_rules: defaults.escalation_rules.clone(),
            notifications: defaults.notifications.clone(),
        };
    };

    let mut transitions = TransitionTable::from_rules(&defaults.transitions);
    for extra in &tenant.extra_transitions {
        transitions.insert_or_absorb(extra);
    }

    let mut validation_rules = defaults.validation_rules.clone();
    for custom in &tenant.custom_validation_rules {
        match validation_rules.iter_mut().find(|rule| rule.id == custom.id) {
            Some(existing) => *existing = custom.clone(),
            None => validation_rules.push(custom.clone()),
        }
    }

    let mut timeout_rules = defaults.timeout_rules.clone();
    for replacement in &tenant.timeout_rules {
        match timeout_rules.iter_mut().find(|rule| rule.state == replacement.state) {
            Some(existing) => *existing = replacement.clone(),
            None => timeout_rules.push(replacement.clone()),
        }
    }

    let mut escalation_rules = defaults.escalation_rules.clone();
    for replacement in &tenant.escalation_rules {
        match escalation_rules
            .iter_mut()
            .find(|rule| rule.priority == replacement.priority)
        {
            Some(existing) => *existing = replacement.clone(),
            None => escalation_rules.push(replacement.clone()),
        }
    }

    let notifications = defaults
        .notifications
        .iter()
        .filter(|rule| !tenant.disabled_notifications.contains(&rule.event))
        .cloned()
        .collect();

    EffectiveConfig {
        tenant_id: Some(tenant.tenant_id.clone()),
        override_version: Some(tenant.version),
        business_rules: tenant.business_rules.apply_to(&defaults.business_rules),
        transitions,
        validation_rules,
        timeout_rules,
        escalation_rules,
        notifications,
    }
}

/// Caching resolver over a [`RuleStore`]
pub struct ConfigResolver {
    store: Arc<dyn RuleStore>,
    registry: Arc<ConditionRegistry>,
    cache: DashMap<String, Arc<EffectiveConfig>>,
    cache_enabled: bool,
    /// Resolutions hold it shared, override writes exclusively
    write_gate: RwLock<()>,
}

impl std::fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("cached_tenants", &self.cache.len())
            .field("cache_enabled", &self.cache_enabled)
            .finish()
    }
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn RuleStore>, registry: Arc<ConditionRegistry>, cache_enabled: bool) -> Self {
        Self {
            store,
            registry,
            cache: DashMap::new(),
            cache_enabled,
            write_gate: RwLock::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<ConditionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    /// Effective configuration for `tenant_id`
    #[instrument(skip(self))]
    pub async fn resolve(&self, tenant_id: &str) -> RuleResult<Arc<EffectiveConfig>> {
        if self.cache_enabled {
            if let Some(hit) = self.cache.get(tenant_id) {
                return Ok(Arc::clone(hit.value()));
            }
        }

        let _gate = self.write_gate.read().await;
        let defaults = self.store.default_rules().await?;
        let tenant = self.store.load_override(tenant_id).await?;
        let config = Arc::new(merge(&defaults, tenant.as_ref()));

        if self.cache_enabled {
            self.cache.insert(tenant_id.to_string(), Arc::clone(&config));
        }
        debug!(
            tenant_id = tenant_id,
            override_version = ?config.override_version,
            "Resolved effective configuration"
        );
        Ok(config)
    }

    /// Defaults alone, as seen by a tenant with no override
    pub async fn resolve_default(&self) -> RuleResult<EffectiveConfig> {
        let defaults = self.store.default_rules().await?;
        Ok(merge(&defaults, None))
    }

    /// Check what `fragment` would produce without saving it
    pub async fn validate_override(&self, fragment: &TenantOverride) -> RuleResult<ConfigValidation> {
        let defaults = self.store.default_rules().await?;
        Ok(validate(&merge(&defaults, Some(fragment)), &self.registry))
    }

    /// Validate, persist and invalidate; an invalid fragment is never stored
    #[instrument(skip(self, fragment), fields(tenant_id = %fragment.tenant_id))]
    pub async fn save_override(&self, fragment: TenantOverride) -> RuleResult<TenantOverride> {
        let _gate = self.write_gate.write().await;

        let defaults = self.store.default_rules().await?;
        let report = validate(&merge(&defaults, Some(&fragment)), &self.registry);
        if !report.is_valid() {
            warn!(
                tenant_id = %fragment.tenant_id,
                errors = ?report.errors,
                "Rejected invalid tenant override"
            );
            return Err(RuleError::ConfigInvalid {
                tenant_id: fragment.tenant_id,
                errors: report.errors,
            });
        }

        let saved = self.store.save_override(fragment).await?;
        self.invalidate(&saved.tenant_id);
        info!(
            tenant_id = %saved.tenant_id,
            version = saved.version,
            "Saved tenant override"
        );
        Ok(saved)
    }

    /// Drop the cached configuration for `tenant_id`
    pub fn invalidate(&self, tenant_id: &str) {
        if self.cache.remove(tenant_id).is_some() {
            debug!(tenant_id = tenant_id, "Invalidated cached configuration");
        }
    }

    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Tenants whose configuration differs from the defaults
    pub async fn tenants_with_overrides(&self) -> RuleResult<Vec<String>> {
        Ok(self.store.tenants_with_overrides().await?)
    }
}
