//! Postgres-backed [`RuleStore`].
//!
//! Each saved override is a new row keyed by (tenant, version). Each rule
//! family gets its own JSONB column so a stored version can be inspected and
//! diffed family by family. Defaults ship with the crate and are not stored.

use crate::rules::defaults::default_rule_set;
use crate::rules::overrides::TenantOverride;
use crate::rules::store::{RuleStore, RuleStoreError};
use crate::rules::types::{
    BusinessRulesOverride, EscalationRule, NotificationEvent, RuleSet, TimeoutRule, TransitionRule,
};
use crate::validation::ValidationRule;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::info;

#[derive(Debug, FromRow)]
struct OverrideRow {
    tenant_id: String,
    version: i64,
    business_rules: Json<BusinessRulesOverride>,
    extra_transitions: Json<Vec<TransitionRule>>,
    disabled_notifications: Json<Vec<NotificationEvent>>,
    custom_validation_rules: Json<Vec<ValidationRule>>,
    timeout_rules: Json<Vec<TimeoutRule>>,
    escalation_rules: Json<Vec<EscalationRule>>,
    updated_by: Option<String>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OverrideRow> for TenantOverride {
    type Error = RuleStoreError;

    fn try_from(row: OverrideRow) -> Result<Self, Self::Error> {
        let version = u64::try_from(row.version).map_err(|_| RuleStoreError::InvalidData {
            tenant_id: row.tenant_id.clone(),
            reason: format!("negative version {}", row.version),
        })?;
        Ok(Self {
            tenant_id: row.tenant_id,
            version,
            business_rules: row.business_rules.0,
            extra_transitions: row.extra_transitions.0,
            disabled_notifications: row.disabled_notifications.0,
            custom_validation_rules: row.custom_validation_rules.0,
            timeout_rules: row.timeout_rules.0,
            escalation_rules: row.escalation_rules.0,
            updated_by: row.updated_by,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgRuleStore {
    pool: PgPool,
    defaults: RuleSet,
}

impl PgRuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_defaults(pool, default_rule_set())
    }

    pub fn with_defaults(pool: PgPool, defaults: RuleSet) -> Self {
        Self { pool, defaults }
    }
}

#[async_trait]
impl RuleStore for PgRuleStore {
    async fn default_rules(&self) -> Result<RuleSet, RuleStoreError> {
        Ok(self.defaults.clone())
    }

    async fn load_override(&self, tenant_id: &str) -> Result<Option<TenantOverride>, RuleStoreError> {
        sqlx::query_as::<_, OverrideRow>(
            "SELECT * FROM tenant_rule_overrides WHERE tenant_id = $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?
        .map(TenantOverride::try_from)
        .transpose()
    }

    async fn save_override(&self, mut fragment: TenantOverride) -> Result<TenantOverride, RuleStoreError> {
        let mut tx = self.pool.begin().await?;

        // Serialize concurrent saves for the same tenant
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&fragment.tenant_id)
            .execute(&mut *tx)
            .await?;

        let latest: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM tenant_rule_overrides WHERE tenant_id = $1",
        )
        .bind(&fragment.tenant_id)
        .fetch_one(&mut *tx)
        .await?;

        fragment.version = u64::try_from(latest + 1).map_err(|_| RuleStoreError::InvalidData {
            tenant_id: fragment.tenant_id.clone(),
            reason: format!("negative version {latest}"),
        })?;
        fragment.updated_at = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO tenant_rule_overrides (
                tenant_id, version, business_rules, extra_transitions, disabled_notifications,
                custom_validation_rules, timeout_rules, escalation_rules, updated_by, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&fragment.tenant_id)
        .bind(latest + 1)
        .bind(Json(&fragment.business_rules))
        .bind(Json(&fragment.extra_transitions))
        .bind(Json(&fragment.disabled_notifications))
        .bind(Json(&fragment.custom_validation_rules))
        .bind(Json(&fragment.timeout_rules))
        .bind(Json(&fragment.escalation_rules))
        .bind(&fragment.updated_by)
        .bind(fragment.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            tenant_id = %fragment.tenant_id,
            version = fragment.version,
            "Stored tenant rule override"
        );
        Ok(fragment)
    }

    async fn override_history(&self, tenant_id: &str) -> Result<Vec<TenantOverride>, RuleStoreError> {
        sqlx::query_as::<_, OverrideRow>(
            "SELECT * FROM tenant_rule_overrides WHERE tenant_id = $1 ORDER BY version",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TenantOverride::try_from)
        .collect()
    }

    async fn tenants_with_overrides(&self) -> Result<Vec<String>, RuleStoreError> {
        Ok(sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT tenant_id FROM tenant_rule_overrides ORDER BY tenant_id",
        )
        .fetch_all(&self.pool)
        .await?)
    }
}
