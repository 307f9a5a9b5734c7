//! # Database Migration System
//!
//! Schema migrations are compiled into the crate and applied in version order.
//! Each file is named `YYYYMMDDHHMMSS_description.sql`; applied versions are
//! tracked in `workflow_schema_migrations`.
//!
//! ## Concurrency Control
//!
//! Several engine processes may start against the same database. The runner
//! holds a session-level advisory lock on one pooled connection while it
//! applies outstanding migrations, so only one process migrates at a time and
//! the others find nothing left to do:
//!
//! ```sql
//! SELECT pg_advisory_lock(7345129001)
//! ```

use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

const MIGRATION_LOCK_KEY: i64 = 7_345_129_001;

/// Migration sources bundled with the crate: (file stem, SQL)
const BUNDLED: &[(&str, &str)] = &[(
    "20250301000000_inspection_workflow",
    include_str!("../../migrations/20250301000000_inspection_workflow.sql"),
)];

/// A single schema migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version timestamp (YYYYMMDDHHMMSS format)
    pub version: String,
    pub name: String,
    pub sql: &'static str,
}

/// Applies the bundled schema migrations.
pub struct DatabaseMigrations;

impl DatabaseMigrations {
    /// Apply every outstanding migration. Returns the versions applied.
    pub async fn run_all(pool: &PgPool) -> Result<Vec<String>, sqlx::Error> {
        let mut conn = pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        let result = Self::run_outstanding(&mut conn).await;

        // Release even when a migration failed
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *conn)
            .await?;

        result
    }

    async fn run_outstanding(conn: &mut PoolConnection<Postgres>) -> Result<Vec<String>, sqlx::Error> {
        Self::ensure_migration_table(conn).await?;
        let applied = Self::applied_versions(conn).await?;

        let mut newly_applied = Vec::new();
        for migration in Self::bundled().into_values() {
            if applied.contains(&migration.version) {
                debug!(version = %migration.version, "Migration already applied");
                continue;
            }
            info!(version = %migration.version, name = %migration.name, "Applying migration");
            sqlx::raw_sql(migration.sql).execute(&mut **conn).await?;
            Self::record_migration(conn, &migration.version).await?;
            newly_applied.push(migration.version);
        }

        Ok(newly_applied)
    }

    /// Bundled migrations keyed (and so ordered) by version
    pub fn bundled() -> BTreeMap<String, Migration> {
        BUNDLED
            .iter()
            .filter_map(|(stem, sql)| {
                Self::parse_migration_filename(stem).map(|(version, name)| {
                    (version.clone(), Migration { version, name, sql })
                })
            })
            .collect()
    }

    /// Split `YYYYMMDDHHMMSS_migration_name` into version and readable name
    fn parse_migration_filename(filename: &str) -> Option<(String, String)> {
        if filename.len() < 15 {
            return None;
        }
        let (version, rest) = filename.split_at(14);
        if !version.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let name = rest.strip_prefix('_').unwrap_or(rest).replace('_', " ");
        Some((version.to_string(), name))
    }

    async fn ensure_migration_table(conn: &mut PoolConnection<Postgres>) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(
            r#"
            CREATE TABLE IF NOT EXISTS workflow_schema_migrations (
                version VARCHAR(14) PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&mut **conn)
        .await?;
        Ok(())
    }

    async fn applied_versions(conn: &mut PoolConnection<Postgres>) -> Result<HashSet<String>, sqlx::Error> {
        let rows = sqlx::query("SELECT version FROM workflow_schema_migrations")
            .fetch_all(&mut **conn)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("version"))
            .collect())
    }

    async fn record_migration(conn: &mut PoolConnection<Postgres>, version: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO workflow_schema_migrations (version) VALUES ($1)")
            .bind(version)
            .execute(&mut **conn)
            .await?;
        Ok(())
    }
}
