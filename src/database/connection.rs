use crate::config::DatabaseConfig;
use crate::config::loader::redact_url;
use crate::database::migrations::DatabaseMigrations;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;

/// Pooled Postgres connection for the workflow stores
pub struct DatabaseConnection {
    pool: PgPool,
}

impl DatabaseConnection {
    /// Connect using `config`, applying bundled migrations when enabled
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(url)
            .await?;

        info!(
            database = %redact_url(url),
            max_connections = config.max_connections,
            "Database pool established"
        );

        if config.run_migrations {
            let applied = DatabaseMigrations::run_all(&pool).await?;
            info!(applied = ?applied, "Schema migrations complete");
        }

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 as health")
            .fetch_one(&self.pool)
            .await?;
        let health: i32 = row.get("health");
        Ok(health == 1)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
