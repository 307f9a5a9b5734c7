//! # Engine Configuration
//!
//! Runtime settings for the workflow engine: database pool, sweep scheduling,
//! event channel sizing, rule caching and logging. Business rules themselves
//! are not configured here; they live in the rule store (see [`crate::rules`]).
//!
//! ## Sources
//!
//! Layered by [`ConfigLoader`], later sources winning:
//!
//! 1. Built-in defaults
//! 2. `config/workflow.toml`
//! 3. `config/workflow.<environment>.toml`
//! 4. `WORKFLOW__*` environment variables (e.g. `WORKFLOW__DATABASE__URL`)
//!
//! ```rust,no_run
//! use inspection_workflow::config::ConfigLoader;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?;
//! let interval = config.scheduler.sweep_interval();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub events: EventsConfig,
    pub rules: RulesConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection URL; unset means in-memory stores
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    /// Apply bundled migrations on connect
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_seconds: 30,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

/// Background sweep settings shared by escalation and timeout sweeps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub sweep_interval_seconds: u64,
    /// Records processed in parallel within one sweep
    pub max_concurrent_records: usize,
    /// A record that takes longer is skipped and retried next sweep
    pub per_record_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 60,
            max_concurrent_records: 8,
            per_record_timeout_ms: 5_000,
        }
    }
}

impl SchedulerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn per_record_timeout(&self) -> Duration {
        Duration::from_millis(self.per_record_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Cache merged per-tenant configuration until an override is saved
    pub cache_enabled: bool,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self { cache_enabled: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence
    pub level: Option<String>,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl EngineConfig {
    /// Validate configuration for consistency and required fields
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(url) = &self.database.url {
            if url.trim().is_empty() {
                return Err(ConfigurationError::missing_required_field(
                    "database.url",
                    "database configuration",
                ));
            }
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool size must be greater than 0",
            ));
        }

        if self.scheduler.sweep_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.sweep_interval_seconds",
                "0",
                "sweep interval must be greater than 0",
            ));
        }

        if self.scheduler.max_concurrent_records == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.max_concurrent_records",
                "0",
                "at least one record must be processed at a time",
            ));
        }

        if self.scheduler.per_record_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "scheduler.per_record_timeout_ms",
                "0",
                "per-record timeout must be greater than 0",
            ));
        }

        if self.events.channel_capacity == 0 {
            return Err(ConfigurationError::invalid_value(
                "events.channel_capacity",
                "0",
                "broadcast channel capacity must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.database.url.is_none());
        assert_eq!(config.scheduler.sweep_interval(), Duration::from_secs(60));
        assert!(config.rules.cache_enabled);
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let mut config = EngineConfig::default();
        config.scheduler.max_concurrent_records = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "scheduler.max_concurrent_records"
        ));

        let mut config = EngineConfig::default();
        config.database.url = Some("  ".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingRequiredField { .. })
        ));
    }
}
