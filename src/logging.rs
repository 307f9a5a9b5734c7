//! # Structured Logging Module
//!
//! Environment-aware structured logging for the workflow engine. Console
//! output is human readable by default and switches to JSON lines when
//! configured, so sweep and transition records can be shipped as-is.

use crate::config::LoggingConfig;
use crate::state_machine::states::InspectionState;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific defaults
pub fn init_structured_logging() {
    init_with_config(&LoggingConfig::default());
}

/// Initialize structured logging once; later calls are no-ops
pub fn init_with_config(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = std::env::var("RUST_LOG")
            .ok()
            .or_else(|| config.level.clone())
            .unwrap_or_else(|| get_log_level(&environment).to_string());

        let layer = if config.json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(EnvFilter::new(filter.clone()))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(filter.clone()))
                .boxed()
        };

        // Another subscriber (e.g. a host application) may already be installed
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            environment = %environment,
            filter = %filter,
            json = config.json,
            "STRUCTURED LOGGING: Initialized"
        );
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var("WORKFLOW_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log one committed or refused transition attempt
pub fn log_transition(
    subject_id: Uuid,
    tenant_id: &str,
    from: InspectionState,
    to: InspectionState,
    actor_id: Option<&str>,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        subject_id = %subject_id,
        tenant_id = %tenant_id,
        from = %from,
        to = %to,
        actor_id = actor_id.unwrap_or("system"),
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "TRANSITION"
    );
}

/// Log the summary of one sweep pass
pub fn log_sweep(
    sweep: &str,
    candidates: usize,
    fired: usize,
    skipped: usize,
    errors: usize,
    duration_ms: u64,
) {
    tracing::info!(
        sweep = %sweep,
        candidates = candidates,
        fired = fired,
        skipped = skipped,
        errors = errors,
        duration_ms = duration_ms,
        timestamp = %Utc::now().to_rfc3339(),
        "SWEEP"
    );
}

/// Log error with full context
pub fn log_error(component: &str, operation: &str, error: &str, context: Option<&str>) {
    tracing::error!(
        component = %component,
        operation = %operation,
        error = %error,
        context = context,
        timestamp = %Utc::now().to_rfc3339(),
        "ERROR"
    );
}
