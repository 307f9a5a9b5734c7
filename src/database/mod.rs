//! # Database Operations
//!
//! Storage backends for the workflow engine.
//!
//! - [`memory`] - process-local stores for tests and single-node use
//! - [`postgres`] / [`rule_store`] - Postgres stores over the bundled schema
//! - [`migrations`] - bundled schema migrations with advisory locking
//! - [`connection`] - pool setup from [`crate::config::DatabaseConfig`]
//!
//! The Postgres schema enforces the single-pending-review rule with a partial
//! unique index and keeps history append-only with a trigger that rejects
//! `UPDATE` and `DELETE`.

pub mod connection;
pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod rule_store;

pub use connection::DatabaseConnection;
pub use memory::InMemoryWorkflowStore;
pub use migrations::DatabaseMigrations;
pub use postgres::PgWorkflowStore;
pub use rule_store::PgRuleStore;
