//! # Database
//!
//! Postgres pool creation and the schema migration runner.
//!
//! - [`connection`] - pool setup from [`DatabaseConfig`](crate::config::DatabaseConfig)
//! - [`migrations`] - versioned SQL migrations guarded by an advisory lock
//!
//! ```rust,no_run
//! use outreach_core::config::DatabaseConfig;
//! use outreach_core::database::{DatabaseConnection, DatabaseMigrations};
//!
//! # async fn example() -> outreach_core::Result<()> {
//! let db = DatabaseConnection::new(&DatabaseConfig::default()).await?;
//! DatabaseMigrations::run_all(db.pool()).await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod migrations;

pub use connection::DatabaseConnection;
pub use migrations::{DatabaseMigrations, Migration};
