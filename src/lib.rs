#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Outreach Core
//!
//! Reliability backbone for a browser-automation outreach runtime.
//!
//! ## Overview
//!
//! The automation workers that drive browser sessions are not in this crate.
//! What lives here is everything they lean on to run safely for days at a time:
//! a single-writer runtime lock with heartbeats, a rotating proxy pool with
//! cooldowns and sticky sessions, a risk controller that throttles or pauses
//! work, circuit breakers and retries around every outbound call, and a
//! transactional outbox that delivers events to a webhook at least once.
//!
//! ## Module Organization
//!
//! - [`lock`] - runtime lock manager and heartbeat leases
//! - [`proxy`] - proxy pool, failover chains and sticky sessions
//! - [`risk`] - risk scoring, admission and pause/quarantine flags
//! - [`resilience`] - backoff, circuit breakers, retry policy, guarded HTTP client
//! - [`outbox`] - outbox store and delivery engine
//! - [`runtime`] - the lock-guarded scheduling loop
//! - [`alerting`] - alert interface for operator notifications
//! - [`config`] - configuration management
//! - [`database`] - Postgres pool and migrations
//! - [`error`] - structured error handling
//! - [`logging`] - structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use outreach_core::config::ConfigManager;
//! use outreach_core::database::{DatabaseConnection, DatabaseMigrations};
//! use outreach_core::lock::{PgLockStore, RuntimeLockManager};
//! use outreach_core::runtime::{CycleContext, CycleRunner, RunnerSettings, WorkCycle};
//! use std::sync::Arc;
//!
//! #[derive(Debug)]
//! struct Campaign;
//!
//! #[async_trait::async_trait]
//! impl WorkCycle for Campaign {
//!     async fn run_cycle(&self, ctx: &CycleContext) -> outreach_core::Result<()> {
//!         tracing::info!(cycle = ctx.cycle, "sending invites");
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! outreach_core::logging::init_structured_logging();
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//!
//! let db = DatabaseConnection::new(&config.database).await?;
//! DatabaseMigrations::run_all(db.pool()).await?;
//!
//! let locks = RuntimeLockManager::new(Arc::new(PgLockStore::new(db.pool().clone())));
//! let runner = CycleRunner::new(locks, RunnerSettings::from(&config.runtime_lock));
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! let summary = runner.run(&Campaign, shutdown_rx).await?;
//! println!("ran {} cycles", summary.cycles_run);
//! # Ok(())
//! # }
//! ```

pub mod alerting;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod lock;
pub mod logging;
pub mod outbox;
pub mod proxy;
pub mod resilience;
pub mod risk;
pub mod runtime;

pub use error::{OutreachError, Result};
