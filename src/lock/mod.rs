//! # Runtime Lock
//!
//! Persisted mutual exclusion with TTL leases. At most one live row exists
//! per `lock_key`; a row is live while `expires_at > now`. A crashed holder
//! stops heartbeating and its lease is reclaimed once it lapses.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use outreach_core::lock::{default_owner_id, InMemoryLockStore, LockLease, RuntimeLockManager};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> outreach_core::Result<()> {
//! let manager = RuntimeLockManager::new(Arc::new(InMemoryLockStore::new()));
//! let owner = default_owner_id();
//! if let Some(mut lease) = LockLease::acquire(
//!     manager,
//!     "automation_runner",
//!     &owner,
//!     Duration::from_secs(420),
//!     serde_json::json!({ "host": "worker-1" }),
//! )
//! .await?
//! {
//!     // ... one work cycle ...
//!     lease
//!         .sleep_with_heartbeat(Duration::from_secs(300), Duration::from_secs(30))
//!         .await?;
//!     lease.release().await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod lease;
pub mod manager;
pub mod postgres;
pub mod store;

pub use lease::{default_owner_id, lease_ttl_for, LockLease};
pub use manager::RuntimeLockManager;
pub use postgres::PgLockStore;
pub use store::{AcquireOutcome, InMemoryLockStore, LockStore, RuntimeLock};
