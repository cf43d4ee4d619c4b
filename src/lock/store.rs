//! Lock persistence.
//!
//! Acquisition is a single atomic check-and-set in every backend: the row is
//! taken when absent, when its lease has lapsed, or when the caller already
//! owns it. Nothing else may overwrite a live row.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A persisted lease on `lock_key`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RuntimeLock {
    pub lock_key: String,
    pub owner_id: String,
    pub acquired_at: DateTime<Utc>,
    pub heartbeat_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl RuntimeLock {
    /// Live while `expires_at > now`
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Result of one acquisition attempt
#[derive(Debug, Clone, PartialEq)]
pub struct AcquireOutcome {
    pub acquired: bool,
    /// The row as it stands after the attempt: ours on success, the other
    /// holder's otherwise
    pub current_holder: Option<RuntimeLock>,
}

#[async_trait]
pub trait LockStore: Send + Sync + std::fmt::Debug {
    async fn try_acquire(
        &self,
        lock_key: &str,
        owner_id: &str,
        ttl: Duration,
        metadata: &serde_json::Value,
    ) -> Result<AcquireOutcome>;

    /// Extend `expires_at` to now + ttl if `owner_id` still owns the row
    async fn heartbeat(&self, lock_key: &str, owner_id: &str, ttl: Duration) -> Result<bool>;

    /// Delete the row if `owner_id` owns it
    async fn release(&self, lock_key: &str, owner_id: &str) -> Result<bool>;

    async fn current(&self, lock_key: &str) -> Result<Option<RuntimeLock>>;
}

/// Clamped so `now + ttl` can never overflow a timestamp
pub(crate) fn ttl_to_chrono(ttl: Duration) -> chrono::Duration {
    let ceiling = chrono::Duration::days(36_500);
    chrono::Duration::from_std(ttl)
        .unwrap_or(ceiling)
        .min(ceiling)
}

/// Process-local lock table. Suitable for tests and single-host deployments
/// where all contenders share one process.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    rows: Mutex<HashMap<String, RuntimeLock>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_acquire(
        &self,
        lock_key: &str,
        owner_id: &str,
        ttl: Duration,
        metadata: &serde_json::Value,
    ) -> Result<AcquireOutcome> {
        let now = Utc::now();
        let expires_at = now + ttl_to_chrono(ttl);
        let mut rows = self.rows.lock();

        if let Some(existing) = rows.get(lock_key) {
            if existing.is_live_at(now) && existing.owner_id != owner_id {
                return Ok(AcquireOutcome {
                    acquired: false,
                    current_holder: Some(existing.clone()),
                });
            }
        }

        let acquired_at = rows
            .get(lock_key)
            .filter(|existing| existing.owner_id == owner_id)
            .map(|existing| existing.acquired_at)
            .unwrap_or(now);

        let lock = RuntimeLock {
            lock_key: lock_key.to_string(),
            owner_id: owner_id.to_string(),
            acquired_at,
            heartbeat_at: now,
            expires_at,
            metadata: metadata.clone(),
        };
        rows.insert(lock_key.to_string(), lock.clone());

        Ok(AcquireOutcome {
            acquired: true,
            current_holder: Some(lock),
        })
    }

    async fn heartbeat(&self, lock_key: &str, owner_id: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        let mut rows = self.rows.lock();
        match rows.get_mut(lock_key) {
            Some(lock) if lock.owner_id == owner_id => {
                lock.heartbeat_at = now;
                lock.expires_at = now + ttl_to_chrono(ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, lock_key: &str, owner_id: &str) -> Result<bool> {
        let mut rows = self.rows.lock();
        match rows.get(lock_key) {
            Some(lock) if lock.owner_id == owner_id => {
                rows.remove(lock_key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn current(&self, lock_key: &str) -> Result<Option<RuntimeLock>> {
        Ok(self.rows.lock().get(lock_key).cloned())
    }
}
