//! Runtime lock manager: the single-writer guarantee for the scheduling loop.

use crate::error::Result;
use crate::lock::store::{AcquireOutcome, LockStore, RuntimeLock};
use crate::logging::log_lock_operation;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct RuntimeLockManager {
    store: Arc<dyn LockStore>,
}

impl RuntimeLockManager {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    /// Take `lock_key` for `owner_id` unless another owner holds a live lease
    pub async fn acquire(
        &self,
        lock_key: &str,
        owner_id: &str,
        ttl: Duration,
        metadata: serde_json::Value,
    ) -> Result<AcquireOutcome> {
        let outcome = self
            .store
            .try_acquire(lock_key, owner_id, ttl, &metadata)
            .await?;

        if outcome.acquired {
            log_lock_operation("acquire", lock_key, owner_id, "acquired", None);
        } else {
            let holder = outcome
                .current_holder
                .as_ref()
                .map(|lock| lock.owner_id.as_str());
            log_lock_operation("acquire", lock_key, owner_id, "held_elsewhere", holder);
        }

        Ok(outcome)
    }

    /// Renew the lease. `false` means ownership is gone and the caller must stop.
    pub async fn heartbeat(&self, lock_key: &str, owner_id: &str, ttl: Duration) -> Result<bool> {
        let renewed = self.store.heartbeat(lock_key, owner_id, ttl).await?;
        if !renewed {
            warn!(
                lock_key = %lock_key,
                owner_id = %owner_id,
                "💔 Heartbeat rejected, runtime lock ownership lost"
            );
        }
        Ok(renewed)
    }

    /// Release the lock if `owner_id` holds it; a no-op otherwise
    pub async fn release(&self, lock_key: &str, owner_id: &str) -> Result<bool> {
        let released = self.store.release(lock_key, owner_id).await?;
        let status = if released { "released" } else { "not_owner" };
        log_lock_operation("release", lock_key, owner_id, status, None);
        Ok(released)
    }

    pub async fn current_holder(&self, lock_key: &str) -> Result<Option<RuntimeLock>> {
        self.store.current(lock_key).await
    }
}
