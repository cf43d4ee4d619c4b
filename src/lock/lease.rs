//! Held leases and heartbeat-aware sleeping.
//!
//! A [`LockLease`] is what the scheduling loop carries between cycles. Long
//! pauses go through [`LockLease::sleep_with_heartbeat`], which sleeps in
//! bounded chunks and renews after each so the lease never silently lapses.
//! While a cycle runs, [`LockLease::keep_alive`] renews it on a ticker.

use crate::error::{OutreachError, Result};
use crate::lock::RuntimeLockManager;
use crate::logging::log_error;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Lease TTL for a loop that pauses `cycle_interval` between cycles:
/// `max(floor, cycle_interval + floor)`
pub fn lease_ttl_for(cycle_interval: Duration, floor: Duration) -> Duration {
    floor.max(cycle_interval.saturating_add(floor))
}

/// Owner identity for this process instance
pub fn default_owner_id() -> String {
    format!("pid-{}-{}", std::process::id(), uuid::Uuid::new_v4())
}

/// A runtime lock currently held by this process
#[derive(Debug)]
pub struct LockLease {
    manager: RuntimeLockManager,
    lock_key: String,
    owner_id: String,
    ttl: Duration,
    lost: bool,
}

impl LockLease {
    /// Acquire `lock_key`; `Ok(None)` when another owner holds a live lease
    pub async fn acquire(
        manager: RuntimeLockManager,
        lock_key: &str,
        owner_id: &str,
        ttl: Duration,
        metadata: serde_json::Value,
    ) -> Result<Option<LockLease>> {
        let outcome = manager.acquire(lock_key, owner_id, ttl, metadata).await?;
        if !outcome.acquired {
            return Ok(None);
        }
        Ok(Some(LockLease {
            manager,
            lock_key: lock_key.to_string(),
            owner_id: owner_id.to_string(),
            ttl,
            lost: false,
        }))
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Renew the lease or report `LockLost`
    pub async fn heartbeat(&mut self) -> Result<()> {
        if self.lost {
            return Err(self.lost_error());
        }
        if self
            .manager
            .heartbeat(&self.lock_key, &self.owner_id, self.ttl)
            .await?
        {
            Ok(())
        } else {
            self.lost = true;
            Err(self.lost_error())
        }
    }

    /// Sleep for `total`, heartbeating at least every `chunk`
    pub async fn sleep_with_heartbeat(&mut self, total: Duration, chunk: Duration) -> Result<()> {
        let chunk = if chunk.is_zero() { total } else { chunk };
        let deadline = Instant::now() + total;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            let step = chunk.min(deadline - now);
            tokio::time::sleep(step).await;
            self.heartbeat().await?;
            debug!(
                lock_key = %self.lock_key,
                slept_ms = step.as_millis() as u64,
                "💓 Lease renewed during sleep"
            );
        }
    }

    /// Heartbeat every `interval` until the lease is lost, then return the
    /// `LockLost` error. Store errors are logged and retried on the next tick.
    pub async fn keep_alive(&mut self, interval: Duration) -> OutreachError {
        let interval = interval.max(Duration::from_millis(1));
        loop {
            tokio::time::sleep(interval).await;
            match self.heartbeat().await {
                Ok(()) => debug!(lock_key = %self.lock_key, "💓 Lease renewed during cycle"),
                Err(error) if error.is_fatal_to_cycle() => return error,
                Err(error) => log_error("lock", "heartbeat", &error.to_string(), None),
            }
        }
    }

    /// Give the lock back. Safe to call after loss; returns whether a row was deleted.
    pub async fn release(self) -> Result<bool> {
        self.manager.release(&self.lock_key, &self.owner_id).await
    }

    fn lost_error(&self) -> OutreachError {
        OutreachError::LockLost {
            lock_key: self.lock_key.clone(),
            owner_id: self.owner_id.clone(),
        }
    }
}
