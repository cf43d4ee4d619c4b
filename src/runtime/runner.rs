//! The lock-guarded scheduling loop.
//!
//! ```text
//! acquire lock ──► check admission ──► run cycle ──► sleep (heartbeating) ─┐
//!      ▲                                                                   │
//!      └────────────── held elsewhere: wait and retry ◄────────────────────┘
//! ```
//!
//! Losing the lock ends the loop: no further cycle runs on the stale
//! assumption of exclusivity.

use crate::config::RuntimeLockConfig;
use crate::error::Result;
use crate::lock::{default_owner_id, LockLease, RuntimeLockManager};
use crate::logging::log_error;
use crate::risk::{Admission, RiskController};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Identity of the running cycle, handed to the work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleContext {
    /// 1-based count of cycles started under this runner
    pub cycle: u64,
    pub lock_key: String,
    pub owner_id: String,
}

/// One unit of work that must only ever run under the runtime lock
#[async_trait]
pub trait WorkCycle: Send + Sync {
    async fn run_cycle(&self, context: &CycleContext) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub lock_key: String,
    pub lease_ttl: Duration,
    pub heartbeat_interval: Duration,
    pub cycle_interval: Duration,
}

impl From<&RuntimeLockConfig> for RunnerSettings {
    fn from(config: &RuntimeLockConfig) -> Self {
        Self {
            lock_key: config.lock_key.clone(),
            lease_ttl: config.lease_ttl(),
            heartbeat_interval: config.heartbeat_interval(),
            cycle_interval: config.cycle_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunExit {
    Shutdown,
    LockLost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub cycles_run: u64,
    pub cycles_skipped: u64,
    pub cycles_failed: u64,
    pub exit: RunExit,
}

#[derive(Debug)]
pub struct CycleRunner {
    locks: RuntimeLockManager,
    risk: Option<RiskController>,
    settings: RunnerSettings,
    owner_id: String,
}

impl CycleRunner {
    pub fn new(locks: RuntimeLockManager, settings: RunnerSettings) -> Self {
        Self {
            locks,
            risk: None,
            settings,
            owner_id: default_owner_id(),
        }
    }

    /// Consult admission before every cycle
    pub fn with_risk_controller(mut self, risk: RiskController) -> Self {
        self.risk = Some(risk);
        self
    }

    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Run cycles until `shutdown` turns true (or its sender drops) or the lock is lost.
    ///
    /// The lock is released on shutdown. Errors from the work or from admission
    /// checks are logged and counted; `LockLost`, whether reported by the work or
    /// by the heartbeat that runs alongside it, ends the loop.
    pub async fn run(
        &self,
        work: &dyn WorkCycle,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary {
            cycles_run: 0,
            cycles_skipped: 0,
            cycles_failed: 0,
            exit: RunExit::Shutdown,
        };

        let Some(mut lease) = self.acquire_with_wait(&mut shutdown).await? else {
            return Ok(summary);
        };
        info!(
            lock_key = %self.settings.lock_key,
            owner_id = %self.owner_id,
            ttl_secs = self.settings.lease_ttl.as_secs(),
            "🏃 Cycle runner holds the runtime lock"
        );

        let mut cycle = 0u64;
        loop {
            if is_shutdown(&shutdown) {
                break;
            }

            match self.admission().await {
                Ok(Admission::Allowed) => {
                    cycle += 1;
                    let context = CycleContext {
                        cycle,
                        lock_key: self.settings.lock_key.clone(),
                        owner_id: self.owner_id.clone(),
                    };
                    // The lease is renewed while the work runs; losing it drops the work
                    let outcome = tokio::select! {
                        result = work.run_cycle(&context) => result,
                        lost = lease.keep_alive(self.settings.heartbeat_interval) => Err(lost),
                    };
                    match outcome {
                        Ok(()) => summary.cycles_run += 1,
                        Err(error) if error.is_fatal_to_cycle() => {
                            warn!(
                                error = %error,
                                cycle = cycle,
                                "💔 Runtime lock lost during cycle"
                            );
                            summary.exit = RunExit::LockLost;
                            return Ok(summary);
                        }
                        Err(error) => {
                            summary.cycles_failed += 1;
                            log_error(
                                "runtime",
                                "run_cycle",
                                &error.to_string(),
                                Some(&format!("cycle {cycle}")),
                            );
                        }
                    }
                }
                Ok(admission) => {
                    summary.cycles_skipped += 1;
                    debug!(admission = ?admission, "⏭️ Cycle skipped by admission control");
                }
                Err(error) => {
                    summary.cycles_skipped += 1;
                    log_error(
                        "runtime",
                        "admission",
                        &error.to_string(),
                        Some("cycle skipped"),
                    );
                }
            }

            if is_shutdown(&shutdown) {
                break;
            }

            let slept = {
                let sleep = lease.sleep_with_heartbeat(
                    self.settings.cycle_interval,
                    self.settings.heartbeat_interval,
                );
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        result = &mut sleep => break Some(result),
                        changed = shutdown.changed() => {
                            if changed.is_err() || is_shutdown(&shutdown) {
                                break None;
                            }
                        }
                    }
                }
            };
            match slept {
                Some(Ok(())) => {}
                Some(Err(error)) if error.is_fatal_to_cycle() => {
                    summary.exit = RunExit::LockLost;
                    return Ok(summary);
                }
                Some(Err(error)) => {
                    // Store trouble during a heartbeat; retry on the next pass
                    log_error("runtime", "heartbeat", &error.to_string(), None);
                }
                None => break,
            }
        }

        lease.release().await?;
        info!(
            cycles_run = summary.cycles_run,
            cycles_skipped = summary.cycles_skipped,
            "🛑 Cycle runner stopped and released the runtime lock"
        );
        Ok(summary)
    }

    async fn admission(&self) -> Result<Admission> {
        match &self.risk {
            Some(risk) => risk.admission().await,
            None => Ok(Admission::Allowed),
        }
    }

    /// Poll for the lock every heartbeat interval; `None` if shut down first
    async fn acquire_with_wait(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<LockLease>> {
        loop {
            if is_shutdown(shutdown) {
                return Ok(None);
            }
            let metadata = serde_json::json!({
                "pid": std::process::id(),
                "started_at": chrono::Utc::now().to_rfc3339(),
            });
            if let Some(lease) = LockLease::acquire(
                self.locks.clone(),
                &self.settings.lock_key,
                &self.owner_id,
                self.settings.lease_ttl,
                metadata,
            )
            .await?
            {
                return Ok(Some(lease));
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.heartbeat_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

fn is_shutdown(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}
