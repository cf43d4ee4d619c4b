//! # Outbox Delivery Engine
//!
//! Drains ready outbox events into an [`EventSink`] with at-least-once
//! semantics. Failed attempts are rescheduled on the shared exponential
//! backoff curve keyed on the event's attempt count; an event becomes FAILED
//! once `attempts >= max_retries`.

use crate::alerting::{Alert, AlertSeverity, AlertSink};
use crate::config::OutboxConfig;
use crate::error::{OutreachError, Result};
use crate::logging::{log_delivery_operation, log_error};
use crate::outbox::event::{OutboxEvent, OutboxStatus};
use crate::outbox::sink::EventSink;
use crate::outbox::store::OutboxStore;
use crate::resilience::BackoffConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Outcome counts for one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub sent: usize,
    /// Failed attempts, permanent ones included
    pub failed: usize,
    pub permanent_failures: usize,
    /// Left untouched because the sink's circuit was open
    pub deferred: usize,
}

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub max_retries: u32,
    pub batch_size: u32,
    pub backlog_alert_threshold: u64,
    pub backoff: BackoffConfig,
    pub drain_interval: Duration,
    /// How long a fetched event stays invisible to other drains
    pub claim_timeout: Duration,
}

impl From<&OutboxConfig> for DeliverySettings {
    fn from(config: &OutboxConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            batch_size: config.batch_size.max(1),
            backlog_alert_threshold: config.backlog_alert_threshold,
            backoff: config.backoff(),
            drain_interval: config.drain_interval(),
            claim_timeout: config.claim_timeout(),
        }
    }
}

#[derive(Debug)]
pub struct OutboxDeliveryEngine {
    store: Arc<dyn OutboxStore>,
    sink: Arc<dyn EventSink>,
    alerts: Arc<dyn AlertSink>,
    settings: DeliverySettings,
    backlog_alerted: AtomicBool,
}

impl OutboxDeliveryEngine {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        sink: Arc<dyn EventSink>,
        alerts: Arc<dyn AlertSink>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            store,
            sink,
            alerts,
            settings,
            backlog_alerted: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    /// Deliver up to `batch_size` ready events, oldest first, then check the backlog
    pub async fn drain_once(&self, batch_size: u32) -> Result<DrainReport> {
        let now = Utc::now();
        let claim_until = now + to_chrono(self.settings.claim_timeout);
        let events = self.store.fetch_ready(batch_size, now, claim_until).await?;
        let mut report = DrainReport::default();

        for (index, event) in events.iter().enumerate() {
            match self.sink.deliver(event).await {
                Ok(()) => {
                    self.store.mark_delivered(event.id, Utc::now()).await?;
                    report.sent += 1;
                    log_delivery_operation(
                        "deliver",
                        event.id,
                        &event.topic,
                        event.attempts + 1,
                        "delivered",
                        None,
                    );
                }
                Err(error) if error.is_circuit_open() => {
                    // The rest of the batch would fail fast as well
                    report.deferred = events.len() - index;
                    for deferred in &events[index..] {
                        self.store.reschedule(deferred.id, now).await?;
                    }
                    debug!(
                        event_id = event.id,
                        deferred = report.deferred,
                        "⛔ Sink circuit open, deferring remaining batch"
                    );
                    break;
                }
                Err(error) => {
                    report.failed += 1;
                    if self.record_failure(event, &error.to_string(), now).await? {
                        report.permanent_failures += 1;
                    }
                }
            }
        }

        self.check_backlog().await?;

        if !events.is_empty() {
            info!(
                sent = report.sent,
                failed = report.failed,
                permanent_failures = report.permanent_failures,
                deferred = report.deferred,
                "📬 Outbox drain complete"
            );
        }
        Ok(report)
    }

    /// Returns whether the event became FAILED
    async fn record_failure(
        &self,
        event: &OutboxEvent,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let expected_attempts = event.attempts.saturating_add(1).max(1) as u32;
        let delay = self.settings.backoff.delay_for(expected_attempts);
        let retry_at = now + to_chrono(delay);

        let Some(updated) = self
            .store
            .record_failure(event.id, reason, retry_at, self.settings.max_retries)
            .await?
        else {
            // Already terminal; another drain recorded the outcome
            return Ok(false);
        };

        if updated.status == OutboxStatus::Failed {
            let failure = OutreachError::PermanentDeliveryFailure {
                event_id: updated.id,
                attempts: updated.attempts,
                reason: reason.to_string(),
            };
            log_error(
                "outbox",
                "deliver",
                &failure.to_string(),
                Some(&format!("topic {}", updated.topic)),
            );
            self.alerts
                .send_alert(Alert::new(
                    AlertSeverity::Error,
                    "Outbox delivery failed",
                    format!(
                        "Event {} on topic {} gave up after {} attempts: {reason}",
                        updated.id, updated.topic, updated.attempts
                    ),
                ))
                .await;
            return Ok(true);
        }

        log_delivery_operation(
            "deliver",
            updated.id,
            &updated.topic,
            updated.attempts,
            "retry_scheduled",
            Some(&format!("retry in {}ms: {reason}", delay.as_millis())),
        );
        Ok(false)
    }

    /// Alert once when the pending count rises above the threshold; re-arms
    /// after it falls back to or below it
    pub async fn check_backlog(&self) -> Result<u64> {
        let pending = self.store.count_pending().await?;
        let threshold = self.settings.backlog_alert_threshold;

        if pending > threshold {
            if !self.backlog_alerted.swap(true, Ordering::SeqCst) {
                warn!(
                    pending = pending,
                    threshold = threshold,
                    "📈 Outbox backlog above threshold"
                );
                self.alerts
                    .send_alert(Alert::new(
                        AlertSeverity::Warning,
                        "Outbox backlog",
                        format!("{pending} events pending delivery (threshold {threshold})"),
                    ))
                    .await;
            }
        } else {
            self.backlog_alerted.store(false, Ordering::SeqCst);
        }
        Ok(pending)
    }

    /// Drain every `drain_interval` until `shutdown` turns true or its sender drops
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            interval_ms = self.settings.drain_interval.as_millis() as u64,
            batch_size = self.settings.batch_size,
            "🚀 Outbox delivery engine started"
        );
        let period = self.settings.drain_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.drain_once(self.settings.batch_size).await {
                        log_error("outbox", "drain", &error.to_string(), None);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("🛑 Outbox delivery engine stopped");
        Ok(())
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::hours(1))
}
