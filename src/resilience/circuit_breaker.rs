//! # Circuit Breaker Implementation
//!
//! Fault isolation for outbound integrations. One breaker exists per circuit key
//! and follows the classic three states: Closed (normal operation), Open
//! (failing fast until `opened_until`), and Half-Open (one probing call).

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - exactly one probing call is in flight
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

#[derive(Debug, Default)]
struct BreakerCounters {
    /// Consecutive failures while closed
    failure_count: u64,
    opened_until: Option<Instant>,
    probe_started_at: Option<Instant>,
    total_calls: u64,
    success_count: u64,
    total_failures: u64,
    rejected_count: u64,
}

/// Core circuit breaker implementation with atomic state management
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Circuit key for logging and metrics
    name: String,

    /// Current circuit state (atomic for lock-free reads)
    state: AtomicU8,

    config: CircuitBreakerConfig,

    counters: Mutex<BreakerCounters>,
}

impl CircuitBreaker {
    pub fn new(name: String, config: CircuitBreakerConfig) -> Self {
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            open_ms = config.open_duration.as_millis() as u64,
            "🛡️ Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            counters: Mutex::new(BreakerCounters::default()),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.try_acquire().await {
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        }

        let result = operation().await;

        match &result {
            Ok(_) => self.record_success().await,
            Err(_) => self.record_failure().await,
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Ask permission for one call. Returns false when the caller must fail fast.
    ///
    /// Once the open window has elapsed the first caller becomes the half-open
    /// probe; everyone else keeps failing fast until the probe reports back.
    pub async fn try_acquire(&self) -> bool {
        let mut counters = self.counters.lock().await;
        let now = Instant::now();

        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => match counters.opened_until {
                Some(until) if now < until => {
                    counters.rejected_count += 1;
                    false
                }
                _ => {
                    counters.probe_started_at = Some(now);
                    self.state
                        .store(CircuitState::HalfOpen as u8, Ordering::Release);
                    info!(
                        component = %self.name,
                        "🟡 Circuit breaker half-open (probing recovery)"
                    );
                    true
                }
            },
            CircuitState::HalfOpen => {
                // A probe that never reported back (dropped future) must not wedge the breaker
                let stale_probe = counters
                    .probe_started_at
                    .map(|started| now.duration_since(started) >= self.config.open_duration)
                    .unwrap_or(true);
                if stale_probe {
                    warn!(
                        component = %self.name,
                        "Half-open probe went silent, admitting a new probe"
                    );
                    counters.probe_started_at = Some(now);
                    true
                } else {
                    counters.rejected_count += 1;
                    false
                }
            }
        }
    }

    /// Record a successful operation
    pub async fn record_success(&self) {
        let mut counters = self.counters.lock().await;
        counters.total_calls += 1;
        counters.success_count += 1;
        counters.failure_count = 0;

        debug!(component = %self.name, "🟢 Operation succeeded");

        if self.state() != CircuitState::Closed {
            counters.opened_until = None;
            counters.probe_started_at = None;
            self.state.store(CircuitState::Closed as u8, Ordering::Release);
            info!(
                component = %self.name,
                total_calls = counters.total_calls,
                "🟢 Circuit breaker closed (recovered)"
            );
        }
    }

    /// Record a failed operation
    pub async fn record_failure(&self) {
        let mut counters = self.counters.lock().await;
        counters.total_calls += 1;
        counters.total_failures += 1;

        match self.state() {
            CircuitState::Closed => {
                counters.failure_count += 1;
                warn!(
                    component = %self.name,
                    consecutive_failures = counters.failure_count,
                    "🔴 Operation failed"
                );
                if counters.failure_count >= self.config.failure_threshold as u64 {
                    self.open(&mut counters);
                }
            }
            CircuitState::HalfOpen => {
                // Failed probe re-opens for a full window
                counters.failure_count += 1;
                self.open(&mut counters);
            }
            CircuitState::Open => {}
        }
    }

    fn open(&self, counters: &mut BreakerCounters) {
        counters.opened_until = Some(Instant::now() + self.config.open_duration);
        counters.probe_started_at = None;
        self.state.store(CircuitState::Open as u8, Ordering::Release);

        error!(
            component = %self.name,
            consecutive_failures = counters.failure_count,
            failure_threshold = self.config.failure_threshold,
            open_ms = self.config.open_duration.as_millis() as u64,
            "🔴 Circuit breaker opened (failing fast)"
        );
    }

    /// Force circuit to open state (for emergency situations)
    pub async fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        let mut counters = self.counters.lock().await;
        self.open(&mut counters);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub async fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        let mut counters = self.counters.lock().await;
        counters.failure_count = 0;
        counters.opened_until = None;
        counters.probe_started_at = None;
        self.state.store(CircuitState::Closed as u8, Ordering::Release);
    }

    /// Get current metrics snapshot
    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        let counters = self.counters.lock().await;
        let now = Instant::now();
        let state = self.state();

        CircuitBreakerMetrics {
            total_calls: counters.total_calls,
            success_count: counters.success_count,
            failure_count: counters.total_failures,
            rejected_count: counters.rejected_count,
            consecutive_failures: counters.failure_count,
            open_remaining: match state {
                CircuitState::Open => counters
                    .opened_until
                    .map(|until| until.saturating_duration_since(now)),
                _ => None,
            },
            current_state: state,
            failure_rate: if counters.total_calls > 0 {
                counters.total_failures as f64 / counters.total_calls as f64
            } else {
                0.0
            },
        }
    }
}
