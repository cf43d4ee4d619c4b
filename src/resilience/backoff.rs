//! # Backoff Calculation
//!
//! Exponential backoff with jitter, shared by the retry policy (delay between
//! attempts of one call) and the outbox engine (delay between delivery attempts
//! of one event).

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest exponent applied to the base delay; later attempts sit at the cap anyway
const MAX_EXPONENT: u32 = 31;

/// Shape of an exponential backoff curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Delay before the second attempt
    pub base: Duration,
    /// Upper bound applied after jitter
    pub max: Duration,
    /// Jitter is drawn uniformly from `0..=max_jitter`
    pub max_jitter: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
        }
    }
}

impl BackoffConfig {
    /// Backoff without jitter, mostly useful for deterministic schedules
    pub fn without_jitter(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            max_jitter: Duration::ZERO,
        }
    }

    /// Delay after the given 1-based attempt, with random jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_ms = self.max_jitter.as_millis().min(u64::MAX as u128) as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
        };
        exponential_backoff(attempt, self, jitter)
    }
}

/// `min(base * 2^(attempt-1) + jitter, max)`
///
/// `attempt` is 1-based; `0` is treated as the first attempt.
pub fn exponential_backoff(attempt: u32, config: &BackoffConfig, jitter: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
    let exponential = config.base.saturating_mul(1u32 << exponent);
    exponential.saturating_add(jitter).min(config.max)
}
