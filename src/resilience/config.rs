//! # Circuit Breaker Configuration
//!
//! Settings for a single breaker. System-wide defaults come from
//! `crate::config::IntegrationConfig::circuit_breaker`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,

    /// Time spent open (failing fast) before one probing call is admitted
    pub open_duration: Duration,
}

impl CircuitBreakerConfig {
    /// Proxy-provider lookups; the provider is a last resort so it trips early
    pub fn for_proxy_provider() -> Self {
        Self {
            failure_threshold: 2,
            open_duration: Duration::from_secs(120),
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }

        if self.failure_threshold > 100 {
            return Err("failure_threshold should not exceed 100".to_string());
        }

        if self.open_duration.is_zero() {
            return Err("open_duration must be greater than 0".to_string());
        }

        if self.open_duration > Duration::from_secs(3600) {
            return Err("open_duration should not exceed one hour".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
        }
    }
}
