//! # Circuit Breaker Metrics
//!
//! Snapshots of breaker counters for status reporting and health checks.

use crate::resilience::CircuitState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Calls that reached the protected operation
    pub total_calls: u64,

    pub success_count: u64,

    pub failure_count: u64,

    /// Calls rejected without touching the network
    pub rejected_count: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u64,

    /// Remaining open window, if the breaker is open
    pub open_remaining: Option<Duration>,

    pub current_state: CircuitState,

    /// Calculated failure rate (0.0 to 1.0)
    pub failure_rate: f64,
}

impl CircuitBreakerMetrics {
    /// Create new metrics instance with zero values
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            rejected_count: 0,
            consecutive_failures: 0,
            open_remaining: None,
            current_state: CircuitState::Closed,
            failure_rate: 0.0,
        }
    }

    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.failure_rate < 0.1,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// System-wide circuit breaker metrics aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    /// Metrics for individual circuit breakers by circuit key
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,

    /// Timestamp of last metrics collection
    pub collected_at: std::time::SystemTime,
}

impl SystemCircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at: std::time::SystemTime::now(),
        }
    }

    pub fn add_circuit_breaker(&mut self, name: String, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(name, metrics);
        self.collected_at = std::time::SystemTime::now();
    }

    /// Get count of circuit breakers by state
    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();

        for metrics in self.circuit_breakers.values() {
            *counts.entry(metrics.current_state).or_insert(0) += 1;
        }

        counts
    }

    /// Circuit keys whose breaker is currently open
    pub fn open_circuits(&self) -> Vec<&str> {
        let mut open: Vec<&str> = self
            .circuit_breakers
            .iter()
            .filter(|(_, metrics)| metrics.current_state == CircuitState::Open)
            .map(|(name, _)| name.as_str())
            .collect();
        open.sort_unstable();
        open
    }

    /// Calculate system-wide health score (0.0 to 1.0)
    pub fn health_score(&self) -> f64 {
        if self.circuit_breakers.is_empty() {
            return 1.0;
        }

        let healthy_count = self
            .circuit_breakers
            .values()
            .filter(|metrics| metrics.is_healthy())
            .count();

        healthy_count as f64 / self.circuit_breakers.len() as f64
    }
}

impl Default for SystemCircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_metrics_aggregation() {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();

        let mut webhook = CircuitBreakerMetrics::new();
        webhook.total_calls = 100;
        webhook.failure_count = 5;
        webhook.failure_rate = 0.05;

        let mut provider = CircuitBreakerMetrics::new();
        provider.current_state = CircuitState::Open;
        provider.failure_rate = 0.5;

        system_metrics.add_circuit_breaker("webhook".to_string(), webhook);
        system_metrics.add_circuit_breaker("proxy_provider".to_string(), provider);

        let counts = system_metrics.count_by_state();
        assert_eq!(counts.get(&CircuitState::Closed), Some(&1));
        assert_eq!(counts.get(&CircuitState::Open), Some(&1));
        assert_eq!(system_metrics.health_score(), 0.5);
        assert_eq!(system_metrics.open_circuits(), vec!["proxy_provider"]);
    }

    #[test]
    fn test_metrics_health_calculation() {
        let mut metrics = CircuitBreakerMetrics::new();
        assert!(metrics.is_healthy());

        metrics.failure_rate = 0.15;
        assert!(!metrics.is_healthy());

        metrics.current_state = CircuitState::HalfOpen;
        assert!(metrics.is_healthy());
    }
}
