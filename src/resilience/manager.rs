//! # Circuit Breaker Manager
//!
//! Owns one breaker per circuit key. Separate calls to the same key share the
//! breaker; nothing here is a process-wide singleton.

use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
    SystemCircuitBreakerMetrics,
};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Manager for the circuit breakers of every outbound integration
#[derive(Debug, Clone)]
pub struct CircuitBreakerManager {
    circuit_breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,

    default_config: CircuitBreakerConfig,

    /// Per-key overrides, e.g. a more sensitive breaker for the proxy provider
    overrides: HashMap<String, CircuitBreakerConfig>,
}

impl CircuitBreakerManager {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        info!(
            failure_threshold = default_config.failure_threshold,
            open_ms = default_config.open_duration.as_millis() as u64,
            "Initializing circuit breaker manager"
        );

        Self {
            circuit_breakers: Arc::new(RwLock::new(HashMap::new())),
            default_config,
            overrides: HashMap::new(),
        }
    }

    /// Use a dedicated configuration for one circuit key
    pub fn with_override(mut self, circuit_key: &str, config: CircuitBreakerConfig) -> Self {
        self.overrides.insert(circuit_key.to_string(), config);
        self
    }

    /// Get or create circuit breaker for a circuit key
    pub async fn get_circuit_breaker(&self, circuit_key: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.circuit_breakers.read().await;
            if let Some(breaker) = breakers.get(circuit_key) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.circuit_breakers.write().await;

        // Double-check pattern (another task might have created it)
        if let Some(breaker) = breakers.get(circuit_key) {
            return Arc::clone(breaker);
        }

        let config = self
            .overrides
            .get(circuit_key)
            .copied()
            .unwrap_or(self.default_config);

        let breaker = Arc::new(CircuitBreaker::new(circuit_key.to_string(), config));
        breakers.insert(circuit_key.to_string(), Arc::clone(&breaker));

        info!(
            component = circuit_key,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    pub async fn list_components(&self) -> Vec<String> {
        let breakers = self.circuit_breakers.read().await;
        breakers.keys().cloned().collect()
    }

    /// Get metrics for a specific circuit breaker
    pub async fn get_component_metrics(&self, circuit_key: &str) -> Option<CircuitBreakerMetrics> {
        let breaker = {
            let breakers = self.circuit_breakers.read().await;
            breakers.get(circuit_key).cloned()
        };
        match breaker {
            Some(breaker) => Some(breaker.metrics().await),
            None => None,
        }
    }

    /// Get system-wide circuit breaker metrics
    pub async fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let snapshot: Vec<(String, Arc<CircuitBreaker>)> = {
            let breakers = self.circuit_breakers.read().await;
            breakers
                .iter()
                .map(|(name, breaker)| (name.clone(), Arc::clone(breaker)))
                .collect()
        };

        let metrics = join_all(snapshot.iter().map(|(_, breaker)| breaker.metrics())).await;

        let mut system_metrics = SystemCircuitBreakerMetrics::new();
        for ((name, _), breaker_metrics) in snapshot.into_iter().zip(metrics) {
            system_metrics.add_circuit_breaker(name, breaker_metrics);
        }
        system_metrics
    }

    pub async fn get_state_summary(&self) -> HashMap<CircuitState, usize> {
        self.get_system_metrics().await.count_by_state()
    }

    /// Force open all circuit breakers (emergency stop)
    pub async fn force_open_all(&self) {
        warn!("🚨 Forcing all circuit breakers open (emergency stop)");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_open().await;
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub async fn force_close_all(&self) {
        warn!("🚨 Forcing all circuit breakers closed (emergency recovery)");

        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_closed().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_get_or_create_circuit_breaker() {
        let manager = CircuitBreakerManager::new(CircuitBreakerConfig::default());

        let first = manager.get_circuit_breaker("webhook").await;
        let second = manager.get_circuit_breaker("webhook").await;
        assert!(Arc::ptr_eq(&first, &second));

        let components = manager.list_components().await;
        assert_eq!(components, vec!["webhook".to_string()]);
    }

    #[tokio::test]
    async fn test_overrides_apply_per_key() {
        let provider_config = CircuitBreakerConfig {
            failure_threshold: 1,
            open_duration: Duration::from_secs(5),
        };
        let manager = CircuitBreakerManager::new(CircuitBreakerConfig::default())
            .with_override("proxy_provider", provider_config);

        let provider = manager.get_circuit_breaker("proxy_provider").await;
        assert_eq!(provider.config().failure_threshold, 1);

        let webhook = manager.get_circuit_breaker("webhook").await;
        assert_eq!(webhook.config().failure_threshold, 5);
    }

    #[tokio::test]
    async fn test_system_metrics_and_force_open() {
        let manager = CircuitBreakerManager::new(CircuitBreakerConfig::default());
        manager.get_circuit_breaker("webhook").await;
        manager.get_circuit_breaker("crm").await;

        let summary = manager.get_state_summary().await;
        assert_eq!(summary.get(&CircuitState::Closed), Some(&2));

        manager.force_open_all().await;
        let metrics = manager.get_system_metrics().await;
        assert_eq!(metrics.open_circuits(), vec!["crm", "webhook"]);
        assert_eq!(metrics.health_score(), 0.0);

        assert!(manager.get_component_metrics("missing").await.is_none());
    }
}
