//! # Retry Policy
//!
//! The uniform gate for outbound integration calls. Every attempt is checked
//! against the circuit breaker for its circuit key and bounded by the call's
//! timeout; transient failures are retried with exponential backoff and jitter.
//!
//! Retry counters belong to one `execute` call. Breaker state belongs to the
//! circuit key and is shared by every call that names it.

use crate::constants::circuits::PROXY_PROVIDER;
use crate::error::OutreachError;
use crate::resilience::{BackoffConfig, CircuitBreakerConfig, CircuitBreakerManager};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-call routing and limits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOptions {
    /// Logical integration name used in logs and errors (`webhook`, `crm`, ...)
    pub integration_key: String,
    /// Breaker identity; several integrations may share one circuit
    pub circuit_key: String,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl CallOptions {
    pub fn new(integration_key: impl Into<String>, circuit_key: impl Into<String>) -> Self {
        Self {
            integration_key: integration_key.into(),
            circuit_key: circuit_key.into(),
            timeout: Duration::from_secs(10),
            max_attempts: 3,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Outcome of a single failed attempt, as classified by the caller
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    /// Network error, timeout, 5xx or rate limiting; worth retrying
    #[error("transient failure: {0}")]
    Transient(String),
    /// The dependency answered and the answer will not change on retry
    #[error("permanent failure: {0}")]
    Permanent(String),
}

/// Terminal result of a guarded call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrationError {
    #[error("circuit {circuit_key} is open for {integration}")]
    CircuitOpen {
        integration: String,
        circuit_key: String,
    },
    #[error("{integration} timed out after {attempts} attempt(s) of {timeout:?}")]
    Timeout {
        integration: String,
        timeout: Duration,
        attempts: u32,
    },
    #[error("{integration} failed after {attempts} attempt(s): {reason}")]
    Transient {
        integration: String,
        attempts: u32,
        reason: String,
    },
    #[error("{integration} rejected the call: {reason}")]
    Permanent { integration: String, reason: String },
}

impl IntegrationError {
    /// Whether the call was rejected without any network attempt
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, IntegrationError::CircuitOpen { .. })
    }
}

impl From<IntegrationError> for OutreachError {
    fn from(error: IntegrationError) -> Self {
        match error {
            IntegrationError::CircuitOpen { circuit_key, .. } => {
                OutreachError::CircuitOpen { circuit_key }
            }
            IntegrationError::Timeout {
                integration,
                timeout,
                ..
            } => OutreachError::IntegrationTimeout {
                integration,
                timeout,
            },
            IntegrationError::Transient {
                integration,
                reason,
                ..
            } => OutreachError::TransientIntegration {
                integration,
                reason,
            },
            IntegrationError::Permanent {
                integration,
                reason,
            } => OutreachError::TransientIntegration {
                integration,
                reason: format!("permanent: {reason}"),
            },
        }
    }
}

enum LastFailure {
    TimedOut,
    Failed(String),
}

/// Retry + circuit-breaker policy shared by every outbound integration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    breakers: CircuitBreakerManager,
    backoff: BackoffConfig,
}

impl RetryPolicy {
    pub fn new(breakers: CircuitBreakerManager, backoff: BackoffConfig) -> Self {
        Self { breakers, backoff }
    }

    /// Build the policy from the integration section of the configuration.
    /// The proxy provider circuit trips earlier than the configured default.
    pub fn from_config(config: &crate::config::IntegrationConfig) -> Self {
        let breakers = CircuitBreakerManager::new(config.circuit_breaker())
            .with_override(PROXY_PROVIDER, CircuitBreakerConfig::for_proxy_provider());
        Self::new(breakers, config.backoff())
    }

    pub fn breakers(&self) -> &CircuitBreakerManager {
        &self.breakers
    }

    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// Run `operation` under the breaker for `options.circuit_key`.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn execute<T, F, Fut>(
        &self,
        options: &CallOptions,
        mut operation: F,
    ) -> Result<T, IntegrationError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let breaker = self.breakers.get_circuit_breaker(&options.circuit_key).await;
        let max_attempts = options.max_attempts.max(1);
        let mut last_failure = LastFailure::Failed("no attempt made".to_string());

        for attempt in 1..=max_attempts {
            if !breaker.try_acquire().await {
                debug!(
                    integration = %options.integration_key,
                    circuit_key = %options.circuit_key,
                    attempt = attempt,
                    "⛔ Circuit open, failing fast"
                );
                return Err(IntegrationError::CircuitOpen {
                    integration: options.integration_key.clone(),
                    circuit_key: options.circuit_key.clone(),
                });
            }

            match tokio::time::timeout(options.timeout, operation(attempt)).await {
                Ok(Ok(value)) => {
                    breaker.record_success().await;
                    return Ok(value);
                }
                Ok(Err(AttemptError::Permanent(reason))) => {
                    // The dependency answered, so the breaker treats it as alive
                    breaker.record_success().await;
                    return Err(IntegrationError::Permanent {
                        integration: options.integration_key.clone(),
                        reason,
                    });
                }
                Ok(Err(AttemptError::Transient(reason))) => {
                    breaker.record_failure().await;
                    warn!(
                        integration = %options.integration_key,
                        circuit_key = %options.circuit_key,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        reason = %reason,
                        "🔁 Integration attempt failed"
                    );
                    last_failure = LastFailure::Failed(reason);
                }
                Err(_) => {
                    breaker.record_failure().await;
                    warn!(
                        integration = %options.integration_key,
                        circuit_key = %options.circuit_key,
                        attempt = attempt,
                        timeout_ms = options.timeout.as_millis() as u64,
                        "⏱️ Integration attempt timed out"
                    );
                    last_failure = LastFailure::TimedOut;
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.backoff.delay_for(attempt)).await;
            }
        }

        Err(match last_failure {
            LastFailure::TimedOut => IntegrationError::Timeout {
                integration: options.integration_key.clone(),
                timeout: options.timeout,
                attempts: max_attempts,
            },
            LastFailure::Failed(reason) => IntegrationError::Transient {
                integration: options.integration_key.clone(),
                attempts: max_attempts,
                reason,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntegrationConfig;
    use crate::constants::circuits::OUTBOX_WEBHOOK;
    use crate::resilience::CircuitState;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_config_policy_trips_provider_circuit_early() {
        let policy = RetryPolicy::from_config(&IntegrationConfig::default());

        let provider = policy.breakers().get_circuit_breaker(PROXY_PROVIDER).await;
        assert_eq!(*provider.config(), CircuitBreakerConfig::for_proxy_provider());

        let webhook = policy.breakers().get_circuit_breaker(OUTBOX_WEBHOOK).await;
        assert_eq!(*webhook.config(), IntegrationConfig::default().circuit_breaker());
    }

    fn policy(threshold: u32, open_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            CircuitBreakerManager::new(CircuitBreakerConfig {
                failure_threshold: threshold,
                open_duration: Duration::from_millis(open_ms),
            }),
            BackoffConfig::without_jitter(Duration::from_millis(1), Duration::from_millis(5)),
        )
    }

    fn options(max_attempts: u32) -> CallOptions {
        CallOptions::new("webhook", "webhook")
            .with_timeout(Duration::from_millis(50))
            .with_max_attempts(max_attempts)
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let policy = policy(10, 1_000);
        let calls = AtomicU32::new(0);

        let result = policy
            .execute(&options(3), |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(AttemptError::Transient("503".to_string()))
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let metrics = policy.breakers().get_component_metrics("webhook").await.unwrap();
        assert_eq!(metrics.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_surface_transient_error() {
        let policy = policy(10, 1_000);
        let result: Result<(), _> = policy
            .execute(&options(2), |_| async {
                Err(AttemptError::Transient("connection reset".to_string()))
            })
            .await;

        assert_eq!(
            result,
            Err(IntegrationError::Transient {
                integration: "webhook".to_string(),
                attempts: 2,
                reason: "connection reset".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_timeouts_surface_as_timeout_error() {
        let policy = policy(10, 1_000);
        let result: Result<(), _> = policy
            .execute(&options(2), |_| async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(IntegrationError::Timeout { attempts: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let policy = policy(10, 1_000);
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .execute(&options(5), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AttemptError::Permanent("HTTP 400".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(IntegrationError::Permanent { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_breaker_shared_across_calls_but_retry_counter_is_not() {
        let policy = policy(3, 10_000);

        // Two failing attempts in the first call
        let _: Result<(), _> = policy
            .execute(&options(2), |_| async {
                Err(AttemptError::Transient("down".to_string()))
            })
            .await;

        // The next call gets a fresh attempt budget, but its first failure
        // is the third consecutive one for the circuit and opens it
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .execute(&options(3), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AttemptError::Transient("down".to_string())) }
            })
            .await;

        assert!(result.as_ref().unwrap_err().is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let breaker = policy.breakers().get_circuit_breaker("webhook").await;
        assert_eq!(breaker.state(), CircuitState::Open);

        // A third call fails fast without invoking the operation
        let untouched = AtomicU32::new(0);
        let result: Result<(), _> = policy
            .execute(&options(3), |_| {
                untouched.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(untouched.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_error_mapping_into_taxonomy() {
        let error: OutreachError = IntegrationError::CircuitOpen {
            integration: "crm".to_string(),
            circuit_key: "crm".to_string(),
        }
        .into();
        assert_eq!(
            error,
            OutreachError::CircuitOpen {
                circuit_key: "crm".to_string()
            }
        );
    }
}
