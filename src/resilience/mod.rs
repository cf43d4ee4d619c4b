//! # Resilience Module
//!
//! Fault tolerance for every outbound integration call made by the automation.
//!
//! ## Architecture
//!
//! - **Backoff**: one exponential-with-jitter function shared by retries and the outbox
//! - **Circuit Breakers**: one per circuit key, failing fast while open
//! - **Retry Policy**: bounded attempts with per-attempt timeouts, gated by the breaker
//! - **Guarded HTTP**: `reqwest` behind the retry policy
//!
//! ## Usage
//!
//! ```rust,no_run
//! use outreach_core::resilience::{
//!     AttemptError, BackoffConfig, CallOptions, CircuitBreakerConfig, CircuitBreakerManager,
//!     RetryPolicy,
//! };
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::new(
//!     CircuitBreakerManager::new(CircuitBreakerConfig::default()),
//!     BackoffConfig::default(),
//! );
//!
//! let options = CallOptions::new("crm_push", "crm").with_timeout(Duration::from_secs(5));
//! let status = policy
//!     .execute(&options, |_attempt| async {
//!         // CRM push here
//!         Ok::<_, AttemptError>(204)
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod config;
pub mod http;
pub mod manager;
pub mod metrics;
pub mod retry;

pub use backoff::{exponential_backoff, BackoffConfig};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::CircuitBreakerConfig;
pub use http::{classify_status, GuardedHttpClient, StatusClass};
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
pub use retry::{AttemptError, CallOptions, IntegrationError, RetryPolicy};
