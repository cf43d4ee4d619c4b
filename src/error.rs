//! Error types for the outreach resilience core.
//!

use crate::config::ConfigurationError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OutreachError {
    /// Network, timeout or 5xx failure that survived every retry attempt
    #[error("Transient integration error for {integration}: {reason}")]
    TransientIntegration { integration: String, reason: String },
    /// Breaker for the circuit key is open; no network attempt was made
    #[error("Circuit breaker open for {circuit_key}")]
    CircuitOpen { circuit_key: String },
    #[error("Integration {integration} timed out after {timeout:?}")]
    IntegrationTimeout {
        integration: String,
        timeout: Duration,
    },
    /// Heartbeat found the lock owned by someone else (or gone)
    #[error("Runtime lock {lock_key} lost by {owner_id}")]
    LockLost { lock_key: String, owner_id: String },
    #[error("Outbox event {event_id} permanently failed after {attempts} attempts: {reason}")]
    PermanentDeliveryFailure {
        event_id: i64,
        attempts: i32,
        reason: String,
    },
    #[error("Proxy pool exhausted: {0}")]
    ProxyPoolExhausted(String),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl OutreachError {
    /// Whether the error invalidates the caller's assumption of exclusivity
    pub fn is_fatal_to_cycle(&self) -> bool {
        matches!(self, OutreachError::LockLost { .. })
    }
}

impl From<serde_json::Error> for OutreachError {
    fn from(error: serde_json::Error) -> Self {
        OutreachError::SerializationError(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for OutreachError {
    fn from(err: sqlx::Error) -> Self {
        OutreachError::DatabaseError(err.to_string())
    }
}

impl From<ConfigurationError> for OutreachError {
    fn from(err: ConfigurationError) -> Self {
        OutreachError::ConfigurationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, OutreachError>;
