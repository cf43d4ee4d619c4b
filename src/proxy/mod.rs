//! # Proxy Pool
//!
//! Failover-ordered proxy selection with cooldowns, sticky sessions, health
//! probing and provider escalation.
//!
//! ```rust,no_run
//! use outreach_core::proxy::{ProxyPoolManager, ProxySource};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), outreach_core::proxy::ProxyError> {
//! let pool = ProxyPoolManager::new(
//!     ProxySource::File("proxies.txt".into()),
//!     Duration::from_secs(30 * 60),
//! );
//! let chain = pool.get_failover_chain(None).await?;
//! if let Some(first) = chain.first() {
//!     // ... the browser launch through `first` failed ...
//!     pool.mark_failed(first);
//! }
//! # Ok(())
//! # }
//! ```

pub mod endpoint;
pub mod health;
pub mod pool;
pub mod provider;
pub mod source;

pub use endpoint::{parse_proxy_line, parse_proxy_list, ProxyEndpoint, ProxyIdentity, ProxyType};
pub use health::{AlwaysHealthy, HealthProbe, TcpConnectProbe};
pub use pool::{EndpointStatus, FailoverRequest, PoolSnapshot, ProxyPoolManager};
pub use provider::{parse_provider_body, HttpProxyProvider, ProxyProvider, PROVIDER_CIRCUIT_KEY};
pub use source::ProxySource;

use crate::error::OutreachError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    /// Nothing usable; the caller falls back to a direct connection or aborts
    #[error("proxy pool exhausted: {0}")]
    Exhausted(String),
    #[error("proxy source {location} unavailable: {reason}")]
    SourceUnavailable { location: String, reason: String },
}

impl From<ProxyError> for OutreachError {
    fn from(error: ProxyError) -> Self {
        match error {
            ProxyError::Exhausted(reason) => OutreachError::ProxyPoolExhausted(reason),
            ProxyError::SourceUnavailable { location, reason } => {
                OutreachError::ConfigurationError(format!("proxy source {location}: {reason}"))
            }
        }
    }
}
