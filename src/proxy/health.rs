//! Liveness probes for sticky proxy assignments.

use crate::proxy::ProxyEndpoint;
use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;
use tokio::net::TcpStream;

#[async_trait]
pub trait HealthProbe: Send + Sync + Debug {
    async fn is_healthy(&self, endpoint: &ProxyEndpoint) -> bool;
}

/// Healthy when a TCP connection to the proxy opens within `timeout`
#[derive(Debug, Clone)]
pub struct TcpConnectProbe {
    timeout: Duration,
}

impl TcpConnectProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl HealthProbe for TcpConnectProbe {
    async fn is_healthy(&self, endpoint: &ProxyEndpoint) -> bool {
        let Some(address) = endpoint.host_port() else {
            return false;
        };
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(address)).await,
            Ok(Ok(_))
        )
    }
}

/// Used when health checks are disabled
#[derive(Debug, Clone, Default)]
pub struct AlwaysHealthy;

#[async_trait]
impl HealthProbe for AlwaysHealthy {
    async fn is_healthy(&self, _endpoint: &ProxyEndpoint) -> bool {
        true
    }
}
