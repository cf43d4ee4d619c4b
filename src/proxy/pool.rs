//! # Proxy Pool Manager
//!
//! Owns the parsed proxy pool, per-endpoint cooldowns and per-session sticky
//! assignments. Callers report failures; the manager never inspects traffic.
//!
//! Chains are rotated by a cursor that advances once per call, so successive
//! callers start at different endpoints. Ready endpoints always precede
//! cooling ones, and cooling endpoints are never dropped from a chain.

use crate::config::ProxyConfig;
use crate::logging::log_proxy_operation;
use crate::proxy::endpoint::{ProxyEndpoint, ProxyIdentity, ProxyType};
use crate::proxy::health::{AlwaysHealthy, HealthProbe, TcpConnectProbe};
use crate::proxy::provider::ProxyProvider;
use crate::proxy::source::ProxySource;
use crate::proxy::ProxyError;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Escalation request for [`ProxyPoolManager::get_failover_plan`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailoverRequest {
    pub preferred_type: Option<ProxyType>,
    pub force_mobile: bool,
    /// Consecutive failures the caller has seen with its current plan
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EndpointStatus {
    pub server: String,
    pub username: Option<String>,
    pub proxy_type: ProxyType,
    pub ready: bool,
    pub cooldown_remaining_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub source: String,
    pub endpoints: Vec<EndpointStatus>,
    pub ready_count: usize,
    pub cooling_count: usize,
    pub sticky_sessions: usize,
}

#[derive(Debug, Default)]
struct PoolCache {
    signature: Option<String>,
    loaded: Vec<ProxyEndpoint>,
    /// Endpoints handed out by the provider, kept ahead of the loaded pool
    injected: Vec<ProxyEndpoint>,
}

impl PoolCache {
    fn endpoints(&self) -> Vec<ProxyEndpoint> {
        let mut seen = HashSet::new();
        self.injected
            .iter()
            .chain(self.loaded.iter())
            .filter(|endpoint| seen.insert(endpoint.identity()))
            .cloned()
            .collect()
    }
}

#[derive(Debug)]
pub struct ProxyPoolManager {
    source: ProxySource,
    failure_cooldown: Duration,
    mobile_escalation_threshold: u32,
    cache: Mutex<PoolCache>,
    cursor: AtomicUsize,
    cooldowns: DashMap<ProxyIdentity, Instant>,
    sticky: DashMap<String, ProxyEndpoint>,
    probe: Arc<dyn HealthProbe>,
    provider: Option<Arc<dyn ProxyProvider>>,
}

impl ProxyPoolManager {
    pub fn new(source: ProxySource, failure_cooldown: Duration) -> Self {
        Self {
            source,
            failure_cooldown,
            mobile_escalation_threshold: 3,
            cache: Mutex::new(PoolCache::default()),
            cursor: AtomicUsize::new(0),
            cooldowns: DashMap::new(),
            sticky: DashMap::new(),
            probe: Arc::new(AlwaysHealthy),
            provider: None,
        }
    }

    /// Manager configured from the `proxy` section, without a provider
    pub fn from_config(config: &ProxyConfig) -> Self {
        let probe: Arc<dyn HealthProbe> = if config.health_check_enabled {
            Arc::new(TcpConnectProbe::new(config.health_check_timeout()))
        } else {
            Arc::new(AlwaysHealthy)
        };
        Self::new(ProxySource::from_config(config), config.failure_cooldown())
            .with_probe(probe)
            .with_mobile_escalation_threshold(config.mobile_escalation_threshold)
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn ProxyProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_mobile_escalation_threshold(mut self, threshold: u32) -> Self {
        self.mobile_escalation_threshold = threshold;
        self
    }

    /// Current pool, re-read from the source only when its signature changed
    pub async fn load_pool(&self) -> Result<Vec<ProxyEndpoint>, ProxyError> {
        let signature = self.source.signature().await?;
        {
            let cache = self.cache.lock();
            if cache.signature.as_deref() == Some(signature.as_str()) {
                return Ok(cache.endpoints());
            }
        }

        let loaded = self.source.read_endpoints().await?;
        info!(
            source = %self.source.describe(),
            endpoints = loaded.len(),
            "🌐 Proxy pool reloaded"
        );

        let mut cache = self.cache.lock();
        cache.signature = Some(signature);
        cache.loaded = loaded;
        Ok(cache.endpoints())
    }

    /// Rotated failover chain: ready endpoints first, then cooling ones.
    ///
    /// `selector` restricts the chain to one proxy type. When nothing is ready
    /// and a provider is configured, it is asked once for a fresh endpoint,
    /// which then leads the chain.
    pub async fn get_failover_chain(
        &self,
        selector: Option<ProxyType>,
    ) -> Result<Vec<ProxyEndpoint>, ProxyError> {
        let pool = self.load_pool().await?;
        let offset = self.cursor.fetch_add(1, Ordering::Relaxed);
        let chain = self.build_chain(&pool, offset, selector);

        let any_ready = chain.iter().any(|endpoint| self.is_ready(endpoint));
        if any_ready || self.provider.is_none() {
            return Ok(chain);
        }

        match self.escalate_to_provider().await {
            Some(fresh) if selector.map_or(true, |wanted| wanted == fresh.proxy_type) => {
                let mut chain: Vec<ProxyEndpoint> = chain
                    .into_iter()
                    .filter(|endpoint| endpoint.identity() != fresh.identity())
                    .collect();
                chain.insert(0, fresh);
                Ok(chain)
            }
            _ => Ok(chain),
        }
    }

    /// Failover chain with mobile escalation appended once the caller has
    /// failed more than the escalation threshold
    pub async fn get_failover_plan(
        &self,
        request: &FailoverRequest,
    ) -> Result<Vec<ProxyEndpoint>, ProxyError> {
        let mut plan = self.get_failover_chain(request.preferred_type).await?;

        let wants_escalation = request.force_mobile || request.preferred_type.is_some();
        if wants_escalation && request.consecutive_failures > self.mobile_escalation_threshold {
            let pool = self.load_pool().await?;
            let offset = self.cursor.load(Ordering::Relaxed);
            let mobile = self.build_chain(&pool, offset, Some(ProxyType::Mobile));

            let mut seen: HashSet<ProxyIdentity> =
                plan.iter().map(ProxyEndpoint::identity).collect();
            let appended_before = plan.len();
            plan.extend(mobile.into_iter().filter(|endpoint| seen.insert(endpoint.identity())));

            debug!(
                consecutive_failures = request.consecutive_failures,
                mobile_appended = plan.len() - appended_before,
                "📶 Mobile escalation appended to failover plan"
            );
        }

        Ok(plan)
    }

    /// The session's assigned endpoint, health-checked before reuse.
    ///
    /// A failing assignment is evicted, put into cooldown and replaced by the
    /// first healthy endpoint of a fresh failover chain.
    pub async fn get_sticky_proxy(&self, session_id: &str) -> Result<ProxyEndpoint, ProxyError> {
        let cached = self.sticky.get(session_id).map(|entry| entry.value().clone());
        if let Some(endpoint) = cached {
            if self.probe.is_healthy(&endpoint).await {
                return Ok(endpoint);
            }
            self.sticky.remove(session_id);
            self.mark_failed(&endpoint);
            log_proxy_operation(
                "sticky_evict",
                Some(&endpoint.server),
                Some(session_id),
                "unhealthy",
                None,
            );
        }

        let chain = self.get_failover_chain(None).await?;
        if chain.is_empty() {
            return Err(ProxyError::Exhausted(format!(
                "no endpoints available from {}",
                self.source.describe()
            )));
        }

        for candidate in chain {
            if self.probe.is_healthy(&candidate).await {
                self.sticky.insert(session_id.to_string(), candidate.clone());
                log_proxy_operation(
                    "sticky_assign",
                    Some(&candidate.server),
                    Some(session_id),
                    "assigned",
                    None,
                );
                return Ok(candidate);
            }
            self.mark_failed(&candidate);
        }

        Err(ProxyError::Exhausted(
            "every endpoint failed its health check".to_string(),
        ))
    }

    pub fn release_sticky(&self, session_id: &str) -> Option<ProxyEndpoint> {
        let released = self.sticky.remove(session_id).map(|(_, endpoint)| endpoint);
        if let Some(endpoint) = &released {
            log_proxy_operation(
                "sticky_release",
                Some(&endpoint.server),
                Some(session_id),
                "released",
                None,
            );
        }
        released
    }

    /// Put `endpoint` into cooldown for the configured failure cooldown
    pub fn mark_failed(&self, endpoint: &ProxyEndpoint) {
        self.mark_failed_for(endpoint, self.failure_cooldown);
    }

    /// Put `endpoint` into cooldown for an explicit duration, e.g. a Retry-After
    pub fn mark_failed_for(&self, endpoint: &ProxyEndpoint, cooldown: Duration) {
        self.cooldowns
            .insert(endpoint.identity(), Instant::now() + cooldown);
        let details = format!("cooldown_secs={}", cooldown.as_secs());
        log_proxy_operation(
            "mark_failed",
            Some(&endpoint.server),
            None,
            "cooling",
            Some(&details),
        );
    }

    pub fn mark_healthy(&self, endpoint: &ProxyEndpoint) {
        if self.cooldowns.remove(&endpoint.identity()).is_some() {
            log_proxy_operation("mark_healthy", Some(&endpoint.server), None, "ready", None);
        }
    }

    pub fn is_ready(&self, endpoint: &ProxyEndpoint) -> bool {
        self.cooldown_remaining(endpoint).is_none()
    }

    /// Status view of the pool as last loaded, in pool order
    pub async fn snapshot(&self) -> Result<PoolSnapshot, ProxyError> {
        let pool = self.load_pool().await?;
        let endpoints: Vec<EndpointStatus> = pool
            .iter()
            .map(|endpoint| {
                let remaining = self.cooldown_remaining(endpoint);
                EndpointStatus {
                    server: endpoint.server.clone(),
                    username: endpoint.username.clone(),
                    proxy_type: endpoint.proxy_type,
                    ready: remaining.is_none(),
                    cooldown_remaining_secs: remaining.map_or(0, |left| left.as_secs()),
                }
            })
            .collect();
        let ready_count = endpoints.iter().filter(|status| status.ready).count();

        Ok(PoolSnapshot {
            source: self.source.describe(),
            cooling_count: endpoints.len() - ready_count,
            ready_count,
            endpoints,
            sticky_sessions: self.sticky.len(),
        })
    }

    fn cooldown_remaining(&self, endpoint: &ProxyEndpoint) -> Option<Duration> {
        let identity = endpoint.identity();
        let until = *self.cooldowns.get(&identity)?;
        let now = Instant::now();
        if now >= until {
            self.cooldowns.remove_if(&identity, |_, stored| *stored <= now);
            None
        } else {
            Some(until - now)
        }
    }

    fn build_chain(
        &self,
        pool: &[ProxyEndpoint],
        offset: usize,
        selector: Option<ProxyType>,
    ) -> Vec<ProxyEndpoint> {
        let candidates: Vec<&ProxyEndpoint> = pool
            .iter()
            .filter(|endpoint| selector.map_or(true, |wanted| endpoint.proxy_type == wanted))
            .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let start = offset % candidates.len();
        let (ready, cooling): (Vec<&ProxyEndpoint>, Vec<&ProxyEndpoint>) = candidates[start..]
            .iter()
            .chain(candidates[..start].iter())
            .copied()
            .partition(|endpoint| self.is_ready(endpoint));

        ready.into_iter().chain(cooling).cloned().collect()
    }

    async fn escalate_to_provider(&self) -> Option<ProxyEndpoint> {
        let provider = self.provider.as_ref()?;
        match provider.fetch_endpoint().await {
            Ok(Some(fresh)) => {
                {
                    let mut cache = self.cache.lock();
                    cache
                        .injected
                        .retain(|existing| existing.identity() != fresh.identity());
                    cache.injected.insert(0, fresh.clone());
                }
                self.cooldowns.remove(&fresh.identity());
                log_proxy_operation(
                    "provider_inject",
                    Some(&fresh.server),
                    None,
                    "injected",
                    None,
                );
                Some(fresh)
            }
            Ok(None) => {
                warn!("🌐 Proxy provider returned no endpoint while the pool is cooling");
                None
            }
            Err(error) => {
                warn!(error = %error, "🌐 Proxy provider lookup failed");
                None
            }
        }
    }
}
