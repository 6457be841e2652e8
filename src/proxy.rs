use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("no healthy proxy found for service kind {0}")]
    NotFound(String),

    #[error("hostname resolution failed for {0}")]
    ResolutionFailed(String),
}

/// The two Docker Swarm service labels this orchestrator looks for
/// (spec §9 Open Question: a single enum replaces the two
/// overlapping executor shapes from the distillation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    Nextcloud,
    Photoprism,
}

impl ServiceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ServiceKind::Nextcloud => "nextcloud-proxy",
            ServiceKind::Photoprism => "photoprism-proxy",
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone)]
pub struct ProxyService {
    pub service_name: String,
    pub kind: ServiceKind,
    pub hostname: String,
    pub ip_address: Option<IpAddr>,
    pub port: u16,
    pub last_check: Instant,
    pub is_healthy: bool,
    pub error_count: u32,
}

struct CacheEntry {
    service: ProxyService,
    cached_at: Instant,
}

/// Resolves and health-checks Docker Swarm proxy services for a given
/// `ServiceKind`, caching results with a TTL and evicting entries that
/// accumulate too many consecutive errors (spec §4.G, grounded in the
/// original `ProxyDiscovery`).
pub struct ProxyDiscovery {
    cache: Mutex<HashMap<ServiceKind, CacheEntry>>,
    ttl: Duration,
    max_errors: u32,
    health_timeout: Duration,
    default_port: u16,
}

impl ProxyDiscovery {
    pub fn new(ttl: Duration, max_errors: u32, health_timeout: Duration, default_port: u16) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            ttl,
            max_errors,
            health_timeout,
            default_port,
        }
    }

    /// Returns a healthy proxy for `kind`, reusing the cached entry
    /// unless it is stale, `force_refresh` is set, or the cached entry
    /// has accumulated too many errors.
    pub async fn discover(
        &self,
        kind: ServiceKind,
        hostname: String,
        force_refresh: bool,
    ) -> Result<ProxyService, ProxyError> {
        if !force_refresh {
            if let Some(cached) = self.get_cached(kind).await {
                return Ok(cached);
            }
        }

        let resolved_ip = resolve_hostname(&hostname);
        let addr_for_check = resolved_ip
            .map(|ip| SocketAddr::new(ip, self.default_port))
            .or_else(|| format!("{hostname}:{}", self.default_port).to_socket_addrs().ok().and_then(|mut a| a.next()));

        let is_healthy = match addr_for_check {
            Some(addr) => check_health(addr, self.health_timeout).await,
            None => false,
        };

        let service = ProxyService {
            service_name: format!("{}-proxy", kind.label().trim_end_matches("-proxy")),
            kind,
            hostname,
            ip_address: resolved_ip,
            port: self.default_port,
            last_check: Instant::now(),
            is_healthy,
            error_count: 0,
        };

        if !service.is_healthy {
            return Err(ProxyError::NotFound(kind.to_string()));
        }

        self.cache.lock().await.insert(
            kind,
            CacheEntry {
                service: service.clone(),
                cached_at: Instant::now(),
            },
        );

        Ok(service)
    }

    async fn get_cached(&self, kind: ServiceKind) -> Option<ProxyService> {
        let cache = self.cache.lock().await;
        let entry = cache.get(&kind)?;
        if entry.cached_at.elapsed() >= self.ttl {
            return None;
        }
        if entry.service.error_count >= self.max_errors {
            return None;
        }
        Some(entry.service.clone())
    }

    pub async fn invalidate(&self, kind: ServiceKind) {
        self.cache.lock().await.remove(&kind);
    }

    /// Records a failed use of the cached proxy, evicting it once
    /// `max_errors` consecutive failures have been seen.
    pub async fn mark_error(&self, kind: ServiceKind) {
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get_mut(&kind) {
            entry.service.error_count += 1;
            if entry.service.error_count >= self.max_errors {
                cache.remove(&kind);
            }
        }
    }

    pub async fn mark_success(&self, kind: ServiceKind) {
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get_mut(&kind) {
            entry.service.error_count = 0;
        }
    }

    pub async fn all_cached(&self) -> Vec<ProxyService> {
        self.cache
            .lock()
            .await
            .values()
            .map(|e| e.service.clone())
            .collect()
    }
}

fn resolve_hostname(hostname: &str) -> Option<IpAddr> {
    if let Ok(ip) = hostname.parse::<IpAddr>() {
        return Some(ip);
    }
    format!("{hostname}:0")
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .map(|addr| addr.ip())
}

async fn check_health(addr: SocketAddr, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

pub type SharedProxyDiscovery = Arc<ProxyDiscovery>;
