//! Per-chunk HTTP client pool with a shared DNS cache

use crate::error::CheckerError;
use crate::proxy::checker::CheckerConfig;
use crate::proxy::models::ProxyAddress;
use dashmap::DashMap;
use hyper::client::connect::dns::Name;
use reqwest::dns::{Addrs, Resolve, Resolving};
use reqwest::{Client, Proxy as ReqwestProxy, Url};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Idle connections are kept this long
const KEEPALIVE_SECS: u64 = 30;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Resolver that caches lookups for a fixed TTL.
///
/// Only proxy hostnames go through it; IP literals never hit DNS.
#[derive(Debug, Clone)]
pub struct DnsCache {
    ttl: Duration,
    entries: Arc<DashMap<String, (Instant, Vec<SocketAddr>)>>,
}

impl DnsCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Cached addresses for a host, if present and fresh
    pub fn get(&self, host: &str) -> Option<Vec<SocketAddr>> {
        self.entries
            .get(host)
            .filter(|entry| entry.0.elapsed() < self.ttl)
            .map(|entry| entry.1.clone())
    }

    pub fn insert(&self, host: &str, addrs: Vec<SocketAddr>) {
        self.entries
            .insert(host.to_string(), (Instant::now(), addrs));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Resolve for DnsCache {
    fn resolve(&self, name: Name) -> Resolving {
        let host = name.as_str().to_string();

        if let Some(addrs) = self.get(&host) {
            return Box::pin(async move { Ok::<Addrs, BoxError>(Box::new(addrs.into_iter())) });
        }

        let cache = self.clone();
        Box::pin(async move {
            let addrs: Vec<SocketAddr> = match tokio::net::lookup_host((host.as_str(), 0)).await {
                Ok(addrs) => addrs.collect(),
                Err(e) => return Err(Box::new(e) as BoxError),
            };
            cache.insert(&host, addrs.clone());
            Ok::<Addrs, BoxError>(Box::new(addrs.into_iter()))
        })
    }
}

/// Client factory owned by one chunk and dropped when the chunk ends.
///
/// reqwest binds the proxy at client level, so each proxy gets its own
/// client; the clients of a chunk share timeouts, idle-pool sizing and the
/// DNS cache.
#[derive(Debug)]
pub struct ClientPool {
    resolver: Arc<DnsCache>,
    timeout: Duration,
    connect_timeout: Duration,
    max_idle_per_host: usize,
}

impl ClientPool {
    pub fn new(config: &CheckerConfig) -> Result<Self, CheckerError> {
        config.validate()?;

        Ok(Self {
            resolver: Arc::new(DnsCache::new(config.dns_ttl)),
            timeout: config.timeout,
            connect_timeout: config.connect_timeout(),
            max_idle_per_host: config.pool_size(),
        })
    }

    /// Build a client that routes every request through `proxy`
    pub fn client_for(&self, proxy: &ProxyAddress) -> Result<Client, BoxError> {
        let client = Client::builder()
            .proxy(ReqwestProxy::all(proxy_url(proxy)?)?)
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(KEEPALIVE_SECS))
            .dns_resolver(Arc::clone(&self.resolver))
            .danger_accept_invalid_certs(true)
            .build()?;
        Ok(client)
    }

    pub fn max_idle_per_host(&self) -> usize {
        self.max_idle_per_host
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

/// Proxy URL with percent-encoded credentials.
///
/// Passwords may hold `/`, `?` or `#`, which would otherwise end the
/// authority early.
pub fn proxy_url(proxy: &ProxyAddress) -> Result<Url, BoxError> {
    let mut url = Url::parse(&format!("{}://{}", proxy.scheme(), proxy.to_simple_string()))?;
    if let Some(auth) = proxy.auth() {
        url.set_username(&auth.username)
            .map_err(|_| "proxy url cannot carry a username")?;
        url.set_password(Some(&auth.password))
            .map_err(|_| "proxy url cannot carry a password")?;
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::checker::Mode;
    use crate::proxy::models::ProxyScheme;

    #[test]
    fn test_pool_sizing_follows_config() {
        let config = CheckerConfig::for_mode(Mode::Residential);
        let pool = ClientPool::new(&config).unwrap();
        assert_eq!(pool.max_idle_per_host(), 100);
        assert_eq!(pool.connect_timeout(), Duration::from_secs(4));
    }

    #[test]
    fn test_pool_rejects_invalid_config() {
        let config = CheckerConfig::for_mode(Mode::Fast).with_concurrency(0);
        assert!(ClientPool::new(&config).is_err());
    }

    #[test]
    fn test_client_for_proxy_with_credentials() {
        let pool = ClientPool::new(&CheckerConfig::default()).unwrap();
        let proxy = ProxyAddress::with_auth(
            ProxyScheme::Http,
            "127.0.0.1".to_string(),
            3128,
            "alice".to_string(),
            "secret".to_string(),
        );
        assert!(pool.client_for(&proxy).is_ok());
    }

    #[test]
    fn test_proxy_url_encodes_credentials() {
        let proxy = ProxyAddress::with_auth(
            ProxyScheme::Http,
            "10.0.0.1".to_string(),
            8080,
            "alice".to_string(),
            "p/w?x#y:z".to_string(),
        );
        let url = proxy_url(&proxy).unwrap();
        assert_eq!(url.host_str(), Some("10.0.0.1"));
        assert_eq!(url.port(), Some(8080));
        assert_eq!(url.username(), "alice");
        assert_eq!(url.password(), Some("p%2Fw%3Fx%23y%3Az"));
        assert!(pool_accepts(&proxy));
    }

    #[test]
    fn test_proxy_url_without_credentials() {
        let proxy = ProxyAddress::new(ProxyScheme::Https, "proxy.example".to_string(), 443);
        let url = proxy_url(&proxy).unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.username(), "");
        assert_eq!(url.password(), None);
    }

    fn pool_accepts(proxy: &ProxyAddress) -> bool {
        ClientPool::new(&CheckerConfig::default())
            .unwrap()
            .client_for(proxy)
            .is_ok()
    }

    #[test]
    fn test_dns_cache_expiry() {
        let cache = DnsCache::new(Duration::from_secs(300));
        assert!(cache.is_empty());
        cache.insert("proxy.example", vec!["10.0.0.1:0".parse().unwrap()]);
        assert_eq!(cache.get("proxy.example").unwrap().len(), 1);
        assert!(cache.get("other.example").is_none());

        let expired = DnsCache::new(Duration::ZERO);
        expired.insert("proxy.example", vec!["10.0.0.1:0".parse().unwrap()]);
        assert!(expired.get("proxy.example").is_none());
        assert_eq!(expired.len(), 1);
    }
}
