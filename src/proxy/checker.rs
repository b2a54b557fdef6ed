//! Proxy checker module for probing proxies through an IP echo endpoint

use crate::error::CheckerError;
use crate::proxy::models::{CheckRecord, FailureReason, ProbeOutcome, ProxyAddress};
use crate::proxy::parser::ProxyParser;
use crate::proxy::pool::ClientPool;
use crate::proxy::quality::{
    QualityAnalyzer, DEFAULT_LOOKUP_PAUSE_MS, DEFAULT_LOOKUP_TIMEOUT_SECS, DEFAULT_LOOKUP_URL,
    PREMIUM_THRESHOLD,
};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default URL to probe proxies against
pub const DEFAULT_TEST_URL: &str = "http://httpbin.org/ip";

/// Default TTL of the per-chunk DNS cache in seconds
const DEFAULT_DNS_TTL_SECS: u64 = 300;

/// Real browser user agents
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
];

/// Operating mode, fixed for the lifetime of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Mode {
    /// Connectivity only
    #[default]
    Fast,
    /// Connectivity plus quality scoring
    Residential,
}

impl Mode {
    /// Title used in reports
    pub fn title(&self) -> &'static str {
        match self {
            Mode::Fast => "Working Proxies",
            Mode::Residential => "Premium Residential Proxies",
        }
    }

    /// What a qualifying result is called
    pub fn result_label(&self) -> &'static str {
        match self {
            Mode::Fast => "working",
            Mode::Residential => "premium residential",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Fast => write!(f, "fast"),
            Mode::Residential => write!(f, "residential"),
        }
    }
}

impl FromStr for Mode {
    type Err = CheckerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(Mode::Fast),
            "residential" => Ok(Mode::Residential),
            _ => Err(CheckerError::invalid_config(format!(
                "invalid mode: {}. Use: fast, residential",
                s
            ))),
        }
    }
}

/// Configuration for proxy checking
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    pub mode: Mode,
    /// Overall timeout for each probe; the connect phase gets half of it
    pub timeout: Duration,
    /// Maximum probes in flight per chunk
    pub concurrency: usize,
    /// Number of proxies per chunk
    pub chunk_size: usize,
    /// Pause between two chunks
    pub chunk_pause: Duration,
    /// Progress is reported every this many outcomes
    pub progress_every: usize,
    /// IP echo URL to probe proxies against
    pub test_url: String,
    /// IP-intelligence base URL
    pub lookup_url: String,
    pub lookup_timeout: Duration,
    /// Pause after every lookup call
    pub lookup_pause: Duration,
    pub premium_threshold: i32,
    /// TTL of the per-chunk DNS cache
    pub dns_ttl: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self::for_mode(Mode::Fast)
    }
}

impl CheckerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset tuned for the given mode
    pub fn for_mode(mode: Mode) -> Self {
        let (timeout_secs, concurrency, chunk_size, pause_secs, progress_every) = match mode {
            Mode::Fast => (5, 100, 500, 1, 30),
            Mode::Residential => (8, 50, 100, 2, 20),
        };

        Self {
            mode,
            timeout: Duration::from_secs(timeout_secs),
            concurrency,
            chunk_size,
            chunk_pause: Duration::from_secs(pause_secs),
            progress_every,
            test_url: DEFAULT_TEST_URL.to_string(),
            lookup_url: DEFAULT_LOOKUP_URL.to_string(),
            lookup_timeout: Duration::from_secs(DEFAULT_LOOKUP_TIMEOUT_SECS),
            lookup_pause: Duration::from_millis(DEFAULT_LOOKUP_PAUSE_MS),
            premium_threshold: PREMIUM_THRESHOLD,
            dns_ttl: Duration::from_secs(DEFAULT_DNS_TTL_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_chunk_pause(mut self, pause: Duration) -> Self {
        self.chunk_pause = pause;
        self
    }

    pub fn with_progress_every(mut self, every: usize) -> Self {
        self.progress_every = every;
        self
    }

    pub fn with_test_url(mut self, url: String) -> Self {
        self.test_url = url;
        self
    }

    pub fn with_lookup_url(mut self, url: String) -> Self {
        self.lookup_url = url;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn with_lookup_pause(mut self, pause: Duration) -> Self {
        self.lookup_pause = pause;
        self
    }

    /// Connect-phase budget, half of the overall timeout
    pub fn connect_timeout(&self) -> Duration {
        self.timeout / 2
    }

    /// Idle connections kept per host, double the concurrency
    pub fn pool_size(&self) -> usize {
        self.concurrency * 2
    }

    pub fn validate(&self) -> Result<(), CheckerError> {
        if self.concurrency == 0 {
            return Err(CheckerError::invalid_config("concurrency must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(CheckerError::invalid_config("chunk size must be at least 1"));
        }
        if self.progress_every == 0 {
            return Err(CheckerError::invalid_config("progress interval must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(CheckerError::invalid_config("timeout must be positive"));
        }
        reqwest::Url::parse(&self.test_url)
            .map_err(|e| CheckerError::invalid_config(format!("test url: {}", e)))?;
        Ok(())
    }

    fn quality_analyzer(&self) -> QualityAnalyzer {
        QualityAnalyzer::new(
            self.lookup_url.clone(),
            self.lookup_timeout,
            self.lookup_pause,
            self.premium_threshold,
        )
    }
}

/// One checking strategy: how lines are parsed and how one proxy is probed
#[async_trait]
pub trait Checker: Send + Sync {
    fn config(&self) -> &CheckerConfig;

    fn mode(&self) -> Mode {
        self.config().mode
    }

    fn parse(&self, line: &str) -> Option<ProxyAddress> {
        ProxyParser::parse_line(line)
    }

    /// Open the client pool for one chunk
    fn open_pool(&self) -> Result<ClientPool, CheckerError> {
        ClientPool::new(self.config())
    }

    /// Check a single proxy. Never fails: problems end up in the outcome.
    async fn probe_one(&self, pool: &ClientPool, address: ProxyAddress) -> CheckRecord;
}

/// Build the checker for a mode
pub fn checker_for(config: CheckerConfig) -> Arc<dyn Checker> {
    match config.mode {
        Mode::Fast => Arc::new(FastChecker::new(config)),
        Mode::Residential => Arc::new(ResidentialChecker::new(config)),
    }
}

/// Probe executor: one GET through the proxy to the IP echo endpoint
#[derive(Debug, Clone)]
pub struct ProxyChecker {
    config: CheckerConfig,
}

impl ProxyChecker {
    /// Create a new proxy checker with custom configuration
    pub fn with_config(config: CheckerConfig) -> Self {
        Self { config }
    }

    /// Probe a proxy with a client already routed through it
    pub async fn probe(&self, client: &Client, address: &ProxyAddress) -> ProbeOutcome {
        let start = Instant::now();
        let request = client.get(&self.config.test_url).headers(random_headers());

        let response = tokio::time::timeout(self.config.timeout, async {
            let response = request.send().await?;
            let status = response.status();
            if status != StatusCode::OK {
                return Ok((status, None));
            }
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, Some(body)))
        })
        .await;

        match response {
            Ok(Ok((_, Some(body)))) => {
                let latency_ms = round_ms(start.elapsed());
                match extract_ip(&body) {
                    Some(ip) => ProbeOutcome::success(address.clone(), latency_ms, ip),
                    None => ProbeOutcome::failure(address.clone(), FailureReason::NoIpExtracted),
                }
            }
            Ok(Ok((status, None))) => {
                ProbeOutcome::failure(address.clone(), FailureReason::BadStatus(status.as_u16()))
            }
            Ok(Err(e)) if e.is_timeout() => ProbeOutcome::timeout(address.clone()),
            Ok(Err(e)) => ProbeOutcome::failure(address.clone(), FailureReason::error(root_cause(&e))),
            Err(_) => ProbeOutcome::timeout(address.clone()),
        }
    }

    /// Build a client for the proxy from the pool and probe it
    pub async fn check_proxy(&self, pool: &ClientPool, address: &ProxyAddress) -> (Option<Client>, ProbeOutcome) {
        match pool.client_for(address) {
            Ok(client) => {
                let outcome = self.probe(&client, address).await;
                (Some(client), outcome)
            }
            Err(e) => (
                None,
                ProbeOutcome::failure(address.clone(), FailureReason::error(root_cause(&*e))),
            ),
        }
    }
}

/// Connectivity-only checker
pub struct FastChecker {
    config: CheckerConfig,
    probe: ProxyChecker,
}

impl FastChecker {
    pub fn new(config: CheckerConfig) -> Self {
        let probe = ProxyChecker::with_config(config.clone());
        Self { config, probe }
    }
}

#[async_trait]
impl Checker for FastChecker {
    fn config(&self) -> &CheckerConfig {
        &self.config
    }

    async fn probe_one(&self, pool: &ClientPool, address: ProxyAddress) -> CheckRecord {
        let (_, outcome) = self.probe.check_proxy(pool, &address).await;
        CheckRecord::probe_only(outcome)
    }
}

/// Connectivity plus residential quality scoring
pub struct ResidentialChecker {
    config: CheckerConfig,
    probe: ProxyChecker,
    analyzer: QualityAnalyzer,
}

impl ResidentialChecker {
    pub fn new(config: CheckerConfig) -> Self {
        let probe = ProxyChecker::with_config(config.clone());
        let analyzer = config.quality_analyzer();
        Self {
            config,
            probe,
            analyzer,
        }
    }
}

#[async_trait]
impl Checker for ResidentialChecker {
    fn config(&self) -> &CheckerConfig {
        &self.config
    }

    async fn probe_one(&self, pool: &ClientPool, address: ProxyAddress) -> CheckRecord {
        let (client, outcome) = self.probe.check_proxy(pool, &address).await;

        match (client, &outcome.observed_ip) {
            (Some(client), Some(ip)) if outcome.succeeded => {
                let quality = self.analyzer.analyze(&client, ip, outcome.latency_ms).await;
                CheckRecord::with_quality(outcome, quality)
            }
            _ => CheckRecord::probe_only(outcome),
        }
    }
}

/// Realistic browser headers with a random user agent
pub fn random_headers() -> HeaderMap {
    let user_agent = USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0]);

    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(user_agent));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
        ),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert("DNT", HeaderValue::from_static("1"));
    headers.insert("Upgrade-Insecure-Requests", HeaderValue::from_static("1"));
    headers
}

/// Pull the caller address out of an echo response.
///
/// JSON bodies use the first entry of `origin`; anything else is taken as
/// plain text.
pub fn extract_ip(body: &str) -> Option<String> {
    let ip = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => map
            .get("origin")
            .and_then(|origin| origin.as_str())
            .and_then(|origin| origin.split(',').next())
            .unwrap_or_default()
            .trim()
            .to_string(),
        _ => body.trim().to_string(),
    };

    (!ip.is_empty()).then_some(ip)
}

/// Milliseconds rounded to two decimals
fn round_ms(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

/// Innermost error message; reqwest's outer message only repeats the URL
fn root_cause(error: &(dyn std::error::Error + 'static)) -> String {
    let mut current = error;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checker_config_default() {
        let config = CheckerConfig::default();
        assert_eq!(config.mode, Mode::Fast);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.concurrency, 100);
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.chunk_pause, Duration::from_secs(1));
        assert_eq!(config.progress_every, 30);
        assert_eq!(config.test_url, DEFAULT_TEST_URL);
    }

    #[test]
    fn test_residential_preset() {
        let config = CheckerConfig::for_mode(Mode::Residential);
        assert_eq!(config.timeout, Duration::from_secs(8));
        assert_eq!(config.connect_timeout(), Duration::from_secs(4));
        assert_eq!(config.concurrency, 50);
        assert_eq!(config.pool_size(), 100);
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.chunk_pause, Duration::from_secs(2));
        assert_eq!(config.progress_every, 20);
        assert_eq!(config.premium_threshold, 35);
    }

    #[test]
    fn test_checker_config_builder() {
        let config = CheckerConfig::new()
            .with_timeout(Duration::from_secs(30))
            .with_concurrency(20)
            .with_chunk_size(7)
            .with_chunk_pause(Duration::ZERO)
            .with_progress_every(3)
            .with_test_url("http://example.com".to_string())
            .with_lookup_pause(Duration::ZERO);

        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.concurrency, 20);
        assert_eq!(config.chunk_size, 7);
        assert_eq!(config.progress_every, 3);
        assert_eq!(config.test_url, "http://example.com");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert!(CheckerConfig::new().with_concurrency(0).validate().is_err());
        assert!(CheckerConfig::new().with_chunk_size(0).validate().is_err());
        assert!(CheckerConfig::new().with_timeout(Duration::ZERO).validate().is_err());
        assert!(CheckerConfig::new()
            .with_test_url("not a url".to_string())
            .validate()
            .is_err());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("fast".parse::<Mode>().unwrap(), Mode::Fast);
        assert_eq!("Residential".parse::<Mode>().unwrap(), Mode::Residential);
        assert!("socks".parse::<Mode>().is_err());
        assert_eq!(Mode::Residential.to_string(), "residential");
    }

    #[test]
    fn test_checker_for_mode() {
        let fast = checker_for(CheckerConfig::for_mode(Mode::Fast));
        assert_eq!(fast.mode(), Mode::Fast);
        let residential = checker_for(CheckerConfig::for_mode(Mode::Residential));
        assert_eq!(residential.mode(), Mode::Residential);
        assert!(residential.parse("1.2.3.4:8080").is_some());
        assert!(residential.parse("# nope").is_none());
    }

    #[test]
    fn test_extract_ip_from_json() {
        assert_eq!(extract_ip(r#"{"origin":"9.9.9.9"}"#).as_deref(), Some("9.9.9.9"));
        assert_eq!(
            extract_ip(r#"{"origin":"9.9.9.9, 10.0.0.1"}"#).as_deref(),
            Some("9.9.9.9")
        );
        assert_eq!(extract_ip(r#"{"origin":""}"#), None);
        assert_eq!(extract_ip(r#"{"ip":"9.9.9.9"}"#), None);
    }

    #[test]
    fn test_extract_ip_falls_back_to_text() {
        assert_eq!(extract_ip("9.9.9.9\n").as_deref(), Some("9.9.9.9"));
        assert_eq!(extract_ip("   "), None);
        assert_eq!(extract_ip(""), None);
    }

    #[test]
    fn test_random_headers() {
        let headers = random_headers();
        let agent = headers.get(USER_AGENT).unwrap().to_str().unwrap();
        assert!(USER_AGENTS.contains(&agent));
        assert!(headers.contains_key(ACCEPT));
        assert!(headers.contains_key(ACCEPT_LANGUAGE));
        assert_eq!(headers.get("DNT").unwrap(), "1");
    }

    #[test]
    fn test_round_ms() {
        assert_eq!(round_ms(Duration::from_micros(1_234_567)), 1234.57);
        assert_eq!(round_ms(Duration::from_millis(5)), 5.0);
    }

    #[test]
    fn test_root_cause() {
        let inner = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "Connection refused");
        let outer = std::io::Error::new(std::io::ErrorKind::Other, inner);
        assert_eq!(root_cause(&outer), "Connection refused");
    }
}
