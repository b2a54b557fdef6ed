//! Residential quality scoring from an IP-intelligence lookup

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Default IP-intelligence endpoint, the looked up IP is appended
pub const DEFAULT_LOOKUP_URL: &str = "http://ip-api.com/json/";

/// Fields requested from the lookup endpoint
const LOOKUP_FIELDS: &str = "status,country,regionName,city,isp,org,as,proxy,hosting,mobile";

/// Default timeout for a single lookup
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 10;

/// Default pause after every lookup call
pub const DEFAULT_LOOKUP_PAUSE_MS: u64 = 500;

/// Minimum score for a proxy to count as premium residential
pub const PREMIUM_THRESHOLD: i32 = 35;

const NOT_HOSTING_POINTS: i32 = 30;
const NOT_PROXY_POINTS: i32 = 30;
const MOBILE_POINTS: i32 = 25;
const RESIDENTIAL_ISP_POINTS: i32 = 20;
const DATACENTER_ISP_PENALTY: i32 = -25;

const RESIDENTIAL_KEYWORDS: &[&str] = &[
    "comcast",
    "verizon",
    "att",
    "charter",
    "cox",
    "spectrum",
    "xfinity",
    "telecom",
    "broadband",
    "cable",
    "fiber",
    "dsl",
    "residential",
];

const DATACENTER_KEYWORDS: &[&str] = &[
    "amazon",
    "google",
    "microsoft",
    "digitalocean",
    "vultr",
    "linode",
    "ovh",
    "hetzner",
    "cloudflare",
    "hosting",
    "server",
    "datacenter",
    "cloud",
    "vps",
    "dedicated",
];

/// Raw lookup response. Every field is optional; absent means "not reported".
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpLookup {
    pub status: Option<String>,
    pub country: Option<String>,
    pub region_name: Option<String>,
    pub city: Option<String>,
    pub isp: Option<String>,
    pub org: Option<String>,
    #[serde(rename = "as")]
    pub as_name: Option<String>,
    pub proxy: Option<bool>,
    pub hosting: Option<bool>,
    pub mobile: Option<bool>,
}

impl IpLookup {
    pub fn is_success(&self) -> bool {
        self.status.as_deref() == Some("success")
    }
}

/// Quality verdict for one proxy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRecord {
    pub hosting: bool,
    pub proxy: bool,
    pub mobile: bool,
    pub country: String,
    pub isp: String,
    pub region: Option<String>,
    pub city: Option<String>,
    pub org: Option<String>,
    pub as_name: Option<String>,
    pub score: i32,
    pub premium: bool,
}

impl QualityRecord {
    /// Build the record from a lookup (or its absence) and the probe latency
    pub fn from_lookup(lookup: Option<&IpLookup>, latency_ms: f64, threshold: i32) -> Self {
        let score = score(lookup, latency_ms);
        let lookup = lookup.cloned().unwrap_or_default();

        Self {
            hosting: lookup.hosting.unwrap_or(true),
            proxy: lookup.proxy.unwrap_or(true),
            mobile: lookup.mobile.unwrap_or(false),
            country: lookup.country.unwrap_or_else(|| "Unknown".to_string()),
            isp: lookup.isp.unwrap_or_else(|| "Unknown".to_string()),
            region: lookup.region_name,
            city: lookup.city,
            org: lookup.org,
            as_name: lookup.as_name,
            score,
            premium: score >= threshold,
        }
    }

    /// Record for a proxy whose lookup failed or was skipped
    pub fn unscored(latency_ms: f64, threshold: i32) -> Self {
        Self::from_lookup(None, latency_ms, threshold)
    }
}

/// Compute the quality score.
///
/// Only a successful lookup contributes flag and ISP points; the latency
/// bonus always applies.
pub fn score(lookup: Option<&IpLookup>, latency_ms: f64) -> i32 {
    let mut score = 0;

    if let Some(lookup) = lookup.filter(|l| l.is_success()) {
        if lookup.hosting == Some(false) {
            score += NOT_HOSTING_POINTS;
        }
        if lookup.proxy == Some(false) {
            score += NOT_PROXY_POINTS;
        }
        if lookup.mobile == Some(true) {
            score += MOBILE_POINTS;
        }
        if let Some(isp) = &lookup.isp {
            score += isp_adjustment(isp);
        }
    }

    score + latency_bonus(latency_ms)
}

/// +20 for a residential carrier name, -25 for a datacenter name, else 0
pub fn isp_adjustment(isp: &str) -> i32 {
    let isp = isp.to_lowercase();
    if RESIDENTIAL_KEYWORDS.iter().any(|k| isp.contains(k)) {
        RESIDENTIAL_ISP_POINTS
    } else if DATACENTER_KEYWORDS.iter().any(|k| isp.contains(k)) {
        DATACENTER_ISP_PENALTY
    } else {
        0
    }
}

/// Slow consumer links score slightly higher
pub fn latency_bonus(latency_ms: f64) -> i32 {
    if latency_ms > 2000.0 {
        10
    } else if latency_ms > 1000.0 {
        5
    } else {
        0
    }
}

/// Looks up observed proxy IPs and scores them
#[derive(Debug, Clone)]
pub struct QualityAnalyzer {
    lookup_url: String,
    timeout: Duration,
    pause: Duration,
    threshold: i32,
}

impl Default for QualityAnalyzer {
    fn default() -> Self {
        Self {
            lookup_url: DEFAULT_LOOKUP_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_LOOKUP_TIMEOUT_SECS),
            pause: Duration::from_millis(DEFAULT_LOOKUP_PAUSE_MS),
            threshold: PREMIUM_THRESHOLD,
        }
    }
}

impl QualityAnalyzer {
    pub fn new(lookup_url: String, timeout: Duration, pause: Duration, threshold: i32) -> Self {
        Self {
            lookup_url,
            timeout,
            pause,
            threshold,
        }
    }

    /// Full lookup URL for an IP
    pub fn lookup_url_for(&self, ip: &str) -> String {
        format!(
            "{}/{}?fields={}",
            self.lookup_url.trim_end_matches('/'),
            ip,
            LOOKUP_FIELDS
        )
    }

    /// Score the proxy behind `client`. Never fails: lookup errors give a
    /// record without lookup points.
    pub async fn analyze(&self, client: &Client, observed_ip: &str, latency_ms: f64) -> QualityRecord {
        if observed_ip.parse::<Ipv4Addr>().is_err() {
            tracing::debug!("skipping lookup for non-IPv4 address {}", observed_ip);
            return QualityRecord::unscored(latency_ms, self.threshold);
        }

        let lookup = self.lookup(client, observed_ip).await;
        tokio::time::sleep(self.pause).await;

        match lookup {
            Ok(lookup) => QualityRecord::from_lookup(Some(&lookup), latency_ms, self.threshold),
            Err(e) => {
                tracing::debug!("IP analysis failed for {}: {}", observed_ip, e);
                QualityRecord::unscored(latency_ms, self.threshold)
            }
        }
    }

    async fn lookup(&self, client: &Client, ip: &str) -> crate::Result<IpLookup> {
        let response = client
            .get(self.lookup_url_for(ip))
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;

        let lookup: IpLookup = response.json().await?;
        if !lookup.is_success() {
            anyhow::bail!("lookup status {:?}", lookup.status);
        }
        Ok(lookup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(hosting: bool, proxy: bool, mobile: bool, isp: &str) -> IpLookup {
        IpLookup {
            status: Some("success".to_string()),
            country: Some("United States".to_string()),
            isp: Some(isp.to_string()),
            hosting: Some(hosting),
            proxy: Some(proxy),
            mobile: Some(mobile),
            ..Default::default()
        }
    }

    #[test]
    fn test_residential_scenario_scores_80() {
        let data = lookup(false, false, false, "Verizon Fios");
        let record = QualityRecord::from_lookup(Some(&data), 450.0, PREMIUM_THRESHOLD);
        assert_eq!(record.score, 80);
        assert!(record.premium);
        assert_eq!(record.isp, "Verizon Fios");
        assert_eq!(record.country, "United States");
    }

    #[test]
    fn test_mobile_bonus() {
        let data = lookup(false, false, true, "Some Carrier");
        assert_eq!(score(Some(&data), 100.0), 85);
    }

    #[test]
    fn test_datacenter_penalty() {
        let data = lookup(true, true, false, "DigitalOcean, LLC");
        assert_eq!(score(Some(&data), 100.0), -25);
        let record = QualityRecord::from_lookup(Some(&data), 100.0, PREMIUM_THRESHOLD);
        assert!(!record.premium);
    }

    #[test]
    fn test_residential_keyword_takes_precedence() {
        // "cable" and "cloud" both match
        assert_eq!(isp_adjustment("Cable Cloud Inc"), RESIDENTIAL_ISP_POINTS);
        assert_eq!(isp_adjustment("HETZNER Online"), DATACENTER_ISP_PENALTY);
        assert_eq!(isp_adjustment("Deutsche Bahn"), 0);
    }

    #[test]
    fn test_latency_bonus_boundaries() {
        assert_eq!(latency_bonus(0.0), 0);
        assert_eq!(latency_bonus(1000.0), 0);
        assert_eq!(latency_bonus(1000.01), 5);
        assert_eq!(latency_bonus(2000.0), 5);
        assert_eq!(latency_bonus(2000.5), 10);
    }

    #[test]
    fn test_missing_flags_score_nothing() {
        let data = IpLookup {
            status: Some("success".to_string()),
            ..Default::default()
        };
        let record = QualityRecord::from_lookup(Some(&data), 100.0, PREMIUM_THRESHOLD);
        assert_eq!(record.score, 0);
        assert!(record.hosting);
        assert!(record.proxy);
        assert!(!record.mobile);
        assert_eq!(record.isp, "Unknown");
        assert_eq!(record.country, "Unknown");
    }

    #[test]
    fn test_failed_lookup_status_gets_no_lookup_points() {
        let mut data = lookup(false, false, true, "Comcast Cable");
        data.status = Some("fail".to_string());
        assert_eq!(score(Some(&data), 2500.0), 10);
    }

    #[test]
    fn test_unscored_keeps_latency_bonus_below_threshold() {
        let record = QualityRecord::unscored(3000.0, PREMIUM_THRESHOLD);
        assert_eq!(record.score, 10);
        assert!(!record.premium);
    }

    #[test]
    fn test_premium_iff_score_reaches_threshold() {
        for (hosting, proxy, mobile, isp, latency) in [
            (false, true, false, "Acme", 100.0),
            (false, true, false, "Acme", 1500.0),
            (false, true, false, "Acme Fiber", 100.0),
            (true, true, true, "Acme", 2500.0),
            (false, false, false, "AWS amazon", 100.0),
        ] {
            let data = lookup(hosting, proxy, mobile, isp);
            let record = QualityRecord::from_lookup(Some(&data), latency, PREMIUM_THRESHOLD);
            assert_eq!(record.premium, record.score >= PREMIUM_THRESHOLD);
        }
    }

    #[test]
    fn test_lookup_response_deserializes() {
        let json = r#"{"status":"success","country":"Germany","regionName":"Berlin",
            "city":"Berlin","isp":"Deutsche Telekom AG","org":"DTAG","as":"AS3320 Deutsche Telekom AG",
            "proxy":false,"hosting":false,"mobile":false}"#;
        let data: IpLookup = serde_json::from_str(json).unwrap();
        assert!(data.is_success());
        assert_eq!(data.region_name.as_deref(), Some("Berlin"));
        assert_eq!(data.as_name.as_deref(), Some("AS3320 Deutsche Telekom AG"));
        // "Telekom" is not on the keyword list
        assert_eq!(score(Some(&data), 100.0), 60);
    }

    #[test]
    fn test_lookup_url_for() {
        let analyzer = QualityAnalyzer::default();
        assert_eq!(
            analyzer.lookup_url_for("9.9.9.9"),
            "http://ip-api.com/json/9.9.9.9?fields=status,country,regionName,city,isp,org,as,proxy,hosting,mobile"
        );
    }

    #[tokio::test]
    async fn test_non_ipv4_skips_lookup() {
        let analyzer = QualityAnalyzer::new(
            "http://127.0.0.1:9".to_string(),
            Duration::from_millis(50),
            Duration::from_secs(60),
            PREMIUM_THRESHOLD,
        );
        let client = Client::new();
        // would block on the pause if the lookup ran
        let record = tokio::time::timeout(
            Duration::from_secs(5),
            analyzer.analyze(&client, "Working", 100.0),
        )
        .await
        .unwrap();
        assert_eq!(record.score, 0);
        assert!(!record.premium);
    }
}
