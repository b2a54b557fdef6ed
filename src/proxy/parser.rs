//! Proxy parser module for normalizing proxies from various formats

use crate::proxy::models::{ProxyAddress, ProxyScheme};
use crate::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Prefix some proxy list exporters put in front of every line
const HTTP_TAG_PREFIX: &str = "(Http)";

/// `[user:pass@]host:port[/]`; the password may contain `:` and `@`
static AUTHORITY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:([^:@/\s]+):(.+)@)?([^:@/\s]+):(\d{1,5})/?$")
        .expect("Invalid authority regex")
});

/// Proxy parser for normalizing proxies from strings and files
pub struct ProxyParser;

impl ProxyParser {
    /// Normalize a single proxy line
    ///
    /// Supports formats, tried in this order:
    /// - http://[USER:PASS@]HOST:PORT, https://[USER:PASS@]HOST:PORT
    /// - socks5://[USER:PASS@]HOST:PORT (rewritten to http)
    /// - USER:PASS@HOST:PORT
    /// - HOST:PORT:USER:PASS (password may contain colons)
    /// - HOST:PORT
    pub fn parse_line(line: &str) -> Option<ProxyAddress> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        let line = line.strip_prefix(HTTP_TAG_PREFIX).unwrap_or(line).trim();

        if let Some(rest) = line.strip_prefix("http://") {
            return Self::parse_authority(rest, ProxyScheme::Http);
        }
        if let Some(rest) = line.strip_prefix("https://") {
            return Self::parse_authority(rest, ProxyScheme::Https);
        }
        if let Some(rest) = line.strip_prefix("socks5://") {
            return Self::parse_authority(rest, ProxyScheme::Http);
        }

        if let Some(proxy) = Self::parse_auth_at_format(line) {
            return Some(proxy);
        }

        Self::parse_colon_format(line)
    }

    /// Parse the part after `scheme://`
    fn parse_authority(rest: &str, scheme: ProxyScheme) -> Option<ProxyAddress> {
        let caps = AUTHORITY_REGEX.captures(rest)?;

        let host = caps[3].to_string();
        let port = Self::parse_port(&caps[4])?;

        match (caps.get(1), caps.get(2)) {
            (Some(user), Some(pass)) => Some(ProxyAddress::with_auth(
                scheme,
                host,
                port,
                user.as_str().to_string(),
                pass.as_str().to_string(),
            )),
            _ => Some(ProxyAddress::new(scheme, host, port)),
        }
    }

    /// Parse user:pass@host:port format
    fn parse_auth_at_format(line: &str) -> Option<ProxyAddress> {
        let (auth_part, host_port) = line.rsplit_once('@')?;
        let (username, password) = auth_part.split_once(':')?;
        let (host, port) = host_port.split_once(':')?;

        if username.is_empty() || !Self::is_valid_host(host) {
            return None;
        }
        let port = Self::parse_port(port)?;

        Some(ProxyAddress::with_auth(
            ProxyScheme::Http,
            host.to_string(),
            port,
            username.to_string(),
            password.to_string(),
        ))
    }

    /// Parse host:port or host:port:user:pass format
    fn parse_colon_format(line: &str) -> Option<ProxyAddress> {
        let parts: Vec<&str> = line.split(':').collect();

        if parts.len() < 2 || parts.len() == 3 || !Self::is_valid_host(parts[0]) {
            return None;
        }
        let host = parts[0].to_string();
        let port = Self::parse_port(parts[1])?;

        if parts.len() == 2 {
            return Some(ProxyAddress::new(ProxyScheme::Http, host, port));
        }

        let username = parts[2];
        if username.is_empty() || username.contains('@') {
            return None;
        }
        let password = parts[3..].join(":");
        Some(ProxyAddress::with_auth(
            ProxyScheme::Http,
            host,
            port,
            username.to_string(),
            password,
        ))
    }

    fn parse_port(s: &str) -> Option<u16> {
        match s.parse::<u16>() {
            Ok(0) | Err(_) => None,
            Ok(port) => Some(port),
        }
    }

    fn is_valid_host(host: &str) -> bool {
        !host.is_empty()
            && !host
                .chars()
                .any(|c| c.is_whitespace() || c == '/' || c == '@')
    }

    /// Normalize lines and drop duplicates, keeping the first occurrence
    pub fn parse_unique<I, S>(lines: I) -> Vec<ProxyAddress>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        lines
            .into_iter()
            .filter_map(|line| Self::parse_line(line.as_ref()))
            .filter(|proxy| seen.insert(proxy.canonical().to_string()))
            .collect()
    }

    /// Parse unique proxies from a string (multiple lines)
    pub fn parse_string(content: &str) -> Vec<ProxyAddress> {
        Self::parse_unique(content.lines())
    }

    /// Parse unique proxies from a file, decoding it best-effort
    pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<ProxyAddress>> {
        let bytes = fs::read(path)?;
        Ok(Self::parse_string(&Self::decode_lossy(&bytes)))
    }

    /// Decode as UTF-8, falling back to Latin-1 when the bytes are not valid UTF-8
    pub fn decode_lossy(bytes: &[u8]) -> String {
        match std::str::from_utf8(bytes) {
            Ok(text) => text.to_string(),
            Err(_) => bytes.iter().map(|&b| b as char).collect(),
        }
    }

    /// Number of lines that are neither blank nor comments
    pub fn count_candidates(content: &str) -> usize {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .count()
    }

    /// Save proxies to a file, one clean address per line
    pub fn save_to_file<P: AsRef<Path>>(proxies: &[ProxyAddress], path: P) -> Result<()> {
        let content: String = proxies
            .iter()
            .map(|p| p.clean())
            .collect::<Vec<_>>()
            .join("\n");

        fs::write(path, content)?;
        Ok(())
    }
}
