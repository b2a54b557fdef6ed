//! Proxy module for parsing, probing and grading proxies
//!
//! This module provides functionality for:
//! - Parsing proxies from various formats (IP:PORT, IP:PORT:USER:PASS, USER:PASS@IP:PORT, URLs)
//! - Probing proxies through an IP echo endpoint with bounded concurrency
//! - Scoring the residential quality of working proxies

pub mod batch;
pub mod checker;
pub mod models;
pub mod parser;
pub mod pool;
pub mod quality;

pub use batch::BatchCoordinator;
pub use checker::{checker_for, Checker, CheckerConfig, FastChecker, Mode, ProxyChecker, ResidentialChecker};
pub use models::{CheckRecord, FailureReason, ProbeOutcome, ProxyAddress, ProxyAuth, ProxyScheme, ResultRecord};
pub use parser::ProxyParser;
pub use pool::{ClientPool, DnsCache};
pub use quality::{IpLookup, QualityAnalyzer, QualityRecord};
