//! Final ordering and formatting of a session's results

use crate::proxy::{Mode, ResultRecord};
use crate::session::Session;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Number of entries shown in the summary
pub const TOP_ENTRIES: usize = 5;

/// Everything handed back when a session completes
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub summary: Summary,
    /// One address per line, clean form
    pub clean_report: String,
    /// Header block plus one annotated line per result
    pub detailed_report: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub mode: Mode,
    pub checked: usize,
    pub total: usize,
    pub found: usize,
    pub elapsed_secs: f64,
    pub top: Vec<ResultRecord>,
}

impl Summary {
    /// Qualifying share of the checked proxies, in percent
    pub fn success_rate(&self) -> f64 {
        if self.checked == 0 {
            0.0
        } else {
            self.found as f64 / self.checked as f64 * 100.0
        }
    }

    /// Checked proxies per second
    pub fn rate(&self) -> f64 {
        if self.elapsed_secs > 0.0 {
            self.checked as f64 / self.elapsed_secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let checker_name = match self.mode {
            Mode::Fast => "Fast",
            Mode::Residential => "Residential",
        };

        writeln!(f, "Proxy Checking Complete!")?;
        writeln!(f)?;
        writeln!(f, "Mode: {} Checker", checker_name)?;
        writeln!(f, "Results:")?;
        writeln!(f, "• Checked: {}", self.checked)?;
        writeln!(f, "• {} found: {}", capitalize(self.mode.result_label()), self.found)?;
        writeln!(f, "• Success: {:.1}%", self.success_rate())?;
        writeln!(f, "• Time: {:.1}s", self.elapsed_secs)?;
        write!(f, "• Rate: {:.1}/s", self.rate())?;

        if !self.top.is_empty() {
            writeln!(f)?;
            writeln!(f)?;
            write!(f, "Top {}:", self.top.len())?;
            for (rank, result) in self.top.iter().enumerate() {
                write!(f, "\n{}. {}", rank + 1, top_line(self.mode, result))?;
            }
        }
        Ok(())
    }
}

/// Sort, deduplicate and format the results of a finished session
pub async fn finalize(session: &Session) -> FinalReport {
    let snapshot = session.tracker().snapshot().await;
    let results = session.tracker().results().await;
    build_report(
        session.mode(),
        snapshot.checked,
        snapshot.total,
        snapshot.elapsed_secs,
        results,
        Local::now(),
    )
}

pub fn build_report(
    mode: Mode,
    checked: usize,
    total: usize,
    elapsed_secs: f64,
    results: Vec<ResultRecord>,
    generated: DateTime<Local>,
) -> FinalReport {
    let results = order_results(mode, results);

    let summary = Summary {
        mode,
        checked,
        total,
        found: results.len(),
        elapsed_secs,
        top: results.iter().take(TOP_ENTRIES).cloned().collect(),
    };

    FinalReport {
        clean_report: clean_report(&results),
        detailed_report: detailed_report(mode, checked, &results, generated),
        summary,
    }
}

/// Best results first, one entry per address
pub fn order_results(mode: Mode, mut results: Vec<ResultRecord>) -> Vec<ResultRecord> {
    match mode {
        Mode::Residential => results.sort_by(|a, b| {
            b.score()
                .cmp(&a.score())
                .then(a.latency_ms.total_cmp(&b.latency_ms))
        }),
        Mode::Fast => results.sort_by(|a, b| a.latency_ms.total_cmp(&b.latency_ms)),
    }

    let mut seen = HashSet::new();
    results.retain(|result| seen.insert(result.address.clone()));
    results
}

pub fn clean_report(results: &[ResultRecord]) -> String {
    results
        .iter()
        .map(|result| format!("{}\n", result.address.clean()))
        .collect()
}

pub fn detailed_report(
    mode: Mode,
    checked: usize,
    results: &[ResultRecord],
    generated: DateTime<Local>,
) -> String {
    let mut report = format!(
        "# {} Results\n# Checked: {}\n# Found: {}\n# Date: {}\n\n",
        mode.title(),
        checked,
        results.len(),
        generated.format("%Y-%m-%d %H:%M:%S")
    );

    for result in results {
        report.push_str(&detailed_line(mode, result));
        report.push('\n');
    }
    report
}

fn detailed_line(mode: Mode, result: &ResultRecord) -> String {
    match (mode, &result.quality) {
        (Mode::Residential, Some(quality)) => format!(
            "{} # {}ms | Score: {} | {} | {} | IP: {}",
            result.address.clean(),
            result.latency_ms,
            quality.score,
            quality.country,
            quality.isp,
            result.observed_ip
        ),
        _ => format!(
            "{} # {}ms | {}",
            result.address.clean(),
            result.latency_ms,
            result.observed_ip
        ),
    }
}

fn top_line(mode: Mode, result: &ResultRecord) -> String {
    match (mode, &result.quality) {
        (Mode::Residential, Some(quality)) => format!(
            "{} | Score: {} | {} | {} | {}ms",
            result.address.clean(),
            quality.score,
            quality.country,
            quality.isp,
            result.latency_ms
        ),
        _ => format!(
            "{} | {}ms | {}",
            result.address.clean(),
            result.latency_ms,
            result.observed_ip
        ),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProxyAddress, ProxyScheme, QualityRecord};
    use chrono::TimeZone;

    fn result(port: u16, latency_ms: f64, score: Option<i32>) -> ResultRecord {
        let quality = score.map(|score| {
            let mut quality = QualityRecord::unscored(latency_ms, 35);
            quality.score = score;
            quality.premium = score >= 35;
            quality.country = "United States".to_string();
            quality.isp = "Verizon Fios".to_string();
            quality
        });

        ResultRecord {
            address: ProxyAddress::new(ProxyScheme::Http, "1.2.3.4".to_string(), port),
            latency_ms,
            observed_ip: "9.9.9.9".to_string(),
            quality,
        }
    }

    fn generated() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap()
    }

    #[test]
    fn test_fast_results_sorted_by_latency() {
        let ordered = order_results(
            Mode::Fast,
            vec![result(1, 300.0, None), result(2, 100.0, None), result(3, 200.0, None)],
        );
        let ports: Vec<u16> = ordered.iter().map(|r| r.address.port()).collect();
        assert_eq!(ports, vec![2, 3, 1]);
    }

    #[test]
    fn test_residential_results_sorted_by_score() {
        let ordered = order_results(
            Mode::Residential,
            vec![
                result(1, 100.0, Some(40)),
                result(2, 100.0, Some(85)),
                result(3, 50.0, Some(40)),
            ],
        );
        let ports: Vec<u16> = ordered.iter().map(|r| r.address.port()).collect();
        assert_eq!(ports, vec![2, 3, 1]);
    }

    #[test]
    fn test_duplicates_keep_best_entry() {
        let ordered = order_results(
            Mode::Fast,
            vec![result(1, 300.0, None), result(1, 100.0, None), result(2, 200.0, None)],
        );
        assert_eq!(ordered.len(), 2);
        assert_eq!(ordered[0].latency_ms, 100.0);
    }

    #[test]
    fn test_clean_report_has_no_annotations() {
        let report = build_report(
            Mode::Fast,
            3,
            3,
            1.0,
            vec![result(8080, 20.0, None), result(3128, 10.0, None)],
            generated(),
        );
        assert_eq!(report.clean_report, "1.2.3.4:3128\n1.2.3.4:8080\n");
    }

    #[test]
    fn test_clean_report_keeps_https_scheme() {
        let mut secure = result(443, 10.0, None);
        secure.address = ProxyAddress::new(ProxyScheme::Https, "proxy.example".to_string(), 443);
        let report = build_report(Mode::Fast, 2, 2, 1.0, vec![secure, result(80, 20.0, None)], generated());
        assert_eq!(report.clean_report, "https://proxy.example:443\n1.2.3.4:80\n");
    }

    #[test]
    fn test_detailed_report_fast() {
        let report = detailed_report(Mode::Fast, 10, &[result(8080, 123.45, None)], generated());
        assert_eq!(
            report,
            "# Working Proxies Results\n# Checked: 10\n# Found: 1\n# Date: 2024-03-01 12:30:05\n\n\
             1.2.3.4:8080 # 123.45ms | 9.9.9.9\n"
        );
    }

    #[test]
    fn test_detailed_report_residential() {
        let report = detailed_report(Mode::Residential, 4, &[result(8080, 250.0, Some(80))], generated());
        assert!(report.starts_with("# Premium Residential Proxies Results\n# Checked: 4\n# Found: 1\n"));
        assert!(report.ends_with(
            "1.2.3.4:8080 # 250ms | Score: 80 | United States | Verizon Fios | IP: 9.9.9.9\n"
        ));
    }

    #[test]
    fn test_summary_metrics_and_top_entries() {
        let results = (0..8).map(|n| result(8000 + n, 100.0 + n as f64, None)).collect();
        let report = build_report(Mode::Fast, 20, 20, 4.0, results, generated());
        let summary = &report.summary;

        assert_eq!(summary.found, 8);
        assert_eq!(summary.success_rate(), 40.0);
        assert_eq!(summary.rate(), 5.0);
        assert_eq!(summary.top.len(), TOP_ENTRIES);

        let text = summary.to_string();
        assert!(text.starts_with("Proxy Checking Complete!"));
        assert!(text.contains("Mode: Fast Checker"));
        assert!(text.contains("• Working found: 8"));
        assert!(text.contains("• Success: 40.0%"));
        assert!(text.contains("Top 5:\n1. 1.2.3.4:8000 | 100ms | 9.9.9.9"));
        assert!(!text.contains("6. "));
    }

    #[test]
    fn test_empty_summary() {
        let report = build_report(Mode::Residential, 0, 0, 0.0, Vec::new(), generated());
        assert_eq!(report.summary.success_rate(), 0.0);
        assert_eq!(report.summary.rate(), 0.0);
        assert!(report.summary.to_string().contains("• Premium residential found: 0"));
        assert!(!report.summary.to_string().contains("Top"));
        assert_eq!(report.clean_report, "");
    }
}
