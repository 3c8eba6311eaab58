pub mod feeds;

use crate::config::ThreatIntelConfig;
use crate::error::ScoringError;
use anyhow::Context;
use feeds::FeedMatch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UrlVerdict {
    Malicious,
    Suspicious,
    Clean,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlReputation {
    pub url: String,
    pub verdict: UrlVerdict,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainIntel {
    pub domain: String,
    pub age_days: Option<u32>,
    pub registrar: Option<String>,
    pub sinkholed: bool,
    /// Provider risk score, 0 (clean) to 100.
    pub reputation: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpIntel {
    pub address: String,
    /// Abuse confidence, 0 to 100.
    pub abuse_confidence: Option<f64>,
    pub country: Option<String>,
    pub asn: Option<String>,
}

/// Engine counts from a multi-engine scanner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderVerdict {
    pub malicious: u32,
    pub suspicious: u32,
    pub harmless: u32,
}

/// Results already fetched by the lookup collaborator. Every part is
/// optional; a missing part contributes nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatIntelReport {
    pub urls: Vec<UrlReputation>,
    pub domain: Option<DomainIntel>,
    pub ip: Option<IpIntel>,
    pub providers: BTreeMap<String, ProviderVerdict>,
    pub feed_matches: Vec<FeedMatch>,
}

impl ThreatIntelReport {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read threat intel report: {path}"))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid threat intel report: {path}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatAssessment {
    /// Bounded to [0, 100].
    pub score: f64,
    /// One line per term that contributed, in a fixed order, followed by a
    /// note when the remote lookup failed and only local feeds were used.
    pub findings: Vec<String>,
}

/// Either a checked result (possibly score 0) or an explicit "no data".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ThreatIntelOutcome {
    Available(ThreatAssessment),
    Unavailable { reason: String },
}

impl ThreatIntelOutcome {
    pub fn unavailable(reason: &str) -> Self {
        ThreatIntelOutcome::Unavailable {
            reason: reason.to_string(),
        }
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            ThreatIntelOutcome::Available(a) => Some(a.score),
            ThreatIntelOutcome::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ThreatIntelOutcome::Available(_))
    }
}

/// Collapses a report into one bounded score.
///
/// Terms, each capped where noted:
/// - malicious URLs: first one `malicious_url_weight`, each further one
///   `additional_malicious_url_weight`, capped at `malicious_url_cap`
/// - suspicious URLs: `suspicious_url_weight` each, capped
/// - domain younger than `young_domain_days`: `young_domain_weight`
/// - sinkholed domain: `sinkhole_weight`
/// - domain reputation and IP abuse confidence scaled by their factors
/// - providers: `provider_detection_weight` per provider with malicious
///   detections, half that for suspicious-only, capped at `provider_cap`
/// - feed matches: `feed_match_weight` each, capped
pub struct ThreatIntelAggregator {
    config: ThreatIntelConfig,
}

impl Default for ThreatIntelAggregator {
    fn default() -> Self {
        Self::new(ThreatIntelConfig::default())
    }
}

impl ThreatIntelAggregator {
    pub fn new(config: ThreatIntelConfig) -> Self {
        Self { config }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    pub fn assess(&self, report: &ThreatIntelReport) -> ThreatAssessment {
        let c = &self.config;
        let mut score = 0.0;
        let mut findings = Vec::new();

        let malicious: Vec<&str> = report
            .urls
            .iter()
            .filter(|u| u.verdict == UrlVerdict::Malicious)
            .map(|u| u.url.as_str())
            .collect();
        if !malicious.is_empty() {
            let extra = (malicious.len() - 1) as f64 * c.additional_malicious_url_weight;
            score += (c.malicious_url_weight + extra).min(c.malicious_url_cap);
            for url in &malicious {
                findings.push(format!("URL reported malicious: {url}"));
            }
        }

        let suspicious: Vec<&str> = report
            .urls
            .iter()
            .filter(|u| u.verdict == UrlVerdict::Suspicious)
            .map(|u| u.url.as_str())
            .collect();
        if !suspicious.is_empty() {
            score += (suspicious.len() as f64 * c.suspicious_url_weight).min(c.suspicious_url_cap);
            for url in &suspicious {
                findings.push(format!("URL reported suspicious: {url}"));
            }
        }

        if let Some(domain) = &report.domain {
            if let Some(age) = domain.age_days.filter(|age| *age < c.young_domain_days) {
                score += c.young_domain_weight;
                findings.push(format!(
                    "Domain {} registered {} days ago{}",
                    domain.domain,
                    age,
                    domain
                        .registrar
                        .as_deref()
                        .map(|r| format!(" via {r}"))
                        .unwrap_or_default()
                ));
            }
            if domain.sinkholed {
                score += c.sinkhole_weight;
                findings.push(format!("Domain {} is sinkholed", domain.domain));
            }
            let risk = domain.reputation.unwrap_or(0.0).clamp(0.0, 100.0);
            if risk > 0.0 {
                score += risk * c.domain_reputation_factor;
                findings.push(format!("Domain {} reputation risk {:.0}/100", domain.domain, risk));
            }
        }

        if let Some(ip) = &report.ip {
            let abuse = ip.abuse_confidence.unwrap_or(0.0).clamp(0.0, 100.0);
            if abuse > 0.0 {
                score += abuse * c.ip_abuse_factor;
                let location: Vec<&str> = [ip.country.as_deref(), ip.asn.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect();
                let location = if location.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", location.join(", "))
                };
                findings.push(format!(
                    "IP {} abuse confidence {:.0}%{}",
                    ip.address, abuse, location
                ));
            }
        }

        let mut provider_score = 0.0;
        for (name, verdict) in &report.providers {
            if verdict.malicious > 0 {
                provider_score += c.provider_detection_weight;
            } else if verdict.suspicious > 0 {
                provider_score += c.provider_detection_weight / 2.0;
            } else {
                continue;
            }
            findings.push(format!(
                "{name}: {} malicious, {} suspicious detections",
                verdict.malicious, verdict.suspicious
            ));
        }
        score += provider_score.min(c.provider_cap);

        if !report.feed_matches.is_empty() {
            score += (report.feed_matches.len() as f64 * c.feed_match_weight).min(c.feed_match_cap);
            for m in &report.feed_matches {
                findings.push(format!("{} {} listed in feed '{}'", m.kind, m.indicator, m.feed));
            }
        }

        ThreatAssessment {
            score: score.clamp(0.0, 100.0),
            findings,
        }
    }

    /// Turns the collaborator's fetch result into an outcome. Local feed
    /// matches enrich a successful report and still count when the fetch
    /// failed; only a failed fetch with no feed matches is unavailable.
    pub fn outcome(
        &self,
        fetched: Result<ThreatIntelReport, ScoringError>,
        feed_matches: Vec<FeedMatch>,
    ) -> ThreatIntelOutcome {
        let (mut report, failure) = match fetched {
            Ok(report) => (report, None),
            Err(e) => {
                log::warn!("Threat intel unavailable: {}", e);
                let reason = match e {
                    ScoringError::ThreatIntelUnavailable(reason) => reason,
                    other => other.to_string(),
                };
                (ThreatIntelReport::default(), Some(reason))
            }
        };

        if let Some(reason) = &failure {
            if feed_matches.is_empty() {
                return ThreatIntelOutcome::Unavailable {
                    reason: reason.clone(),
                };
            }
        }

        report.feed_matches.extend(feed_matches);
        report.feed_matches.sort();
        report.feed_matches.dedup();
        let mut assessment = self.assess(&report);
        if let Some(reason) = failure {
            assessment
                .findings
                .push(format!("remote lookup unavailable ({reason}); local feeds only"));
        }
        ThreatIntelOutcome::Available(assessment)
    }

    /// Waits for the fetch at most `timeout_ms`. A timeout is reported as
    /// unavailable, never as a clean result.
    pub async fn gather<F>(&self, fetch: F, feed_matches: Vec<FeedMatch>) -> ThreatIntelOutcome
    where
        F: Future<Output = Result<ThreatIntelReport, ScoringError>>,
    {
        let fetched = match tokio::time::timeout(self.timeout(), fetch).await {
            Ok(result) => result,
            Err(_) => Err(ScoringError::ThreatIntelUnavailable(format!(
                "lookup timed out after {}ms",
                self.config.timeout_ms
            ))),
        };
        self.outcome(fetched, feed_matches)
    }
}
