use super::{shannon_entropy, FeatureExtractor, FeatureSet};
use crate::config::AnalyzerConfig;
use crate::domain_utils::DomainUtils;
use crate::email::ParsedEmail;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IP_URL_RE: Regex =
        Regex::new(r"(?i)^[a-z][a-z0-9+.\-]*://\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}").unwrap();
}

/// Per-URL verdicts, kept so callers can explain which link tripped what.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkVerdict {
    pub url: String,
    pub ip_host: bool,
    pub shortened: bool,
    pub suspicious_tld: bool,
    pub entropy: f64,
    pub high_entropy: bool,
    pub secure: bool,
}

impl LinkVerdict {
    /// Each sub-check counts separately toward suspicious_url_count.
    pub fn suspicious_hits(&self) -> usize {
        [self.ip_host, self.shortened, self.suspicious_tld, self.high_entropy]
            .iter()
            .filter(|&&hit| hit)
            .count()
    }
}

pub struct LinkAnalyzer {
    url_shorteners: Vec<String>,
    suspicious_tlds: Vec<String>,
    entropy_threshold: f64,
}

impl Default for LinkAnalyzer {
    fn default() -> Self {
        Self::from_config(&AnalyzerConfig::default())
    }
}

impl LinkAnalyzer {
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        Self {
            url_shorteners: config
                .url_shorteners
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            suspicious_tlds: config
                .suspicious_tlds
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
            entropy_threshold: config.entropy_threshold,
        }
    }

    pub fn analyze_url(&self, url: &str) -> LinkVerdict {
        let lower = url.to_lowercase();
        let entropy = shannon_entropy(url);

        LinkVerdict {
            url: url.to_string(),
            ip_host: IP_URL_RE.is_match(url),
            shortened: self.url_shorteners.iter().any(|s| lower.contains(s.as_str())),
            suspicious_tld: self.has_suspicious_tld(&lower),
            entropy,
            high_entropy: entropy > self.entropy_threshold,
            secure: lower.starts_with("https://"),
        }
    }

    fn has_suspicious_tld(&self, lower_url: &str) -> bool {
        match DomainUtils::url_host(lower_url) {
            Some(host) => self
                .suspicious_tlds
                .iter()
                .any(|tld| host.ends_with(tld.as_str())),
            // unparseable URL: fall back to a raw substring check
            None => self
                .suspicious_tlds
                .iter()
                .any(|tld| lower_url.contains(tld.as_str())),
        }
    }

    pub fn analyze_urls(&self, urls: &[String]) -> Vec<LinkVerdict> {
        urls.iter().map(|u| self.analyze_url(u)).collect()
    }
}

impl FeatureExtractor for LinkAnalyzer {
    fn extract(&self, email: &ParsedEmail, features: &mut FeatureSet) {
        let verdicts = self.analyze_urls(&email.urls);
        if verdicts.is_empty() {
            return;
        }

        let count = |pred: fn(&LinkVerdict) -> bool| verdicts.iter().filter(|v| pred(v)).count();
        let total = verdicts.len() as f64;
        let suspicious: usize = verdicts.iter().map(|v| v.suspicious_hits()).sum();

        for v in verdicts.iter().filter(|v| v.suspicious_hits() > 0) {
            log::debug!(
                "Suspicious URL {} (ip={}, shortener={}, tld={}, entropy={:.2})",
                v.url,
                v.ip_host,
                v.shortened,
                v.suspicious_tld,
                v.entropy
            );
        }

        features.set_number("url_count", total);
        features.set_number("suspicious_url_count", suspicious as f64);
        features.set_number("ip_url_count", count(|v| v.ip_host) as f64);
        features.set_number("shortened_url_count", count(|v| v.shortened) as f64);
        features.set_number("suspicious_tld_count", count(|v| v.suspicious_tld) as f64);
        features.set_number("high_entropy_url_count", count(|v| v.high_entropy) as f64);
        features.set_number(
            "avg_url_entropy",
            verdicts.iter().map(|v| v.entropy).sum::<f64>() / total,
        );
        features.set_number("https_ratio", count(|v| v.secure) as f64 / total);
    }

    fn name(&self) -> &str {
        "links"
    }
}
