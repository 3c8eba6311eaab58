use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::ScoringError;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub analyzer: AnalyzerConfig,
    pub fusion: FusionConfig,
    pub threat_intel: ThreatIntelConfig,
    pub lists: ListsConfig,
    /// YAML rule set; the built-in rules are used when absent.
    pub rules_path: Option<String>,
    /// JSON logistic model; the built-in baseline is used when absent.
    pub model_path: Option<String>,
    /// JSON fitted TF-IDF table; no text embedding when absent.
    pub text_model_path: Option<String>,
    /// YAML list of already-ingested threat feeds.
    pub feeds_path: Option<String>,
}

/// Lexicons and fixed lists consumed by the feature analyzers.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub urgency_words: Vec<String>,
    pub financial_words: Vec<String>,
    pub personal_info_words: Vec<String>,
    pub url_shorteners: Vec<String>,
    pub suspicious_tlds: Vec<String>,
    pub suspicious_extensions: Vec<String>,
    pub executable_extensions: Vec<String>,
    pub encrypted_markers: Vec<String>,
    /// URLs whose Shannon entropy exceeds this many bits are suspicious.
    pub entropy_threshold: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            urgency_words: strings(&[
                "urgent",
                "immediately",
                "alert",
                "critical",
                "important",
                "suspended",
                "limited",
                "expire",
                "verify",
                "confirm",
                "account",
                "security",
                "update",
                "restore",
                "action required",
            ]),
            financial_words: strings(&[
                "bank",
                "paypal",
                "credit card",
                "visa",
                "mastercard",
                "western union",
                "money gram",
                "transfer",
                "wire",
                "refund",
                "invoice",
                "payment",
                "transaction",
            ]),
            personal_info_words: strings(&[
                "password",
                "ssn",
                "social security",
                "date of birth",
                "mother's maiden name",
                "credit score",
                "pin",
                "username",
                "login",
                "sign in",
                "verify your identity",
            ]),
            url_shorteners: strings(&[
                "bit.ly",
                "tinyurl",
                "goo.gl",
                "ow.ly",
                "is.gd",
                "buff.ly",
                "adf.ly",
                "short.link",
                "tiny.cc",
            ]),
            suspicious_tlds: strings(&[
                ".xyz",
                ".top",
                ".work",
                ".date",
                ".men",
                ".loan",
                ".download",
                ".review",
                ".stream",
                ".gdn",
                ".racing",
                ".win",
                ".bid",
                ".trade",
                ".webcam",
                ".science",
            ]),
            suspicious_extensions: strings(&[
                ".exe", ".scr", ".bat", ".cmd", ".vbs", ".ps1", ".js", ".jar", ".docm", ".xlsm",
                ".pptm",
            ]),
            executable_extensions: strings(&[".exe", ".scr", ".bat", ".cmd", ".vbs", ".ps1"]),
            encrypted_markers: strings(&[".enc", ".encrypted", ".pgp", ".gpg"]),
            entropy_threshold: 4.5,
        }
    }
}

/// Weights and thresholds for combining the three signals.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct FusionConfig {
    pub rule_weight: f64,
    pub ml_weight: f64,
    pub threat_intel_weight: f64,
    /// Rule scores are clamped to this value before scaling to 0-100.
    pub rule_score_cap: f64,
    /// Scores below this are LEGITIMATE.
    pub suspicious_threshold: f64,
    /// Scores at or above this are PHISHING.
    pub phishing_threshold: f64,
    /// Distance from the nearest threshold that maps to confidence 1.0.
    pub confidence_span: f64,
    /// PHISHING verdicts below this confidence go to review.
    pub review_confidence_floor: f64,
    /// Rule vs ML disagreement (in 0-100 points) that forces review.
    pub disagreement_margin: f64,
    /// Threat-intel scores at or above this are listed in the explanation.
    pub material_intel_score: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rule_weight: 0.4,
            ml_weight: 0.4,
            threat_intel_weight: 0.2,
            rule_score_cap: 100.0,
            suspicious_threshold: 30.0,
            phishing_threshold: 70.0,
            confidence_span: 30.0,
            review_confidence_floor: 0.6,
            disagreement_margin: 50.0,
            material_intel_score: 1.0,
        }
    }
}

impl FusionConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        let weights = [self.rule_weight, self.ml_weight, self.threat_intel_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ScoringError::Config(
                "fusion weights must be finite and non-negative".to_string(),
            ));
        }
        if self.rule_weight + self.ml_weight <= 0.0 {
            return Err(ScoringError::Config(
                "rule and ML weights cannot both be zero".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.suspicious_threshold)
            || !(0.0..=100.0).contains(&self.phishing_threshold)
            || self.suspicious_threshold >= self.phishing_threshold
        {
            return Err(ScoringError::Config(format!(
                "thresholds must satisfy 0 <= {} < {} <= 100",
                self.suspicious_threshold, self.phishing_threshold
            )));
        }
        if self.rule_score_cap <= 0.0 || self.confidence_span <= 0.0 {
            return Err(ScoringError::Config(
                "rule_score_cap and confidence_span must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Term weights for collapsing provider results into one 0-100 score.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ThreatIntelConfig {
    pub malicious_url_weight: f64,
    pub additional_malicious_url_weight: f64,
    pub malicious_url_cap: f64,
    pub suspicious_url_weight: f64,
    pub suspicious_url_cap: f64,
    pub young_domain_days: u32,
    pub young_domain_weight: f64,
    pub sinkhole_weight: f64,
    /// Multiplier applied to a 0-100 domain reputation risk score.
    pub domain_reputation_factor: f64,
    /// Multiplier applied to a 0-100 IP abuse confidence.
    pub ip_abuse_factor: f64,
    pub provider_detection_weight: f64,
    pub provider_cap: f64,
    pub feed_match_weight: f64,
    pub feed_match_cap: f64,
    /// Upper bound on waiting for the fetch collaborator.
    pub timeout_ms: u64,
}

impl Default for ThreatIntelConfig {
    fn default() -> Self {
        Self {
            malicious_url_weight: 60.0,
            additional_malicious_url_weight: 10.0,
            malicious_url_cap: 80.0,
            suspicious_url_weight: 10.0,
            suspicious_url_cap: 20.0,
            young_domain_days: 30,
            young_domain_weight: 20.0,
            sinkhole_weight: 40.0,
            domain_reputation_factor: 0.2,
            ip_abuse_factor: 0.25,
            provider_detection_weight: 15.0,
            provider_cap: 30.0,
            feed_match_weight: 25.0,
            feed_match_cap: 50.0,
            timeout_ms: 2000,
        }
    }
}

/// Allow/deny entries checked before score-based classification.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct ListsConfig {
    pub allow_senders: Vec<String>,
    pub allow_domains: Vec<String>,
    pub deny_senders: Vec<String>,
    pub deny_domains: Vec<String>,
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {path}"))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Invalid configuration in {path}"))?;
        config.fusion.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration file: {path}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_fusion_is_valid() {
        assert!(FusionConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let fusion = FusionConfig {
            suspicious_threshold: 80.0,
            phishing_threshold: 40.0,
            ..Default::default()
        };
        assert!(matches!(fusion.validate(), Err(ScoringError::Config(_))));
    }

    #[test]
    fn test_zero_rule_and_ml_weight_rejected() {
        let fusion = FusionConfig {
            rule_weight: 0.0,
            ml_weight: 0.0,
            ..Default::default()
        };
        assert!(fusion.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "fusion:\n  phishing_threshold: 80.0\nlists:\n  deny_domains: [evil.test]\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.fusion.phishing_threshold, 80.0);
        assert_eq!(config.fusion.suspicious_threshold, 30.0);
        assert_eq!(config.lists.deny_domains, vec!["evil.test".to_string()]);
        assert_eq!(config.analyzer.urgency_words.len(), 15);
    }

    #[test]
    fn test_yaml_round_trip_preserves_config() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
