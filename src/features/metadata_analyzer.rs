use super::{FeatureExtractor, FeatureSet};
use crate::email::ParsedEmail;

/// Header-derived signals plus the parser's HTML flags.
pub struct MetadataAnalyzer;

impl Default for MetadataAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn auth_failures(auth_results: &str) -> (bool, bool, bool) {
        let lower = auth_results.to_lowercase();
        (
            lower.contains("spf=fail"),
            lower.contains("dkim=fail"),
            lower.contains("dmarc=fail"),
        )
    }
}

impl FeatureExtractor for MetadataAnalyzer {
    fn extract(&self, email: &ParsedEmail, features: &mut FeatureSet) {
        if let Some(reply_to) = email.header("Reply-To").filter(|v| !v.is_empty()) {
            features.set_flag("has_reply_to", true);
            // exact comparison against the raw From header
            if email.header("From") != Some(reply_to) {
                features.set_flag("reply_to_mismatch", true);
            }
        }

        let (spf_fail, dkim_fail, dmarc_fail) =
            Self::auth_failures(email.header("Authentication-Results").unwrap_or(""));
        features.set_flag("has_spf_fail", spf_fail);
        features.set_flag("has_dkim_fail", dkim_fail);
        features.set_flag("has_dmarc_fail", dmarc_fail);

        features.set_flag("has_html", email.has_html);
        features.set_flag("has_forms", email.has_forms);
        features.set_flag("has_scripts", email.has_scripts);
        features.set_flag("has_iframes", email.has_iframes);
    }

    fn name(&self) -> &str {
        "metadata"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(headers: &[(&str, &str)]) -> FeatureSet {
        let email = ParsedEmail {
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            has_forms: true,
            ..Default::default()
        };
        let mut features = FeatureSet::new(0);
        MetadataAnalyzer::new().extract(&email, &mut features);
        features
    }

    #[test]
    fn test_reply_to_mismatch() {
        let features = analyze(&[
            ("From", "billing@bank.example"),
            ("Reply-To", "collector@freemail.example"),
        ]);
        assert!(features.flag("has_reply_to"));
        assert!(features.flag("reply_to_mismatch"));
    }

    #[test]
    fn test_reply_to_matching_from() {
        let features = analyze(&[
            ("from", "billing@bank.example"),
            ("reply-to", "billing@bank.example"),
        ]);
        assert!(features.flag("has_reply_to"));
        assert!(!features.flag("reply_to_mismatch"));
    }

    #[test]
    fn test_reply_to_without_from_is_mismatch() {
        let features = analyze(&[("Reply-To", "someone@example.com")]);
        assert!(features.flag("reply_to_mismatch"));
    }

    #[test]
    fn test_authentication_failures_case_insensitive() {
        let features = analyze(&[(
            "Authentication-Results",
            "mx.example; SPF=FAIL smtp.mailfrom=x; dkim=fail; dmarc=pass",
        )]);
        assert!(features.flag("has_spf_fail"));
        assert!(features.flag("has_dkim_fail"));
        assert!(!features.flag("has_dmarc_fail"));
    }

    #[test]
    fn test_html_flags_propagated() {
        let features = analyze(&[]);
        assert!(features.flag("has_forms"));
        assert!(!features.flag("has_html"));
        assert!(!features.flag("has_reply_to"));
    }
}
