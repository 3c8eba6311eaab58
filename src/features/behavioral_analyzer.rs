use super::{FeatureExtractor, FeatureSet};
use crate::config::AnalyzerConfig;
use crate::email::ParsedEmail;

struct Lexicon {
    count_key: &'static str,
    flag_key: &'static str,
    terms: Vec<String>,
}

impl Lexicon {
    /// Non-overlapping occurrences of every term, summed.
    fn count(&self, text_lower: &str) -> usize {
        self.terms
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| text_lower.matches(t.as_str()).count())
            .sum()
    }
}

/// Social-engineering lexicon hits in the body.
pub struct BehavioralAnalyzer {
    lexicons: Vec<Lexicon>,
}

impl Default for BehavioralAnalyzer {
    fn default() -> Self {
        Self::from_config(&AnalyzerConfig::default())
    }
}

impl BehavioralAnalyzer {
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        let lexicon = |count_key, flag_key, terms: &[String]| Lexicon {
            count_key,
            flag_key,
            terms: terms.iter().map(|t| t.to_lowercase()).collect(),
        };

        Self {
            lexicons: vec![
                lexicon("urgency_words_count", "has_urgency", &config.urgency_words),
                lexicon("financial_words_count", "has_financial", &config.financial_words),
                lexicon(
                    "personal_info_words_count",
                    "has_personal_info_request",
                    &config.personal_info_words,
                ),
            ],
        }
    }
}

impl FeatureExtractor for BehavioralAnalyzer {
    fn extract(&self, email: &ParsedEmail, features: &mut FeatureSet) {
        let text_lower = email.body.to_lowercase();
        for lexicon in &self.lexicons {
            let hits = lexicon.count(&text_lower);
            features.set_number(lexicon.count_key, hits as f64);
            features.set_flag(lexicon.flag_key, hits > 0);
        }
    }

    fn name(&self) -> &str {
        "behavioral"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(body: &str) -> FeatureSet {
        let email = ParsedEmail {
            body: body.to_string(),
            ..Default::default()
        };
        let mut features = FeatureSet::new(0);
        BehavioralAnalyzer::default().extract(&email, &mut features);
        features
    }

    #[test]
    fn test_urgency_terms_counted() {
        let features = analyze("URGENT: verify now. This is critical and immediately required. Alert!");
        assert_eq!(features.number("urgency_words_count"), 5.0);
        assert!(features.flag("has_urgency"));
        assert!(!features.flag("has_financial"));
    }

    #[test]
    fn test_repeated_term_counts_each_occurrence() {
        let features = analyze("password password PASSWORD");
        assert_eq!(features.number("personal_info_words_count"), 3.0);
        assert!(features.flag("has_personal_info_request"));
    }

    #[test]
    fn test_substring_semantics() {
        // "pin" inside "shopping" is still a hit
        let features = analyze("shopping");
        assert_eq!(features.number("personal_info_words_count"), 1.0);
    }

    #[test]
    fn test_custom_lexicon() {
        let config = AnalyzerConfig {
            financial_words: vec!["Crypto".to_string()],
            ..Default::default()
        };
        let email = ParsedEmail {
            body: "send crypto".to_string(),
            ..Default::default()
        };
        let mut features = FeatureSet::new(0);
        BehavioralAnalyzer::from_config(&config).extract(&email, &mut features);
        assert_eq!(features.number("financial_words_count"), 1.0);
    }
}
