pub mod attachment_analyzer;
pub mod behavioral_analyzer;
pub mod entropy;
pub mod link_analyzer;
pub mod metadata_analyzer;
pub mod text_analyzer;

use crate::config::AnalyzerConfig;
use crate::email::ParsedEmail;
use crate::vectorizer::tfidf::TfidfModel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use entropy::shannon_entropy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureKind {
    Number,
    Flag,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Flag(bool),
    Number(f64),
}

impl FeatureValue {
    pub fn kind(&self) -> FeatureKind {
        match self {
            FeatureValue::Flag(_) => FeatureKind::Flag,
            FeatureValue::Number(_) => FeatureKind::Number,
        }
    }

    /// Numeric encoding used by the vectorizer; flags become 0/1.
    pub fn as_f64(&self) -> f64 {
        match self {
            FeatureValue::Flag(true) => 1.0,
            FeatureValue::Flag(false) => 0.0,
            FeatureValue::Number(n) => *n,
        }
    }
}

impl std::fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureValue::Flag(b) => write!(f, "{b}"),
            FeatureValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            FeatureValue::Number(n) => write!(f, "{n:.3}"),
        }
    }
}

/// Every feature the analyzers produce, grouped by analyzer.
pub const FEATURE_SCHEMA: &[(&str, FeatureKind)] = &[
    // text
    ("word_count", FeatureKind::Number),
    ("char_count", FeatureKind::Number),
    ("sentence_count", FeatureKind::Number),
    ("avg_word_length", FeatureKind::Number),
    ("unique_word_ratio", FeatureKind::Number),
    ("uppercase_ratio", FeatureKind::Number),
    ("punctuation_count", FeatureKind::Number),
    ("readability_score", FeatureKind::Number),
    // urls
    ("url_count", FeatureKind::Number),
    ("suspicious_url_count", FeatureKind::Number),
    ("ip_url_count", FeatureKind::Number),
    ("shortened_url_count", FeatureKind::Number),
    ("suspicious_tld_count", FeatureKind::Number),
    ("high_entropy_url_count", FeatureKind::Number),
    ("avg_url_entropy", FeatureKind::Number),
    ("https_ratio", FeatureKind::Number),
    // metadata
    ("has_reply_to", FeatureKind::Flag),
    ("reply_to_mismatch", FeatureKind::Flag),
    ("has_spf_fail", FeatureKind::Flag),
    ("has_dkim_fail", FeatureKind::Flag),
    ("has_dmarc_fail", FeatureKind::Flag),
    ("has_html", FeatureKind::Flag),
    ("has_forms", FeatureKind::Flag),
    ("has_scripts", FeatureKind::Flag),
    ("has_iframes", FeatureKind::Flag),
    // attachments
    ("attachment_count", FeatureKind::Number),
    ("suspicious_attachment_count", FeatureKind::Number),
    ("executable_attachment_count", FeatureKind::Number),
    ("max_attachment_size", FeatureKind::Number),
    ("has_encrypted_attachment", FeatureKind::Flag),
    // behavioral
    ("urgency_words_count", FeatureKind::Number),
    ("financial_words_count", FeatureKind::Number),
    ("personal_info_words_count", FeatureKind::Number),
    ("has_urgency", FeatureKind::Flag),
    ("has_financial", FeatureKind::Flag),
    ("has_personal_info_request", FeatureKind::Flag),
];

pub fn feature_kind(name: &str) -> Option<FeatureKind> {
    FEATURE_SCHEMA
        .iter()
        .find(|(key, _)| *key == name)
        .map(|(_, kind)| *kind)
}

/// Flat, complete feature map for one email plus its text embedding.
///
/// Construction always seeds every key in [`FEATURE_SCHEMA`]; analyzers can
/// only overwrite declared keys, so downstream lookups never miss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    values: BTreeMap<String, FeatureValue>,
    text_embedding: Vec<f64>,
}

impl FeatureSet {
    pub fn new(embedding_dims: usize) -> Self {
        let values = FEATURE_SCHEMA
            .iter()
            .map(|(key, kind)| {
                let default = match kind {
                    FeatureKind::Number => FeatureValue::Number(0.0),
                    FeatureKind::Flag => FeatureValue::Flag(false),
                };
                (key.to_string(), default)
            })
            .collect();

        Self {
            values,
            text_embedding: vec![0.0; embedding_dims],
        }
    }

    pub fn get(&self, name: &str) -> Option<FeatureValue> {
        self.values.get(name).copied()
    }

    pub fn number(&self, name: &str) -> f64 {
        self.get(name).map(|v| v.as_f64()).unwrap_or(0.0)
    }

    pub fn flag(&self, name: &str) -> bool {
        matches!(self.get(name), Some(FeatureValue::Flag(true)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, FeatureValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn text_embedding(&self) -> &[f64] {
        &self.text_embedding
    }

    pub(crate) fn set_number(&mut self, name: &str, value: f64) {
        match self.values.get_mut(name) {
            Some(slot @ FeatureValue::Number(_)) => *slot = FeatureValue::Number(value),
            _ => log::warn!("Ignoring undeclared numeric feature '{name}'"),
        }
    }

    pub(crate) fn set_flag(&mut self, name: &str, value: bool) {
        match self.values.get_mut(name) {
            Some(slot @ FeatureValue::Flag(_)) => *slot = FeatureValue::Flag(value),
            _ => log::warn!("Ignoring undeclared flag feature '{name}'"),
        }
    }

    pub(crate) fn set_text_embedding(&mut self, embedding: Vec<f64>) {
        self.text_embedding = embedding;
    }
}

/// One slice of the feature set, computed from the parsed email.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, email: &ParsedEmail, features: &mut FeatureSet);
    fn name(&self) -> &str;
}

/// Runs every extractor over an email to build its FeatureSet.
pub struct FeatureEngine {
    extractors: Vec<Box<dyn FeatureExtractor>>,
}

impl Default for FeatureEngine {
    fn default() -> Self {
        Self::new(&AnalyzerConfig::default())
    }
}

impl FeatureEngine {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            extractors: vec![
                Box::new(text_analyzer::TextAnalyzer::new()),
                Box::new(link_analyzer::LinkAnalyzer::from_config(config)),
                Box::new(metadata_analyzer::MetadataAnalyzer::new()),
                Box::new(attachment_analyzer::AttachmentAnalyzer::from_config(config)),
                Box::new(behavioral_analyzer::BehavioralAnalyzer::from_config(config)),
            ],
        }
    }

    /// Never fails: degenerate input yields the zero/false defaults.
    pub fn analyze(&self, email: &ParsedEmail, text_model: &TfidfModel) -> FeatureSet {
        let mut features = FeatureSet::new(text_model.dimensions());

        for extractor in &self.extractors {
            extractor.extract(email, &mut features);
            log::debug!("Feature extractor '{}' finished", extractor.name());
        }

        features.set_text_embedding(text_model.transform(&email.body));
        features
    }

    pub fn extractor_names(&self) -> Vec<&str> {
        self.extractors.iter().map(|e| e.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_email_has_every_key_at_default() {
        let engine = FeatureEngine::default();
        let features = engine.analyze(&ParsedEmail::default(), &TfidfModel::empty());

        assert_eq!(features.len(), FEATURE_SCHEMA.len());
        for (key, kind) in FEATURE_SCHEMA {
            let value = features.get(key).expect("declared key missing");
            assert_eq!(value.kind(), *kind, "{key} has wrong kind");
            assert_eq!(value.as_f64(), 0.0, "{key} is not zero");
        }
        assert!(features.text_embedding().is_empty());
    }

    #[test]
    fn test_setters_ignore_undeclared_or_mistyped_keys() {
        let mut features = FeatureSet::new(0);
        features.set_number("not_a_feature", 3.0);
        features.set_number("has_html", 1.0);
        features.set_flag("word_count", true);

        assert_eq!(features.get("not_a_feature"), None);
        assert_eq!(features.get("has_html"), Some(FeatureValue::Flag(false)));
        assert_eq!(features.get("word_count"), Some(FeatureValue::Number(0.0)));
    }

    #[test]
    fn test_embedding_width_follows_text_model() {
        let model = TfidfModel::fit(&["alpha beta gamma", "beta delta"], 4);
        let engine = FeatureEngine::default();
        let email = ParsedEmail {
            body: "beta gamma".to_string(),
            ..Default::default()
        };
        let features = engine.analyze(&email, &model);
        assert_eq!(features.text_embedding().len(), 4);
    }

    #[test]
    fn test_feature_value_display() {
        assert_eq!(FeatureValue::Number(5.0).to_string(), "5");
        assert_eq!(FeatureValue::Number(0.25).to_string(), "0.250");
        assert_eq!(FeatureValue::Flag(true).to_string(), "true");
    }
}
