pub mod tfidf;

use crate::features::FeatureSet;
use serde::{Deserialize, Serialize};

/// Bumped whenever the column order below changes.
pub const FEATURE_SCHEMA_VERSION: &str = "2";

/// Numeric columns, in model input order.
pub const NUMERIC_FEATURES: &[&str] = &[
    "word_count",
    "char_count",
    "sentence_count",
    "avg_word_length",
    "unique_word_ratio",
    "uppercase_ratio",
    "punctuation_count",
    "url_count",
    "suspicious_url_count",
    "ip_url_count",
    "shortened_url_count",
    "suspicious_tld_count",
    "avg_url_entropy",
    "https_ratio",
    "urgency_words_count",
    "financial_words_count",
    "personal_info_words_count",
    "attachment_count",
    "suspicious_attachment_count",
    "executable_attachment_count",
    "readability_score",
    "high_entropy_url_count",
    "max_attachment_size",
];

/// Boolean columns encoded as 0/1, after the numeric block.
pub const BOOLEAN_FEATURES: &[&str] = &[
    "has_reply_to",
    "reply_to_mismatch",
    "has_spf_fail",
    "has_dkim_fail",
    "has_html",
    "has_forms",
    "has_scripts",
    "has_iframes",
    "has_urgency",
    "has_financial",
    "has_personal_info_request",
    "has_encrypted_attachment",
    "has_dmarc_fail",
];

/// One model input row: numeric block, boolean block, then the text embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema_version: String,
    pub values: Vec<f64>,
    pub embedding_width: usize,
}

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeatureVectorizer;

impl FeatureVectorizer {
    pub fn new() -> Self {
        Self
    }

    pub fn base_width() -> usize {
        NUMERIC_FEATURES.len() + BOOLEAN_FEATURES.len()
    }

    /// Row width for a given embedding size.
    pub fn width(embedding_dims: usize) -> usize {
        Self::base_width() + embedding_dims
    }

    /// Column names in row order; embedding columns are `tfidf_<n>`.
    pub fn column_names(embedding_dims: usize) -> Vec<String> {
        NUMERIC_FEATURES
            .iter()
            .chain(BOOLEAN_FEATURES.iter())
            .map(|s| s.to_string())
            .chain((0..embedding_dims).map(|i| format!("tfidf_{i}")))
            .collect()
    }

    pub fn vectorize(&self, features: &FeatureSet) -> FeatureVector {
        let embedding = features.text_embedding();
        let mut values = Vec::with_capacity(Self::width(embedding.len()));

        values.extend(NUMERIC_FEATURES.iter().map(|name| features.number(name)));
        values.extend(
            BOOLEAN_FEATURES
                .iter()
                .map(|name| if features.flag(name) { 1.0 } else { 0.0 }),
        );
        values.extend_from_slice(embedding);

        FeatureVector {
            schema_version: FEATURE_SCHEMA_VERSION.to_string(),
            values,
            embedding_width: embedding.len(),
        }
    }
}
