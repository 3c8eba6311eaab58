use crate::error::ScoringError;
use crate::vectorizer::tfidf::TfidfModel;
use crate::vectorizer::{FeatureVector, FeatureVectorizer, FEATURE_SCHEMA_VERSION};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A pre-trained model with a fixed input contract.
pub trait Classifier: Send + Sync {
    /// Row width the model was trained on.
    fn input_dim(&self) -> usize;
    /// Phishing probability for one row of exactly `input_dim()` values.
    fn predict_proba(&self, row: &[f64]) -> f64;
    fn name(&self) -> &str;
    fn version(&self) -> &str;
    fn feature_schema_version(&self) -> &str;
}

/// Logistic regression over the vectorizer's row.
///
/// Each column is divided by its scale (1.0 when `scales` is empty) before
/// the dot product, so raw counts like `char_count` stay in a sane range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub name: String,
    pub version: String,
    pub feature_schema_version: String,
    pub weights: Vec<f64>,
    pub bias: f64,
    #[serde(default)]
    pub scales: Vec<f64>,
}

impl LogisticModel {
    /// Hand-tuned model shipped with the crate for deployments without a
    /// trained one. Embedding columns get zero weight.
    pub fn baseline(embedding_dims: usize) -> Self {
        const WEIGHTS: &[(&str, f64)] = &[
            ("ip_url_count", 1.2),
            ("suspicious_url_count", 0.9),
            ("shortened_url_count", 0.6),
            ("suspicious_tld_count", 0.8),
            ("high_entropy_url_count", 0.5),
            ("https_ratio", -0.5),
            ("urgency_words_count", 0.35),
            ("financial_words_count", 0.25),
            ("personal_info_words_count", 0.3),
            ("suspicious_attachment_count", 0.8),
            ("executable_attachment_count", 1.5),
            ("reply_to_mismatch", 0.9),
            ("has_spf_fail", 0.8),
            ("has_dkim_fail", 0.6),
            ("has_dmarc_fail", 0.8),
            ("has_forms", 0.7),
            ("has_scripts", 0.3),
            ("has_iframes", 0.4),
            ("has_urgency", 0.4),
            ("has_financial", 0.3),
            ("has_personal_info_request", 0.5),
            ("has_encrypted_attachment", 0.4),
        ];
        const SCALES: &[(&str, f64)] = &[
            ("word_count", 200.0),
            ("char_count", 1000.0),
            ("sentence_count", 20.0),
            ("punctuation_count", 50.0),
            ("readability_score", 100.0),
            ("max_attachment_size", 1_000_000.0),
        ];

        let columns = FeatureVectorizer::column_names(embedding_dims);
        let lookup = |table: &[(&str, f64)], column: &str, default: f64| {
            table
                .iter()
                .find(|(name, _)| *name == column)
                .map(|(_, v)| *v)
                .unwrap_or(default)
        };

        Self {
            name: "baseline-logistic".to_string(),
            version: "1.0.0".to_string(),
            feature_schema_version: FEATURE_SCHEMA_VERSION.to_string(),
            weights: columns.iter().map(|c| lookup(WEIGHTS, c, 0.0)).collect(),
            bias: -3.0,
            scales: columns.iter().map(|c| lookup(SCALES, c, 1.0)).collect(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.weights.is_empty() {
            anyhow::bail!("model '{}' has no weights", self.name);
        }
        if !self.scales.is_empty() && self.scales.len() != self.weights.len() {
            anyhow::bail!(
                "model '{}' has {} scales for {} weights",
                self.name,
                self.scales.len(),
                self.weights.len()
            );
        }
        if self.scales.iter().any(|s| !s.is_finite() || *s == 0.0) {
            anyhow::bail!("model '{}' has a zero or non-finite scale", self.name);
        }
        if !self.bias.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
            anyhow::bail!("model '{}' has non-finite parameters", self.name);
        }
        Ok(())
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model file: {path}"))?;
        let model: LogisticModel = serde_json::from_str(&content)
            .with_context(|| format!("Invalid model file: {path}"))?;
        model.validate()?;
        log::info!(
            "Loaded model {} v{} ({} inputs) from {}",
            model.name,
            model.version,
            model.weights.len(),
            path
        );
        Ok(model)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write model file: {path}"))?;
        Ok(())
    }
}

impl Classifier for LogisticModel {
    fn input_dim(&self) -> usize {
        self.weights.len()
    }

    fn predict_proba(&self, row: &[f64]) -> f64 {
        let z = self.weights.iter().zip(row).enumerate().fold(
            self.bias,
            |acc, (i, (w, x))| {
                let scale = self.scales.get(i).copied().unwrap_or(1.0);
                acc + w * (x / scale)
            },
        );
        1.0 / (1.0 + (-z).exp())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn feature_schema_version(&self) -> &str {
        &self.feature_schema_version
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlScore {
    /// Phishing probability in [0, 1].
    pub probability: f64,
    pub model_name: String,
    pub model_version: String,
}

pub struct MlScorer;

impl MlScorer {
    /// Wrong-length rows are a deployment error, never padded or truncated.
    pub fn score(
        classifier: &dyn Classifier,
        vector: &FeatureVector,
    ) -> Result<MlScore, ScoringError> {
        if vector.len() != classifier.input_dim() {
            return Err(ScoringError::VectorShapeMismatch {
                expected: classifier.input_dim(),
                actual: vector.len(),
            });
        }

        let probability = classifier.predict_proba(vector.as_slice());
        if !probability.is_finite() {
            return Err(ScoringError::Config(format!(
                "model '{}' produced a non-finite probability",
                classifier.name()
            )));
        }

        Ok(MlScore {
            probability: probability.clamp(0.0, 1.0),
            model_name: classifier.name().to_string(),
            model_version: classifier.version().to_string(),
        })
    }
}

/// Classifier and the TF-IDF table it was trained with. Swapped as one unit so
/// the embedding width always matches the model.
#[derive(Clone)]
pub struct ModelBundle {
    pub classifier: Arc<dyn Classifier>,
    pub text_model: Arc<TfidfModel>,
}

impl std::fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBundle")
            .field("classifier", &self.classifier.name())
            .field("version", &self.classifier.version())
            .field("text_dimensions", &self.text_model.dimensions())
            .finish()
    }
}

impl ModelBundle {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        text_model: Arc<TfidfModel>,
    ) -> Result<Self, ScoringError> {
        let bundle = Self {
            classifier,
            text_model,
        };
        bundle.check_compatible()?;
        Ok(bundle)
    }

    pub fn baseline() -> Self {
        Self {
            classifier: Arc::new(LogisticModel::baseline(0)),
            text_model: Arc::new(TfidfModel::empty()),
        }
    }

    /// Loads whichever files are configured. Without a model file the
    /// baseline is sized to the text model.
    pub fn load(model_path: Option<&str>, text_model_path: Option<&str>) -> anyhow::Result<Self> {
        let text_model = match text_model_path {
            Some(path) => TfidfModel::from_file(path)?,
            None => TfidfModel::empty(),
        };
        let classifier = match model_path {
            Some(path) => LogisticModel::from_file(path)?,
            None => LogisticModel::baseline(text_model.dimensions()),
        };
        Ok(Self::new(Arc::new(classifier), Arc::new(text_model))?)
    }

    pub fn check_compatible(&self) -> Result<(), ScoringError> {
        if self.classifier.feature_schema_version() != FEATURE_SCHEMA_VERSION {
            return Err(ScoringError::Config(format!(
                "model '{}' was trained on feature schema {}, analyzer produces {}",
                self.classifier.name(),
                self.classifier.feature_schema_version(),
                FEATURE_SCHEMA_VERSION
            )));
        }
        let expected = FeatureVectorizer::width(self.text_model.dimensions());
        if self.classifier.input_dim() != expected {
            return Err(ScoringError::VectorShapeMismatch {
                expected: self.classifier.input_dim(),
                actual: expected,
            });
        }
        Ok(())
    }
}
