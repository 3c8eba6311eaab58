//! Word n-gram TF-IDF table.
//!
//! The table is fitted once over a training corpus and then only used to
//! transform single documents. Transforming never touches the vocabulary, so
//! embeddings of different emails live in the same space.

use anyhow::Context;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(r"\b\w\w+\b").unwrap();
    static ref STOP_WORDS: HashSet<&'static str> = ENGLISH_STOP_WORDS.iter().copied().collect();
}

const MAX_NGRAM: usize = 3;

const ENGLISH_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "almost", "also", "am", "among",
    "an", "and", "any", "are", "as", "at", "be", "became", "because", "been", "before", "being",
    "below", "between", "both", "but", "by", "can", "cannot", "could", "did", "do", "does",
    "doing", "done", "down", "during", "each", "either", "else", "enough", "etc", "even", "ever",
    "every", "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here",
    "hers", "herself", "him", "himself", "his", "how", "however", "i", "ie", "if", "in", "into",
    "is", "it", "its", "itself", "just", "least", "less", "may", "me", "might", "more", "most",
    "much", "must", "my", "myself", "neither", "no", "nor", "not", "now", "of", "off", "often",
    "on", "once", "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "per",
    "perhaps", "rather", "same", "she", "should", "since", "so", "some", "such", "than", "that",
    "the", "their", "theirs", "them", "themselves", "then", "there", "these", "they", "this",
    "those", "though", "through", "thus", "to", "too", "under", "until", "up", "upon", "us",
    "very", "was", "we", "well", "were", "what", "when", "where", "whether", "which", "while",
    "who", "whom", "whose", "why", "will", "with", "within", "without", "would", "yet", "you",
    "your", "yours", "yourself", "yourselves",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TfidfModel {
    /// Version label written by the training job.
    #[serde(default)]
    pub version: String,
    /// Width of every embedding; the vocabulary may be smaller.
    dimensions: usize,
    /// term -> column, columns assigned in term order.
    vocabulary: BTreeMap<String, usize>,
    /// Smoothed IDF per column.
    idf: Vec<f64>,
}

impl Default for TfidfModel {
    fn default() -> Self {
        Self::empty()
    }
}

impl TfidfModel {
    /// No vocabulary and zero-width embeddings.
    pub fn empty() -> Self {
        Self {
            version: "none".to_string(),
            dimensions: 0,
            vocabulary: BTreeMap::new(),
            idf: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn column(&self, term: &str) -> Option<usize> {
        self.vocabulary.get(term).copied()
    }

    /// Lowercased word tokens (two or more word characters), stop words removed,
    /// expanded to 1..=3-grams.
    pub fn analyze(text: &str) -> Vec<String> {
        let lower = text.to_lowercase();
        let tokens: Vec<&str> = TOKEN_RE
            .find_iter(&lower)
            .map(|m| m.as_str())
            .filter(|t| !STOP_WORDS.contains(t))
            .collect();

        let mut terms = Vec::new();
        for n in 1..=MAX_NGRAM {
            if tokens.len() < n {
                break;
            }
            for window in tokens.windows(n) {
                terms.push(window.join(" "));
            }
        }
        terms
    }

    /// Training-time fit. Keeps the `max_features` most frequent terms across
    /// the corpus (ties broken alphabetically).
    pub fn fit<S: AsRef<str>>(corpus: &[S], max_features: usize) -> Self {
        let mut term_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut doc_freq: BTreeMap<String, usize> = BTreeMap::new();

        for doc in corpus {
            let terms = Self::analyze(doc.as_ref());
            let mut seen = BTreeSet::new();
            for term in terms {
                *term_counts.entry(term.clone()).or_insert(0) += 1;
                if seen.insert(term.clone()) {
                    *doc_freq.entry(term).or_insert(0) += 1;
                }
            }
        }

        let mut ranked: Vec<(&String, &usize)> = term_counts.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let kept: BTreeSet<&String> = ranked
            .into_iter()
            .take(max_features)
            .map(|(term, _)| term)
            .collect();

        let n_docs = corpus.len() as f64;
        let mut vocabulary = BTreeMap::new();
        let mut idf = Vec::with_capacity(kept.len());
        for (column, term) in kept.into_iter().enumerate() {
            let df = doc_freq.get(term).copied().unwrap_or(0) as f64;
            idf.push(((1.0 + n_docs) / (1.0 + df)).ln() + 1.0);
            vocabulary.insert(term.clone(), column);
        }

        log::info!(
            "Fitted TF-IDF table: {} documents, {} terms kept (max {})",
            corpus.len(),
            vocabulary.len(),
            max_features
        );

        Self {
            version: format!("fit-{}-{}", corpus.len(), vocabulary.len()),
            dimensions: max_features,
            vocabulary,
            idf,
        }
    }

    /// L2-normalised TF-IDF row of width `dimensions()`.
    pub fn transform(&self, text: &str) -> Vec<f64> {
        let mut row = vec![0.0; self.dimensions];
        if self.vocabulary.is_empty() || text.is_empty() {
            return row;
        }

        for term in Self::analyze(text) {
            if let Some(&column) = self.vocabulary.get(&term) {
                row[column] += 1.0;
            }
        }
        for (column, value) in row.iter_mut().enumerate().take(self.idf.len()) {
            *value *= self.idf[column];
        }

        let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for value in row.iter_mut() {
                *value /= norm;
            }
        }
        row
    }

    /// Structural checks for a table loaded from disk.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.idf.len() != self.vocabulary.len() {
            anyhow::bail!(
                "IDF table has {} entries for {} terms",
                self.idf.len(),
                self.vocabulary.len()
            );
        }
        if self.vocabulary.len() > self.dimensions {
            anyhow::bail!(
                "vocabulary of {} terms exceeds {} dimensions",
                self.vocabulary.len(),
                self.dimensions
            );
        }
        if let Some((term, column)) = self.vocabulary.iter().find(|(_, &c)| c >= self.idf.len()) {
            anyhow::bail!("term '{term}' maps to out-of-range column {column}");
        }
        Ok(())
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read text model: {path}"))?;
        let model: TfidfModel = serde_json::from_str(&content)
            .with_context(|| format!("Invalid text model in {path}"))?;
        model.validate()?;
        Ok(model)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write text model: {path}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<&'static str> {
        vec![
            "Verify your account password immediately",
            "Quarterly report attached for review",
            "Your account has been suspended, verify now",
            "Lunch meeting moved to Friday",
        ]
    }

    #[test]
    fn test_analyze_drops_stop_words_and_builds_ngrams() {
        let terms = TfidfModel::analyze("Verify your account now");
        assert!(terms.contains(&"verify".to_string()));
        assert!(terms.contains(&"verify account".to_string()));
        assert!(!terms.iter().any(|t| t == "your"));
        // single-character tokens are ignored
        assert!(TfidfModel::analyze("a b c").is_empty());
    }

    #[test]
    fn test_fit_respects_max_features() {
        let model = TfidfModel::fit(&corpus(), 5);
        assert_eq!(model.dimensions(), 5);
        assert_eq!(model.vocabulary_len(), 5);
        assert!(model.column("account").is_some());
        assert!(model.column("verify").is_some());
        assert!(model.validate().is_ok());
    }

    #[test]
    fn test_transform_uses_fitted_vocabulary() {
        let model = TfidfModel::fit(&corpus(), 50);
        let a = model.transform("verify account");
        let b = model.transform("verify account");
        assert_eq!(a, b);
        assert_eq!(a.len(), 50);

        // unseen words do not grow the vocabulary
        let unseen = model.transform("completely novel vocabulary");
        assert!(unseen.iter().all(|v| *v == 0.0));
        assert_eq!(model.vocabulary_len(), TfidfModel::fit(&corpus(), 50).vocabulary_len());
    }

    #[test]
    fn test_transform_is_unit_length() {
        let model = TfidfModel::fit(&corpus(), 50);
        let row = model.transform("Your account password");
        let norm: f64 = row.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rare_terms_weigh_more() {
        let model = TfidfModel::fit(&corpus(), 100);
        let row = model.transform("account lunch");
        let account = row[model.column("account").unwrap()];
        let lunch = row[model.column("lunch").unwrap()];
        assert!(lunch > account);
    }

    #[test]
    fn test_empty_model_and_empty_text() {
        assert!(TfidfModel::empty().transform("anything").is_empty());
        let model = TfidfModel::fit(&corpus(), 10);
        assert_eq!(model.transform(""), vec![0.0; 10]);
    }

    #[test]
    fn test_validate_rejects_inconsistent_table() {
        let mut model = TfidfModel::fit(&corpus(), 10);
        model.idf.pop();
        assert!(model.validate().is_err());
    }
}
