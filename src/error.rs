use thiserror::Error;

/// Failures surfaced by the scoring pipeline.
///
/// `MalformedInput` and `VectorShapeMismatch` abort a submission. The other
/// variants are recovered inside the pipeline and only appear in logs or as
/// the reason attached to a degraded result.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScoringError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("rule '{rule}' failed to evaluate: {reason}")]
    RulePredicate { rule: String, reason: String },

    #[error("vector shape mismatch: model expects {expected} inputs, vectorizer produced {actual}")]
    VectorShapeMismatch { expected: usize, actual: usize },

    #[error("threat intelligence unavailable: {0}")]
    ThreatIntelUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ScoringError {
    /// True for errors that mean no ScoreBundle can be produced.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScoringError::MalformedInput(_)
                | ScoringError::VectorShapeMismatch { .. }
                | ScoringError::Config(_)
        )
    }
}
