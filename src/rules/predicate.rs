//! Rule conditions as data.
//!
//! A predicate can only read named FeatureSet values, compare them against
//! constants and combine the results. There is no way to express I/O, loops or
//! calls, and nesting depth is bounded.

use crate::features::{feature_kind, FeatureKind, FeatureSet, FeatureValue};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_PREDICATE_DEPTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredicateError {
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),
    #[error("feature '{feature}' is a {actual:?}, predicate expects a {expected:?}")]
    TypeMismatch {
        feature: String,
        expected: FeatureKind,
        actual: FeatureKind,
    },
    #[error("'{0}' combinator has no operands")]
    EmptyCombinator(&'static str),
    #[error("predicate nesting exceeds {MAX_PREDICATE_DEPTH} levels")]
    TooDeep,
    #[error("comparison constant for '{0}' is not a finite number")]
    NonFiniteConstant(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn apply(self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Gt => left > right,
            CompareOp::Gte => left >= right,
            CompareOp::Lt => left < right,
            CompareOp::Lte => left <= right,
            CompareOp::Eq => left == right,
            CompareOp::Ne => left != right,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum Predicate {
    /// True when a boolean feature is set.
    Flag { feature: String },
    /// Numeric feature compared with a constant.
    Compare {
        feature: String,
        op: CompareOp,
        value: f64,
    },
    And { predicates: Vec<Predicate> },
    Or { predicates: Vec<Predicate> },
    Not { predicate: Box<Predicate> },
}

impl Predicate {
    pub fn flag(feature: &str) -> Self {
        Predicate::Flag {
            feature: feature.to_string(),
        }
    }

    pub fn compare(feature: &str, op: CompareOp, value: f64) -> Self {
        Predicate::Compare {
            feature: feature.to_string(),
            op,
            value,
        }
    }

    /// Static check against the declared feature schema.
    pub fn validate(&self) -> Result<(), PredicateError> {
        self.validate_at(0)
    }

    fn validate_at(&self, depth: usize) -> Result<(), PredicateError> {
        if depth >= MAX_PREDICATE_DEPTH {
            return Err(PredicateError::TooDeep);
        }
        match self {
            Predicate::Flag { feature } => expect_kind(feature, FeatureKind::Flag),
            Predicate::Compare { feature, value, .. } => {
                if !value.is_finite() {
                    return Err(PredicateError::NonFiniteConstant(feature.clone()));
                }
                expect_kind(feature, FeatureKind::Number)
            }
            Predicate::And { predicates } | Predicate::Or { predicates } => {
                if predicates.is_empty() {
                    let name = if matches!(self, Predicate::And { .. }) { "And" } else { "Or" };
                    return Err(PredicateError::EmptyCombinator(name));
                }
                predicates.iter().try_for_each(|p| p.validate_at(depth + 1))
            }
            Predicate::Not { predicate } => predicate.validate_at(depth + 1),
        }
    }

    /// Evaluate against a feature set. Every value read is appended to `trace`
    /// as `name=value` (first read only).
    pub fn evaluate(
        &self,
        features: &FeatureSet,
        trace: &mut Vec<String>,
    ) -> Result<bool, PredicateError> {
        self.evaluate_at(features, trace, 0)
    }

    fn evaluate_at(
        &self,
        features: &FeatureSet,
        trace: &mut Vec<String>,
        depth: usize,
    ) -> Result<bool, PredicateError> {
        if depth >= MAX_PREDICATE_DEPTH {
            return Err(PredicateError::TooDeep);
        }
        match self {
            Predicate::Flag { feature } => {
                Ok(read(features, feature, FeatureKind::Flag, trace)? == FeatureValue::Flag(true))
            }
            Predicate::Compare { feature, op, value } => {
                if !value.is_finite() {
                    return Err(PredicateError::NonFiniteConstant(feature.clone()));
                }
                let actual = read(features, feature, FeatureKind::Number, trace)?.as_f64();
                Ok(op.apply(actual, *value))
            }
            Predicate::And { predicates } => {
                if predicates.is_empty() {
                    return Err(PredicateError::EmptyCombinator("And"));
                }
                for p in predicates {
                    if !p.evaluate_at(features, trace, depth + 1)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or { predicates } => {
                if predicates.is_empty() {
                    return Err(PredicateError::EmptyCombinator("Or"));
                }
                for p in predicates {
                    if p.evaluate_at(features, trace, depth + 1)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Not { predicate } => {
                Ok(!predicate.evaluate_at(features, trace, depth + 1)?)
            }
        }
    }
}

fn expect_kind(feature: &str, expected: FeatureKind) -> Result<(), PredicateError> {
    match feature_kind(feature) {
        None => Err(PredicateError::UnknownFeature(feature.to_string())),
        Some(actual) if actual != expected => Err(PredicateError::TypeMismatch {
            feature: feature.to_string(),
            expected,
            actual,
        }),
        Some(_) => Ok(()),
    }
}

fn read(
    features: &FeatureSet,
    feature: &str,
    expected: FeatureKind,
    trace: &mut Vec<String>,
) -> Result<FeatureValue, PredicateError> {
    let value = features
        .get(feature)
        .ok_or_else(|| PredicateError::UnknownFeature(feature.to_string()))?;
    if value.kind() != expected {
        return Err(PredicateError::TypeMismatch {
            feature: feature.to_string(),
            expected,
            actual: value.kind(),
        });
    }
    let entry = format!("{feature}={value}");
    if !trace.contains(&entry) {
        trace.push(entry);
    }
    Ok(value)
}
