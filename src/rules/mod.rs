pub mod predicate;

use crate::error::ScoringError;
use crate::features::FeatureSet;
use anyhow::Context;
use predicate::Predicate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const BUILTIN_RULES: &str = include_str!("default_rules.yaml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.pad(label)
    }
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub severity: Severity,
    pub weight: f64,
    #[serde(default = "default_active")]
    pub active: bool,
    pub predicate: Predicate,
}

/// Immutable, id-ordered collection of rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSet {
    version: String,
    rules: Vec<Rule>,
}

#[derive(Deserialize)]
struct RuleSetFile {
    #[serde(default)]
    version: String,
    #[serde(default)]
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Sorts by id and rejects duplicate ids or names.
    pub fn new(version: &str, mut rules: Vec<Rule>) -> Result<Self, ScoringError> {
        rules.sort_by_key(|r| r.id);

        let mut names = BTreeSet::new();
        for pair in rules.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(ScoringError::Config(format!(
                    "duplicate rule id {}",
                    pair[0].id
                )));
            }
        }
        for rule in &rules {
            if !names.insert(rule.name.as_str()) {
                return Err(ScoringError::Config(format!(
                    "duplicate rule name '{}'",
                    rule.name
                )));
            }
        }

        Ok(Self {
            version: version.to_string(),
            rules,
        })
    }

    pub fn empty() -> Self {
        Self {
            version: "empty".to_string(),
            rules: Vec::new(),
        }
    }

    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_yaml(BUILTIN_RULES).context("Built-in rule set is invalid")
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let file: RuleSetFile = serde_yaml::from_str(content)?;
        Ok(Self::new(&file.version, file.rules)?)
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule file: {path}"))?;
        let rule_set =
            Self::from_yaml(&content).with_context(|| format!("Invalid rule file: {path}"))?;
        log::info!(
            "Loaded {} rules (version {}) from {}",
            rule_set.len(),
            rule_set.version,
            path
        );
        Ok(rule_set)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.rules.iter().filter(|r| r.active).count()
    }

    /// Static problems in the set. Loading is lenient, so a rule listed here
    /// is still kept and will be skipped at evaluation time.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for rule in &self.rules {
            if !rule.weight.is_finite() {
                problems.push(format!("rule {} '{}': weight is not finite", rule.id, rule.name));
            }
            if let Err(e) = rule.predicate.validate() {
                problems.push(format!("rule {} '{}': {}", rule.id, rule.name, e));
            }
        }
        problems
    }
}

/// One rule matching one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleHit {
    pub rule_id: u32,
    pub rule_name: String,
    pub severity: Severity,
    pub weight: f64,
    pub category: String,
    pub description: String,
    /// Feature values the predicate read, e.g. `has_urgency=true, ip_url_count=1`.
    pub matched_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleEvaluation {
    pub rule_score: f64,
    /// In rule id order.
    pub hits: Vec<RuleHit>,
    pub skipped: Vec<ScoringError>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEngine;

impl RuleEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, rule_set: &RuleSet, features: &FeatureSet) -> RuleEvaluation {
        let mut evaluation = RuleEvaluation::default();

        for rule in rule_set.rules().iter().filter(|r| r.active) {
            let mut trace = Vec::new();
            match rule.predicate.evaluate(features, &mut trace) {
                Ok(true) if rule.weight.is_finite() => {
                    log::debug!("Rule {} '{}' matched: {}", rule.id, rule.name, trace.join(", "));
                    evaluation.rule_score += rule.weight;
                    evaluation.hits.push(RuleHit {
                        rule_id: rule.id,
                        rule_name: rule.name.clone(),
                        severity: rule.severity,
                        weight: rule.weight,
                        category: rule.category.clone(),
                        description: rule.description.clone(),
                        matched_value: (!trace.is_empty()).then(|| trace.join(", ")),
                    });
                }
                Ok(true) => {
                    log::warn!("Skipping rule {} '{}': weight is not finite", rule.id, rule.name);
                    evaluation.skipped.push(ScoringError::RulePredicate {
                        rule: rule.name.clone(),
                        reason: "weight is not finite".to_string(),
                    });
                }
                Ok(false) => {
                    log::debug!("Rule {} '{}' did not match", rule.id, rule.name);
                }
                Err(e) => {
                    log::warn!("Skipping rule {} '{}': {}", rule.id, rule.name, e);
                    evaluation.skipped.push(ScoringError::RulePredicate {
                        rule: rule.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        evaluation
    }
}
