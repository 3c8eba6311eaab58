pub mod lists;

use crate::config::FusionConfig;
use crate::machine_learning::MlScore;
use crate::rules::{RuleEvaluation, RuleHit};
use crate::threat_intel::ThreatIntelOutcome;
use crate::vectorizer::FEATURE_SCHEMA_VERSION;
use lists::ListCheck;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Legitimate,
    Suspicious,
    Phishing,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Classification::Legitimate => "LEGITIMATE",
            Classification::Suspicious => "SUSPICIOUS",
            Classification::Phishing => "PHISHING",
        };
        f.pad(label)
    }
}

/// Final verdict for one submission. Never modified after creation; a
/// re-analysis produces a new bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBundle {
    pub rule_score: f64,
    pub ml_score: f64,
    /// Absent when threat intel was unavailable.
    pub threat_intel_score: Option<f64>,
    pub final_score: f64,
    pub classification: Classification,
    pub confidence: f64,
    pub requires_review: bool,
    pub explanation: Vec<String>,
    pub triggered_rules: Vec<RuleHit>,
    pub is_allow_listed: bool,
    pub is_deny_listed: bool,
    pub ml_model_name: String,
    pub ml_model_version: String,
    pub feature_schema_version: String,
    pub rule_set_version: String,
}

/// Everything fusion needs from the upstream scorers.
pub struct Signals<'a> {
    pub rules: &'a RuleEvaluation,
    pub ml: &'a MlScore,
    pub threat_intel: &'a ThreatIntelOutcome,
    pub lists: &'a ListCheck,
    pub rule_set_version: &'a str,
}

pub struct FusionEngine {
    config: FusionConfig,
}

impl Default for FusionEngine {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Rule score clamped to the cap and scaled to 0-100.
    pub fn normalized_rule_score(&self, rule_score: f64) -> f64 {
        rule_score.clamp(0.0, self.config.rule_score_cap) / self.config.rule_score_cap * 100.0
    }

    /// Weighted mean of the available signals. A missing threat-intel score
    /// drops its weight from the denominator instead of counting as zero.
    pub fn final_score(&self, rule_score: f64, ml_probability: f64, threat_intel: Option<f64>) -> f64 {
        let c = &self.config;
        let mut weighted = c.rule_weight * self.normalized_rule_score(rule_score)
            + c.ml_weight * ml_probability * 100.0;
        let mut total_weight = c.rule_weight + c.ml_weight;

        if let Some(intel) = threat_intel {
            weighted += c.threat_intel_weight * intel;
            total_weight += c.threat_intel_weight;
        }

        if total_weight <= 0.0 {
            return 0.0;
        }
        (weighted / total_weight).clamp(0.0, 100.0)
    }

    pub fn classify(&self, final_score: f64) -> Classification {
        if final_score >= self.config.phishing_threshold {
            Classification::Phishing
        } else if final_score >= self.config.suspicious_threshold {
            Classification::Suspicious
        } else {
            Classification::Legitimate
        }
    }

    /// Distance to the nearer threshold over `confidence_span`, in [0, 1].
    pub fn confidence(&self, final_score: f64) -> f64 {
        let distance = (final_score - self.config.suspicious_threshold)
            .abs()
            .min((final_score - self.config.phishing_threshold).abs());
        (distance / self.config.confidence_span).clamp(0.0, 1.0)
    }

    pub fn signals_disagree(&self, rule_score: f64, ml_probability: f64) -> bool {
        (self.normalized_rule_score(rule_score) - ml_probability * 100.0).abs()
            > self.config.disagreement_margin
    }

    pub fn fuse(&self, signals: Signals<'_>) -> ScoreBundle {
        let rule_score = signals.rules.rule_score;
        let ml_score = signals.ml.probability;
        let threat_intel_score = signals.threat_intel.score();
        let final_score = self.final_score(rule_score, ml_score, threat_intel_score);

        let mut explanation = Vec::new();
        let (classification, confidence, requires_review) =
            if let Some(reason) = &signals.lists.deny {
                explanation.push(format!("Deny-list override: {reason}"));
                (Classification::Phishing, 1.0, false)
            } else if let Some(reason) = &signals.lists.allow {
                explanation.push(format!("Allow-list override: {reason}"));
                (Classification::Legitimate, 1.0, false)
            } else {
                let classification = self.classify(final_score);
                let confidence = self.confidence(final_score);
                let review = match classification {
                    Classification::Suspicious => true,
                    Classification::Phishing => confidence < self.config.review_confidence_floor,
                    Classification::Legitimate => false,
                } || self.signals_disagree(rule_score, ml_score);
                (classification, confidence, review)
            };

        let mut ordered: Vec<&RuleHit> = signals.rules.hits.iter().collect();
        ordered.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.rule_name.cmp(&b.rule_name))
        });
        for hit in ordered {
            let mut line = format!("[{}] {} (+{})", hit.severity, hit.rule_name, hit.weight);
            if !hit.description.is_empty() {
                line.push_str(": ");
                line.push_str(&hit.description);
            }
            if let Some(matched) = &hit.matched_value {
                line.push_str(&format!(" [{matched}]"));
            }
            explanation.push(line);
        }

        explanation.push(format!(
            "ML model {} v{}: phishing probability {:.3}",
            signals.ml.model_name, signals.ml.model_version, ml_score
        ));

        match signals.threat_intel {
            ThreatIntelOutcome::Available(assessment)
                if assessment.score >= self.config.material_intel_score
                    && !assessment.findings.is_empty() =>
            {
                for finding in &assessment.findings {
                    explanation.push(format!("Threat intel: {finding}"));
                }
            }
            ThreatIntelOutcome::Available(assessment) => {
                explanation.push(format!(
                    "Threat intel: score {:.1}, no material findings",
                    assessment.score
                ));
            }
            ThreatIntelOutcome::Unavailable { reason } => {
                explanation.push(format!(
                    "Threat intel unavailable ({reason}); score based on rule and ML signals only"
                ));
            }
        }

        ScoreBundle {
            rule_score,
            ml_score,
            threat_intel_score,
            final_score,
            classification,
            confidence,
            requires_review,
            explanation,
            triggered_rules: signals.rules.hits.clone(),
            is_allow_listed: signals.lists.is_allow_listed(),
            is_deny_listed: signals.lists.is_deny_listed(),
            ml_model_name: signals.ml.model_name.clone(),
            ml_model_version: signals.ml.model_version.clone(),
            feature_schema_version: FEATURE_SCHEMA_VERSION.to_string(),
            rule_set_version: signals.rule_set_version.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Severity;
    use crate::threat_intel::ThreatAssessment;

    fn hit(name: &str, severity: Severity, weight: f64) -> RuleHit {
        RuleHit {
            rule_id: 1,
            rule_name: name.to_string(),
            severity,
            weight,
            category: "test".to_string(),
            description: String::new(),
            matched_value: None,
        }
    }

    fn ml(probability: f64) -> MlScore {
        MlScore {
            probability,
            model_name: "m".to_string(),
            model_version: "1".to_string(),
        }
    }

    fn rules(hits: Vec<RuleHit>) -> RuleEvaluation {
        RuleEvaluation {
            rule_score: hits.iter().map(|h| h.weight).sum(),
            hits,
            skipped: Vec::new(),
        }
    }

    fn fuse(
        engine: &FusionEngine,
        rules: &RuleEvaluation,
        ml: &MlScore,
        intel: &ThreatIntelOutcome,
        lists: &ListCheck,
    ) -> ScoreBundle {
        engine.fuse(Signals {
            rules,
            ml,
            threat_intel: intel,
            lists,
            rule_set_version: "t",
        })
    }

    fn available(score: f64, findings: &[&str]) -> ThreatIntelOutcome {
        ThreatIntelOutcome::Available(ThreatAssessment {
            score,
            findings: findings.iter().map(|f| f.to_string()).collect(),
        })
    }

    #[test]
    fn test_thresholds() {
        let engine = FusionEngine::default();
        assert_eq!(engine.classify(29.99), Classification::Legitimate);
        assert_eq!(engine.classify(30.0), Classification::Suspicious);
        assert_eq!(engine.classify(69.99), Classification::Suspicious);
        assert_eq!(engine.classify(70.0), Classification::Phishing);
    }

    #[test]
    fn test_confidence_grows_away_from_thresholds() {
        let engine = FusionEngine::default();
        assert_eq!(engine.confidence(30.0), 0.0);
        assert_eq!(engine.confidence(0.0), 1.0);
        assert_eq!(engine.confidence(100.0), 1.0);
        assert!((engine.confidence(85.0) - 0.5).abs() < 1e-12);
        assert!(engine.confidence(45.0) < engine.confidence(5.0));
        // the suspicious midpoint is as far from a threshold as 10 is
        assert_eq!(engine.confidence(50.0), engine.confidence(10.0));
    }

    #[test]
    fn test_missing_intel_is_renormalized_not_zero() {
        let engine = FusionEngine::default();
        let with_zero = engine.final_score(80.0, 0.8, Some(0.0));
        let without = engine.final_score(80.0, 0.8, None);
        assert!((without - 80.0).abs() < 1e-9);
        assert!(with_zero < without);
    }

    #[test]
    fn test_unavailable_matches_two_signal_configuration() {
        let three = FusionEngine::default();
        let two = FusionEngine::new(FusionConfig {
            rule_weight: 0.5,
            ml_weight: 0.5,
            threat_intel_weight: 0.0,
            ..Default::default()
        });
        for (rule_score, p) in [(0.0, 0.05), (35.0, 0.3), (55.0, 0.78), (100.0, 0.99), (10.0, 0.6)] {
            let a = three.final_score(rule_score, p, None);
            let b = two.final_score(rule_score, p, None);
            assert!((a - b).abs() < 1e-9);
            assert_eq!(three.classify(a), two.classify(b));
        }
    }

    #[test]
    fn test_rule_score_capped() {
        let engine = FusionEngine::default();
        assert_eq!(engine.normalized_rule_score(250.0), 100.0);
        assert_eq!(engine.normalized_rule_score(-5.0), 0.0);
    }

    #[test]
    fn test_deny_beats_allow_and_scores() {
        let engine = FusionEngine::default();
        let lists = ListCheck {
            deny: Some("sender a@b.example is deny-listed".to_string()),
            allow: Some("sender a@b.example is allow-listed".to_string()),
        };
        let bundle = fuse(&engine, &rules(vec![]), &ml(0.01), &available(0.0, &[]), &lists);
        assert_eq!(bundle.classification, Classification::Phishing);
        assert_eq!(bundle.confidence, 1.0);
        assert!(bundle.is_deny_listed && bundle.is_allow_listed);
        assert!(bundle.explanation[0].starts_with("Deny-list override"));
        assert!(!bundle.requires_review);
    }

    #[test]
    fn test_allow_list_overrides_high_scores() {
        let engine = FusionEngine::default();
        let lists = ListCheck {
            deny: None,
            allow: Some("sender domain x matches allow-listed domain x".to_string()),
        };
        let hits = rules(vec![hit("bad", Severity::Critical, 100.0)]);
        let bundle = fuse(&engine, &hits, &ml(0.99), &available(90.0, &["bad"]), &lists);
        assert_eq!(bundle.classification, Classification::Legitimate);
        assert_eq!(bundle.confidence, 1.0);
        assert!(bundle.final_score > 70.0);
    }

    #[test]
    fn test_explanation_order() {
        let engine = FusionEngine::default();
        let hits = rules(vec![
            hit("zeta", Severity::Low, 5.0),
            hit("beta", Severity::High, 20.0),
            hit("alpha", Severity::High, 20.0),
            hit("omega", Severity::Critical, 40.0),
        ]);
        let bundle = fuse(
            &engine,
            &hits,
            &ml(0.5),
            &available(60.0, &["URL reported malicious: http://x", "Domain x is sinkholed"]),
            &ListCheck::default(),
        );
        let names: Vec<&str> = bundle
            .explanation
            .iter()
            .take(4)
            .map(|line| line.split_whitespace().nth(1).unwrap_or(""))
            .collect();
        assert_eq!(names, vec!["omega", "alpha", "beta", "zeta"]);
        assert!(bundle.explanation[4].starts_with("ML model m v1"));
        assert_eq!(bundle.explanation[5], "Threat intel: URL reported malicious: http://x");
        assert_eq!(bundle.explanation.len(), 7);
        // triggered_rules keeps evaluation order
        assert_eq!(bundle.triggered_rules[0].rule_name, "zeta");
    }

    #[test]
    fn test_unavailable_intel_noted() {
        let engine = FusionEngine::default();
        let bundle = fuse(
            &engine,
            &rules(vec![]),
            &ml(0.05),
            &ThreatIntelOutcome::unavailable("lookup timed out after 2000ms"),
            &ListCheck::default(),
        );
        assert_eq!(bundle.threat_intel_score, None);
        assert!(bundle.explanation.last().unwrap().contains("unavailable"));
        assert_eq!(bundle.classification, Classification::Legitimate);
        assert!(!bundle.requires_review);
    }

    #[test]
    fn test_review_flags() {
        let engine = FusionEngine::default();
        let none = ListCheck::default();
        let intel = ThreatIntelOutcome::unavailable("x");

        // suspicious band
        let bundle = fuse(&engine, &rules(vec![hit("r", Severity::Medium, 50.0)]), &ml(0.5), &intel, &none);
        assert_eq!(bundle.classification, Classification::Suspicious);
        assert!(bundle.requires_review);

        // phishing just over the line
        let bundle = fuse(&engine, &rules(vec![hit("r", Severity::High, 72.0)]), &ml(0.72), &intel, &none);
        assert_eq!(bundle.classification, Classification::Phishing);
        assert!(bundle.confidence < 0.6);
        assert!(bundle.requires_review);

        // confident phishing with agreeing signals
        let bundle = fuse(&engine, &rules(vec![hit("r", Severity::High, 100.0)]), &ml(0.99), &intel, &none);
        assert_eq!(bundle.classification, Classification::Phishing);
        assert!(!bundle.requires_review);

        // legitimate overall but rules and ML disagree sharply
        let bundle = fuse(&engine, &rules(vec![hit("r", Severity::High, 55.0)]), &ml(0.0), &intel, &none);
        assert_eq!(bundle.classification, Classification::Legitimate);
        assert!(bundle.requires_review);
    }
}
