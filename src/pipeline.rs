//! End-to-end scoring of one submission.
//!
//! analyzer -> {rule engine, vectorizer -> ML scorer, threat intel} -> fusion
//!
//! Rule sets and model bundles are read from snapshots at the start of a pass
//! and held for its whole duration, so a concurrent reload never mixes
//! versions inside one ScoreBundle.

use crate::config::Config;
use crate::email::ParsedEmail;
use crate::error::ScoringError;
use crate::features::{FeatureEngine, FeatureSet};
use crate::fusion::lists::SenderLists;
use crate::fusion::{FusionEngine, ScoreBundle, Signals};
use crate::machine_learning::{MlScore, MlScorer, ModelBundle};
use crate::rules::{RuleEngine, RuleEvaluation, RuleSet};
use crate::snapshot::SnapshotCell;
use crate::threat_intel::feeds::FeedIndex;
use crate::threat_intel::{ThreatIntelAggregator, ThreatIntelOutcome, ThreatIntelReport};
use crate::vectorizer::{FeatureVector, FeatureVectorizer};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubmissionStatus {
    Pending,
    Scored,
    Classified,
    Failed,
}

/// One email moving through PENDING -> SCORED -> CLASSIFIED, or FAILED.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: String,
    status: SubmissionStatus,
    bundle: Option<ScoreBundle>,
    failure: Option<ScoringError>,
}

impl Submission {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            status: SubmissionStatus::Pending,
            bundle: None,
            failure: None,
        }
    }

    pub fn status(&self) -> SubmissionStatus {
        self.status
    }

    pub fn bundle(&self) -> Option<&ScoreBundle> {
        self.bundle.as_ref()
    }

    pub fn failure(&self) -> Option<&ScoringError> {
        self.failure.as_ref()
    }

    fn fail(&mut self, error: ScoringError) {
        log::error!("Submission {} failed: {}", self.id, error);
        self.status = SubmissionStatus::Failed;
        self.bundle = None;
        self.failure = Some(error);
    }
}

/// Input for batch scoring.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: String,
    pub email: ParsedEmail,
    pub intel: Option<ThreatIntelReport>,
}

/// Output of the three independent scorers before fusion.
struct ScorerResults {
    rules: RuleEvaluation,
    ml: MlScore,
    rule_set_version: String,
}

pub struct ScoringPipeline {
    analyzer: FeatureEngine,
    vectorizer: FeatureVectorizer,
    rule_engine: RuleEngine,
    aggregator: ThreatIntelAggregator,
    fusion: FusionEngine,
    lists: SenderLists,
    feeds: FeedIndex,
    rules: SnapshotCell<RuleSet>,
    models: SnapshotCell<ModelBundle>,
}

impl ScoringPipeline {
    pub fn new(
        config: &Config,
        rules: RuleSet,
        models: ModelBundle,
        feeds: FeedIndex,
    ) -> Result<Self, ScoringError> {
        config.fusion.validate()?;
        models.check_compatible()?;

        Ok(Self {
            analyzer: FeatureEngine::new(&config.analyzer),
            vectorizer: FeatureVectorizer::new(),
            rule_engine: RuleEngine::new(),
            aggregator: ThreatIntelAggregator::new(config.threat_intel.clone()),
            fusion: FusionEngine::new(config.fusion.clone()),
            lists: SenderLists::new(&config.lists),
            feeds,
            rules: SnapshotCell::new(rules),
            models: SnapshotCell::new(models),
        })
    }

    /// Loads the rule set, models and feeds named in the config, falling back
    /// to the built-in rules and baseline model.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let rules = match &config.rules_path {
            Some(path) => RuleSet::from_file(path)?,
            None => RuleSet::builtin()?,
        };
        for problem in rules.validate() {
            log::warn!("Rule set {}: {}", rules.version(), problem);
        }
        let models = ModelBundle::load(
            config.model_path.as_deref(),
            config.text_model_path.as_deref(),
        )?;
        let feeds = match &config.feeds_path {
            Some(path) => FeedIndex::from_file(path)?,
            None => FeedIndex::default(),
        };
        Ok(Self::new(config, rules, models, feeds)?)
    }

    pub fn rule_set(&self) -> Arc<RuleSet> {
        self.rules.load()
    }

    pub fn models(&self) -> Arc<ModelBundle> {
        self.models.load()
    }

    /// Installs a new rule set. Passes already running keep the old one.
    pub fn reload_rules(&self, rules: RuleSet) {
        log::info!(
            "Installing rule set {} ({} active rules)",
            rules.version(),
            rules.active_count()
        );
        self.rules.store(rules);
    }

    /// Installs a new classifier and text model together after checking they
    /// fit the current vectorizer.
    pub fn reload_models(&self, models: ModelBundle) -> Result<(), ScoringError> {
        models.check_compatible()?;
        log::info!(
            "Installing model {} v{}",
            models.classifier.name(),
            models.classifier.version()
        );
        self.models.store(models);
        Ok(())
    }

    pub fn analyze(&self, email: &ParsedEmail) -> FeatureSet {
        self.analyzer.analyze(email, &self.models.load().text_model)
    }

    /// Turns an optional, already-fetched report into an outcome, adding local
    /// feed matches.
    pub fn local_intel(
        &self,
        email: &ParsedEmail,
        report: Option<ThreatIntelReport>,
    ) -> ThreatIntelOutcome {
        let fetched = report.ok_or_else(|| {
            ScoringError::ThreatIntelUnavailable("no threat intel report supplied".to_string())
        });
        self.aggregator.outcome(fetched, self.feeds.matches(email))
    }

    /// Scores one email with a threat-intel outcome that is already known.
    pub fn score(
        &self,
        email: &ParsedEmail,
        threat_intel: ThreatIntelOutcome,
    ) -> Result<ScoreBundle, ScoringError> {
        let results = self.run_scorers(email)?;
        Ok(self.fuse(None, email, results, &threat_intel))
    }

    /// Scores one email while the threat-intel lookup runs alongside the rule
    /// engine and ML scorer. The lookup is bounded by the configured timeout.
    ///
    /// The lookup branch is polled first so its request and timer are in
    /// flight before the synchronous rule and ML work runs on this task.
    pub async fn score_with_intel<F>(
        &self,
        email: &ParsedEmail,
        fetch: F,
    ) -> Result<ScoreBundle, ScoringError>
    where
        F: Future<Output = Result<ThreatIntelReport, ScoringError>>,
    {
        email.validate()?;
        let rule_set = self.rules.load();
        let models = self.models.load();
        let (features, vector) = self.features_and_vector(email, &models);
        let feed_matches = self.feeds.matches(email);

        let (threat_intel, rules, ml) = tokio::join!(
            self.aggregator.gather(fetch, feed_matches),
            async { self.rule_engine.evaluate(&rule_set, &features) },
            async { MlScorer::score(models.classifier.as_ref(), &vector) },
        );

        let results = ScorerResults {
            rules,
            ml: ml?,
            rule_set_version: rule_set.version().to_string(),
        };
        Ok(self.fuse(None, email, results, &threat_intel))
    }

    /// Drives a PENDING submission to CLASSIFIED or FAILED. Anything else is
    /// rejected; re-analysis uses a fresh submission.
    pub fn process(
        &self,
        submission: &mut Submission,
        email: &ParsedEmail,
        threat_intel: ThreatIntelOutcome,
    ) -> Result<(), ScoringError> {
        if submission.status != SubmissionStatus::Pending {
            return Err(ScoringError::Config(format!(
                "submission {} is {:?}, expected PENDING",
                submission.id, submission.status
            )));
        }

        let results = match self.run_scorers(email) {
            Ok(results) => results,
            Err(e) => {
                submission.fail(e.clone());
                return Err(e);
            }
        };
        submission.status = SubmissionStatus::Scored;
        log::debug!(
            "Submission {} scored: rules {:.1}, ml {:.3}",
            submission.id,
            results.rules.rule_score,
            results.ml.probability
        );

        let bundle = self.fuse(Some(&submission.id), email, results, &threat_intel);
        submission.bundle = Some(bundle);
        submission.status = SubmissionStatus::Classified;
        Ok(())
    }

    /// Scores independent submissions in parallel, one task each. Results come
    /// back in input order.
    pub async fn score_batch(self: Arc<Self>, batch: Vec<BatchItem>) -> Vec<Submission> {
        let mut handles = Vec::with_capacity(batch.len());
        for item in batch {
            let pipeline = Arc::clone(&self);
            let id = item.id.clone();
            let handle = tokio::spawn(async move {
                let mut submission = Submission::new(&item.id);
                let outcome = pipeline.local_intel(&item.email, item.intel);
                // failures are recorded on the submission
                let _ = pipeline.process(&mut submission, &item.email, outcome);
                submission
            });
            handles.push((id, handle));
        }

        let mut submissions = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            match handle.await {
                Ok(submission) => submissions.push(submission),
                Err(e) => {
                    let mut submission = Submission::new(&id);
                    submission.fail(ScoringError::Config(format!("scoring task failed: {e}")));
                    submissions.push(submission);
                }
            }
        }
        submissions
    }

    fn features_and_vector(
        &self,
        email: &ParsedEmail,
        models: &ModelBundle,
    ) -> (FeatureSet, FeatureVector) {
        let features = self.analyzer.analyze(email, &models.text_model);
        let vector = self.vectorizer.vectorize(&features);
        (features, vector)
    }

    fn run_scorers(&self, email: &ParsedEmail) -> Result<ScorerResults, ScoringError> {
        email.validate()?;
        let rule_set = self.rules.load();
        let models = self.models.load();
        let (features, vector) = self.features_and_vector(email, &models);

        Ok(ScorerResults {
            rules: self.rule_engine.evaluate(&rule_set, &features),
            ml: MlScorer::score(models.classifier.as_ref(), &vector)?,
            rule_set_version: rule_set.version().to_string(),
        })
    }

    fn fuse(
        &self,
        submission_id: Option<&str>,
        email: &ParsedEmail,
        results: ScorerResults,
        threat_intel: &ThreatIntelOutcome,
    ) -> ScoreBundle {
        let lists = self.lists.check(email);
        let bundle = self.fusion.fuse(Signals {
            rules: &results.rules,
            ml: &results.ml,
            threat_intel,
            lists: &lists,
            rule_set_version: &results.rule_set_version,
        });

        log::info!(
            target: "audit",
            "{}",
            serde_json::json!({
                "submission": submission_id,
                "classification": bundle.classification,
                "final_score": bundle.final_score,
                "confidence": bundle.confidence,
                "requires_review": bundle.requires_review,
                "triggered_rules": bundle
                    .triggered_rules
                    .iter()
                    .map(|h| h.rule_name.as_str())
                    .collect::<Vec<_>>(),
                "skipped_rules": results.rules.skipped.len(),
                "explanation": bundle.explanation,
                "rule_set_version": bundle.rule_set_version,
                "ml_model": format!("{} v{}", bundle.ml_model_name, bundle.ml_model_version),
                "feature_schema_version": bundle.feature_schema_version,
            })
        );
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::Classification;
    use crate::machine_learning::{Classifier, LogisticModel};
    use crate::rules::predicate::Predicate;
    use crate::rules::{Rule, Severity};
    use crate::threat_intel::feeds::{FeedKind, ThreatFeed};
    use crate::vectorizer::tfidf::TfidfModel;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn pipeline() -> ScoringPipeline {
        ScoringPipeline::from_config(&Config::default()).unwrap()
    }

    fn phishy() -> ParsedEmail {
        ParsedEmail {
            sender: Some("alerts@unknown.example".to_string()),
            body: "URGENT: verify now. This is critical and immediately required. Alert!"
                .to_string(),
            urls: vec!["http://192.168.1.5/login".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_submission_lifecycle() {
        let pipeline = pipeline();
        let mut submission = Submission::new("s1");
        assert_eq!(submission.status(), SubmissionStatus::Pending);

        let email = phishy();
        pipeline
            .process(&mut submission, &email, pipeline.local_intel(&email, None))
            .unwrap();
        assert_eq!(submission.status(), SubmissionStatus::Classified);
        assert!(submission.bundle().is_some());

        // a classified submission is never re-scored in place
        let again = pipeline.process(&mut submission, &email, ThreatIntelOutcome::unavailable("x"));
        assert!(again.is_err());
        assert_eq!(submission.status(), SubmissionStatus::Classified);
    }

    #[test]
    fn test_malformed_input_fails_submission() {
        let pipeline = pipeline();
        let email = ParsedEmail {
            urls: vec!["  ".to_string()],
            ..Default::default()
        };
        let mut submission = Submission::new("bad");
        let result = pipeline.process(&mut submission, &email, ThreatIntelOutcome::unavailable("x"));
        assert!(matches!(result, Err(ScoringError::MalformedInput(_))));
        assert_eq!(submission.status(), SubmissionStatus::Failed);
        assert!(submission.bundle().is_none());
        assert!(pipeline.score(&email, ThreatIntelOutcome::unavailable("x")).is_err());
    }

    #[test]
    fn test_shape_skew_is_fatal() {
        let pipeline = pipeline();
        let skewed = ModelBundle {
            classifier: Arc::new(LogisticModel::baseline(3)),
            text_model: Arc::new(TfidfModel::empty()),
        };
        assert!(pipeline.reload_models(skewed.clone()).is_err());

        let pipeline = ScoringPipeline {
            models: SnapshotCell::new(skewed),
            ..pipeline
        };
        let err = pipeline
            .score(&phishy(), ThreatIntelOutcome::unavailable("x"))
            .unwrap_err();
        assert!(matches!(err, ScoringError::VectorShapeMismatch { .. }));
    }

    #[test]
    fn test_rule_reload_takes_effect_for_next_pass() {
        let pipeline = pipeline();
        let email = phishy();
        let before = pipeline
            .score(&email, ThreatIntelOutcome::unavailable("x"))
            .unwrap();
        assert!(before.rule_score > 0.0);

        let only_html = RuleSet::new(
            "v2",
            vec![Rule {
                id: 1,
                name: "html".to_string(),
                description: String::new(),
                category: "content".to_string(),
                severity: Severity::Low,
                weight: 5.0,
                active: true,
                predicate: Predicate::flag("has_html"),
            }],
        )
        .unwrap();
        pipeline.reload_rules(only_html);

        let after = pipeline
            .score(&email, ThreatIntelOutcome::unavailable("x"))
            .unwrap();
        assert_eq!(after.rule_score, 0.0);
        assert_eq!(after.rule_set_version, "v2");
        // the earlier bundle is untouched
        assert!(before.rule_score > 0.0);
    }

    #[tokio::test]
    async fn test_score_with_intel_joins_all_signals() {
        let pipeline = pipeline();
        let report = ThreatIntelReport {
            urls: vec![crate::threat_intel::UrlReputation {
                url: "http://192.168.1.5/login".to_string(),
                verdict: crate::threat_intel::UrlVerdict::Malicious,
            }],
            ..Default::default()
        };
        let bundle = pipeline
            .score_with_intel(&phishy(), async move { Ok::<_, ScoringError>(report) })
            .await
            .unwrap();
        assert_eq!(bundle.threat_intel_score, Some(60.0));
        assert!(bundle
            .explanation
            .iter()
            .any(|e| e == "Threat intel: URL reported malicious: http://192.168.1.5/login"));
    }

    #[tokio::test]
    async fn test_failed_lookup_degrades_to_two_signals() {
        let pipeline = pipeline();
        let email = phishy();
        let degraded = pipeline
            .score_with_intel(&email, async {
                Err::<ThreatIntelReport, _>(ScoringError::ThreatIntelUnavailable(
                    "provider returned 503".to_string(),
                ))
            })
            .await
            .unwrap();
        let sync = pipeline
            .score(&email, ThreatIntelOutcome::unavailable("provider returned 503"))
            .unwrap();
        assert_eq!(degraded.threat_intel_score, None);
        assert_eq!(degraded.final_score, sync.final_score);
        assert_ne!(degraded.classification, Classification::Legitimate);
    }

    fn with_feeds(feeds: FeedIndex) -> ScoringPipeline {
        ScoringPipeline::new(
            &Config::default(),
            RuleSet::builtin().unwrap(),
            ModelBundle::baseline(),
            feeds,
        )
        .unwrap()
    }

    fn bank_feed() -> FeedIndex {
        FeedIndex::new(&[ThreatFeed {
            name: "phish-domains".to_string(),
            kind: FeedKind::Domain,
            active: true,
            entries: vec!["evil-bank.example".to_string()],
        }])
    }

    #[test]
    fn test_feed_hit_counts_without_remote_report() {
        let pipeline = with_feeds(bank_feed());
        let email = ParsedEmail {
            sender: Some("alerts@evil-bank.example".to_string()),
            body: "Your monthly statement is ready.".to_string(),
            ..Default::default()
        };

        let bundle = pipeline
            .score(&email, pipeline.local_intel(&email, None))
            .unwrap();
        assert_eq!(bundle.threat_intel_score, Some(25.0));
        assert!(bundle
            .explanation
            .iter()
            .any(|e| e == "Threat intel: DOMAIN evil-bank.example listed in feed 'phish-domains'"));
        assert!(bundle.explanation.iter().any(|e| e
            == "Threat intel: remote lookup unavailable (no threat intel report supplied); local feeds only"));

        let without_feed = pipeline
            .score(&email, ThreatIntelOutcome::unavailable("x"))
            .unwrap();
        assert!(bundle.final_score > without_feed.final_score);
    }

    #[tokio::test]
    async fn test_feed_hit_survives_lookup_timeout() {
        let mut config = Config::default();
        config.threat_intel.timeout_ms = 10;
        let pipeline = ScoringPipeline::new(
            &config,
            RuleSet::builtin().unwrap(),
            ModelBundle::baseline(),
            bank_feed(),
        )
        .unwrap();
        let email = ParsedEmail {
            sender: Some("alerts@login.evil-bank.example".to_string()),
            ..Default::default()
        };

        let bundle = pipeline
            .score_with_intel(&email, async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok::<_, ScoringError>(ThreatIntelReport::default())
            })
            .await
            .unwrap();
        assert_eq!(bundle.threat_intel_score, Some(25.0));
        assert!(bundle
            .explanation
            .last()
            .is_some_and(|e| e.contains("lookup timed out after 10ms")));
    }

    #[test]
    fn test_missing_report_reason_is_not_repeated() {
        let pipeline = pipeline();
        let email = phishy();
        let outcome = pipeline.local_intel(&email, None);
        assert_eq!(
            outcome,
            ThreatIntelOutcome::unavailable("no threat intel report supplied")
        );

        let bundle = pipeline.score(&email, outcome).unwrap();
        assert_eq!(
            bundle.explanation.last().map(String::as_str),
            Some(
                "Threat intel unavailable (no threat intel report supplied); \
                 score based on rule and ML signals only"
            )
        );
    }

    /// Baseline model that records whether the lookup had started by the
    /// time it was asked for a prediction.
    struct LookupAwareModel {
        inner: LogisticModel,
        lookup_started: Arc<AtomicBool>,
        started_before_predict: Arc<AtomicBool>,
    }

    impl Classifier for LookupAwareModel {
        fn input_dim(&self) -> usize {
            self.inner.input_dim()
        }

        fn predict_proba(&self, row: &[f64]) -> f64 {
            self.started_before_predict
                .store(self.lookup_started.load(Ordering::SeqCst), Ordering::SeqCst);
            self.inner.predict_proba(row)
        }

        fn name(&self) -> &str {
            self.inner.name()
        }

        fn version(&self) -> &str {
            self.inner.version()
        }

        fn feature_schema_version(&self) -> &str {
            self.inner.feature_schema_version()
        }
    }

    #[tokio::test]
    async fn test_lookup_starts_before_ml_scoring() {
        let lookup_started = Arc::new(AtomicBool::new(false));
        let started_before_predict = Arc::new(AtomicBool::new(false));
        let model = LookupAwareModel {
            inner: LogisticModel::baseline(0),
            lookup_started: lookup_started.clone(),
            started_before_predict: started_before_predict.clone(),
        };
        let models =
            ModelBundle::new(Arc::new(model), Arc::new(TfidfModel::empty())).unwrap();
        let pipeline = ScoringPipeline::new(
            &Config::default(),
            RuleSet::builtin().unwrap(),
            models,
            FeedIndex::default(),
        )
        .unwrap();

        let flag = lookup_started.clone();
        pipeline
            .score_with_intel(&phishy(), async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, ScoringError>(ThreatIntelReport::default())
            })
            .await
            .unwrap();
        assert!(started_before_predict.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_failures() {
        let pipeline = Arc::new(pipeline());
        let batch = vec![
            BatchItem {
                id: "a".to_string(),
                email: phishy(),
                intel: None,
            },
            BatchItem {
                id: "b".to_string(),
                email: ParsedEmail {
                    attachments: vec![crate::email::Attachment::default()],
                    ..Default::default()
                },
                intel: None,
            },
            BatchItem {
                id: "c".to_string(),
                email: ParsedEmail::default(),
                intel: Some(ThreatIntelReport::default()),
            },
        ];

        let results = pipeline.score_batch(batch).await;
        let ids: Vec<&str> = results.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(results[0].status(), SubmissionStatus::Classified);
        assert_eq!(results[1].status(), SubmissionStatus::Failed);
        assert_eq!(results[2].bundle().unwrap().threat_intel_score, Some(0.0));
    }
}
