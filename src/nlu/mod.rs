//! Free-text command interpretation.
//!
//! `IntentParser::parse` never fails. The rule pass always runs; the
//! classifier, when configured and requested, may replace its action if it is
//! confident enough.

pub mod classifier;
pub mod rules;
pub mod slots;

use std::sync::Arc;
use std::time::Duration;

use chatops_common::{Action, IntentSource, ParsedIntent};
use tracing::{debug, info, warn};

use crate::config::NluConfig;
use crate::errors::ClassifierError;

pub use classifier::{Classifier, ClassifierStrategy, HuggingFaceClassifier};
pub use rules::RuleParser;
pub use slots::{SlotPrompt, Validation, prompt_for, validate};

/// Per-request parser settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParseOptions {
    pub use_classifier: bool,
    pub confidence_threshold: f32,
}

impl ParseOptions {
    pub fn rules_only() -> Self {
        Self {
            use_classifier: false,
            confidence_threshold: 1.0,
        }
    }
}

impl From<&NluConfig> for ParseOptions {
    fn from(config: &NluConfig) -> Self {
        Self {
            use_classifier: config.enabled,
            confidence_threshold: config.confidence_threshold,
        }
    }
}

/// Tiered parser: rules first, classifier second.
#[derive(Clone)]
pub struct IntentParser {
    rules: RuleParser,
    classifier: Option<Arc<dyn Classifier>>,
}

impl IntentParser {
    pub fn new(rules: RuleParser, classifier: Option<Arc<dyn Classifier>>) -> Self {
        Self { rules, classifier }
    }

    pub fn rules_only(rules: RuleParser) -> Self {
        Self::new(rules, None)
    }

    /// Rules from the configured service list, plus the hosted classifier
    /// when an API token is available.
    pub fn from_config(config: &NluConfig, timeout: Duration) -> Result<Self, ClassifierError> {
        let rules = RuleParser::new(config.known_services.iter());
        let classifier = HuggingFaceClassifier::from_config(config, timeout)?
            .map(|c| Arc::new(c) as Arc<dyn Classifier>);
        if classifier.is_none() && config.enabled {
            info!("No HF_API_TOKEN set, using rule-based parsing only");
        }
        Ok(Self::new(rules, classifier))
    }

    pub fn rules(&self) -> &RuleParser {
        &self.rules
    }

    pub fn has_classifier(&self) -> bool {
        self.classifier.is_some()
    }

    pub async fn parse(&self, command: &str, options: &ParseOptions) -> ParsedIntent {
        let rule_intent = self.rules.parse(command);
        let classifier = match &self.classifier {
            Some(classifier) if options.use_classifier && !command.trim().is_empty() => classifier,
            _ => return rule_intent,
        };

        let outcome = classifier.classify(command, &Action::KNOWN).await;
        merge_classification(
            rule_intent,
            outcome,
            options.confidence_threshold,
            classifier.model(),
        )
    }
}

/// Combine the rule result with a classifier outcome.
///
/// Only the action and confidence can come from the classifier; slots always
/// come from the rule pass.
pub fn merge_classification(
    rule_intent: ParsedIntent,
    outcome: Result<Vec<(Action, f32)>, ClassifierError>,
    threshold: f32,
    model: &str,
) -> ParsedIntent {
    match outcome {
        Ok(ranked) => {
            let top = ranked
                .into_iter()
                .filter(|(action, _)| action.is_known())
                .max_by(|a, b| a.1.total_cmp(&b.1));
            match top {
                Some((action, score)) if score >= threshold => {
                    debug!(model, %action, score, "classifier accepted");
                    ParsedIntent {
                        action,
                        confidence: score.clamp(0.0, 1.0),
                        source: IntentSource::Classifier(model.to_string()),
                        ..rule_intent
                    }
                }
                top => {
                    debug!(model, ?top, threshold, "classifier below threshold, keeping rule result");
                    ParsedIntent {
                        source: IntentSource::RegexFallback,
                        ..rule_intent
                    }
                }
            }
        }
        Err(e) => {
            warn!(model, error = %e, "classifier failed, keeping rule result");
            ParsedIntent {
                source: IntentSource::RegexErrorFallback,
                classifier_error: Some(e.to_string()),
                ..rule_intent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatops_common::Environment;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedClassifier {
        result: Result<Vec<(Action, f32)>, u16>,
        calls: AtomicUsize,
    }

    impl FixedClassifier {
        fn ok(ranked: Vec<(Action, f32)>) -> Arc<Self> {
            Arc::new(Self {
                result: Ok(ranked),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing(status: u16) -> Arc<Self> {
            Arc::new(Self {
                result: Err(status),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Classifier for FixedClassifier {
        fn model(&self) -> &str {
            "test/model"
        }

        async fn classify(
            &self,
            _text: &str,
            _candidates: &[Action],
        ) -> Result<Vec<(Action, f32)>, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.result {
                Ok(ranked) => Ok(ranked.clone()),
                Err(status) => Err(ClassifierError::Api {
                    status: *status,
                    body: "model overloaded".into(),
                }),
            }
        }
    }

    fn rules() -> RuleParser {
        RuleParser::new(["frontend", "api-service"])
    }

    fn with_classifier(options_threshold: f32) -> ParseOptions {
        ParseOptions {
            use_classifier: true,
            confidence_threshold: options_threshold,
        }
    }

    #[tokio::test]
    async fn test_rules_only_when_no_classifier() {
        let parser = IntentParser::rules_only(rules());
        let intent = parser
            .parse("deploy frontend to staging", &with_classifier(0.7))
            .await;
        assert_eq!(intent.action, Action::Deploy);
        assert_eq!(intent.source, IntentSource::Regex);
    }

    #[tokio::test]
    async fn test_confident_classifier_overrides_action() {
        let classifier = FixedClassifier::ok(vec![(Action::Restart, 0.92), (Action::Deploy, 0.05)]);
        let parser = IntentParser::new(rules(), Some(classifier.clone()));
        let intent = parser
            .parse("bounce-ish the frontend in prod", &with_classifier(0.7))
            .await;
        assert_eq!(intent.action, Action::Restart);
        assert_eq!(intent.confidence, 0.92);
        assert_eq!(intent.source, IntentSource::Classifier("test/model".into()));
        assert_eq!(intent.service.as_deref(), Some("frontend"));
        assert_eq!(intent.environment, Some(Environment::Production));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_falls_back_to_rules() {
        let classifier = FixedClassifier::ok(vec![(Action::Deploy, 0.55), (Action::Scale, 0.2)]);
        let parser = IntentParser::new(rules(), Some(classifier));
        let intent = parser
            .parse("scale api-service to 3 replicas", &with_classifier(0.7))
            .await;
        assert_eq!(intent.action, Action::Scale);
        assert_eq!(intent.replicas, Some(3));
        assert_eq!(intent.confidence, rules::RULE_CONFIDENCE);
        assert_eq!(intent.source, IntentSource::RegexFallback);
    }

    #[tokio::test]
    async fn test_classifier_error_keeps_rule_result() {
        let parser = IntentParser::new(rules(), Some(FixedClassifier::failing(503)));
        let intent = parser
            .parse("deploy frontend to staging", &with_classifier(0.7))
            .await;
        assert_eq!(intent.action, Action::Deploy);
        assert_eq!(intent.source, IntentSource::RegexErrorFallback);
        assert!(intent.classifier_error.unwrap().contains("503"));
    }

    #[tokio::test]
    async fn test_classifier_skipped_when_disabled() {
        let classifier = FixedClassifier::ok(vec![(Action::Restart, 0.99)]);
        let parser = IntentParser::new(rules(), Some(classifier.clone()));
        let intent = parser
            .parse("deploy frontend to staging", &ParseOptions::rules_only())
            .await;
        assert_eq!(intent.action, Action::Deploy);
        assert_eq!(intent.source, IntentSource::Regex);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_merge_ignores_unknown_label() {
        let merged = merge_classification(
            ParsedIntent::unknown(),
            Ok(vec![(Action::Unknown, 0.99)]),
            0.7,
            "m",
        );
        assert_eq!(merged.action, Action::Unknown);
        assert_eq!(merged.source, IntentSource::RegexFallback);
    }

    #[test]
    fn test_merge_accepts_score_at_threshold() {
        let merged = merge_classification(
            ParsedIntent::unknown(),
            Ok(vec![(Action::Logs, 0.7)]),
            0.7,
            "m",
        );
        assert_eq!(merged.action, Action::Logs);
        assert_eq!(merged.source, IntentSource::Classifier("m".into()));
    }
}
