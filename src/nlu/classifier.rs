//! Hugging Face inference client for action classification.
//!
//! Two request shapes are supported. Zero-shot models take every candidate
//! label in one call; plain NLI models are asked once per candidate with the
//! command as premise and a hypothesis sentence as pair, and the entailment
//! score is used.

use std::time::Duration;

use async_trait::async_trait;
use chatops_common::Action;
use futures_util::future::try_join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::NluConfig;
use crate::errors::ClassifierError;

/// Hypothesis sentence; `{}` is replaced by the action label.
pub const HYPOTHESIS_TEMPLATE: &str = "This request is to {} a service.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierStrategy {
    /// Inference API zero-shot pipeline (`candidate_labels`)
    ZeroShot,
    /// Pairwise premise/hypothesis entailment
    Nli,
}

impl ClassifierStrategy {
    /// Infer the request shape from the model id.
    pub fn for_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.contains("zero-shot")
            || model.contains("zeroshot")
            || model.contains("bart-large-mnli")
        {
            Self::ZeroShot
        } else if model.contains("nli") {
            Self::Nli
        } else {
            Self::ZeroShot
        }
    }
}

/// Ranks candidate actions for a command.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn model(&self) -> &str;

    /// Scores for each candidate, highest first.
    async fn classify(
        &self,
        text: &str,
        candidates: &[Action],
    ) -> Result<Vec<(Action, f32)>, ClassifierError>;
}

/// Verb phrase slotted into the hypothesis for each action.
pub fn action_label(action: Action) -> &'static str {
    match action {
        Action::Deploy => "deploy",
        Action::Rollback => "roll back",
        Action::Scale => "scale",
        Action::Restart => "restart",
        Action::Logs => "view the logs of",
        Action::Status => "check the status of",
        Action::Unknown => "do something with",
    }
}

pub fn hypothesis(action: Action) -> String {
    HYPOTHESIS_TEMPLATE.replace("{}", action_label(action))
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ZeroShotResponse {
    Pipeline { labels: Vec<String>, scores: Vec<f32> },
    Pairs(Vec<LabelScore>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NliResponse {
    Nested(Vec<Vec<LabelScore>>),
    Flat(Vec<LabelScore>),
}

/// Hosted inference API classifier.
pub struct HuggingFaceClassifier {
    client: Client,
    api_url: String,
    model: String,
    token: String,
    strategy: ClassifierStrategy,
    timeout: Duration,
}

impl HuggingFaceClassifier {
    pub fn new(
        api_url: impl Into<String>,
        model: impl Into<String>,
        token: impl Into<String>,
        strategy: ClassifierStrategy,
        timeout: Duration,
    ) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .user_agent(concat!("chatops/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            token: token.into(),
            strategy,
            timeout,
        })
    }

    /// Build from config. Returns `None` when no API token is configured.
    pub fn from_config(
        config: &NluConfig,
        timeout: Duration,
    ) -> Result<Option<Self>, ClassifierError> {
        let Some(token) = config.api_token.clone() else {
            return Ok(None);
        };
        let strategy = config
            .strategy
            .unwrap_or_else(|| ClassifierStrategy::for_model(&config.model));
        Self::new(&config.api_url, &config.model, token, strategy, timeout).map(Some)
    }

    pub fn strategy(&self) -> ClassifierStrategy {
        self.strategy
    }

    async fn post(&self, body: serde_json::Value) -> Result<String, ClassifierError> {
        let url = format!("{}/{}", self.api_url, self.model);
        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(&body)
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ClassifierError::Timeout(self.timeout))??;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClassifierError::Api {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }

    async fn classify_zero_shot(
        &self,
        text: &str,
        candidates: &[Action],
    ) -> Result<Vec<(Action, f32)>, ClassifierError> {
        let labels: Vec<&str> = candidates.iter().map(|a| action_label(*a)).collect();
        let body = json!({
            "inputs": text,
            "parameters": {
                "candidate_labels": labels,
                "hypothesis_template": HYPOTHESIS_TEMPLATE,
                "multi_label": false,
            },
            "options": { "wait_for_model": true },
        });
        let raw = self.post(body).await?;
        parse_zero_shot(&raw, candidates)
    }

    async fn classify_nli(
        &self,
        text: &str,
        candidates: &[Action],
    ) -> Result<Vec<(Action, f32)>, ClassifierError> {
        let calls = candidates.iter().map(|action| async move {
            let body = json!({
                "inputs": { "text": text, "text_pair": hypothesis(*action) },
                "options": { "wait_for_model": true },
            });
            let raw = self.post(body).await?;
            Ok::<_, ClassifierError>((*action, parse_entailment(&raw)?))
        });
        let mut scores = try_join_all(calls).await?;
        sort_ranked(&mut scores);
        Ok(scores)
    }
}

#[async_trait]
impl Classifier for HuggingFaceClassifier {
    fn model(&self) -> &str {
        &self.model
    }

    async fn classify(
        &self,
        text: &str,
        candidates: &[Action],
    ) -> Result<Vec<(Action, f32)>, ClassifierError> {
        match self.strategy {
            ClassifierStrategy::ZeroShot => self.classify_zero_shot(text, candidates).await,
            ClassifierStrategy::Nli => self.classify_nli(text, candidates).await,
        }
    }
}

fn sort_ranked(scores: &mut [(Action, f32)]) {
    scores.sort_by(|a, b| b.1.total_cmp(&a.1));
}

fn label_to_action(label: &str, candidates: &[Action]) -> Option<Action> {
    candidates
        .iter()
        .copied()
        .find(|a| action_label(*a).eq_ignore_ascii_case(label) || a.as_str() == label)
}

fn parse_zero_shot(raw: &str, candidates: &[Action]) -> Result<Vec<(Action, f32)>, ClassifierError> {
    let response: ZeroShotResponse = serde_json::from_str(raw)
        .map_err(|e| ClassifierError::InvalidResponse(format!("{}: {}", e, truncate(raw))))?;
    let pairs: Vec<(String, f32)> = match response {
        ZeroShotResponse::Pipeline { labels, scores } => {
            if labels.len() != scores.len() {
                return Err(ClassifierError::InvalidResponse(format!(
                    "{} labels but {} scores",
                    labels.len(),
                    scores.len()
                )));
            }
            labels.into_iter().zip(scores).collect()
        }
        ZeroShotResponse::Pairs(pairs) => pairs.into_iter().map(|p| (p.label, p.score)).collect(),
    };

    let mut ranked: Vec<(Action, f32)> = pairs
        .into_iter()
        .filter_map(|(label, score)| label_to_action(&label, candidates).map(|a| (a, score)))
        .collect();
    if ranked.is_empty() {
        return Err(ClassifierError::InvalidResponse(
            "no candidate labels in response".into(),
        ));
    }
    sort_ranked(&mut ranked);
    Ok(ranked)
}

fn parse_entailment(raw: &str) -> Result<f32, ClassifierError> {
    let response: NliResponse = serde_json::from_str(raw)
        .map_err(|e| ClassifierError::InvalidResponse(format!("{}: {}", e, truncate(raw))))?;
    let scores = match response {
        NliResponse::Nested(mut outer) => {
            if outer.is_empty() {
                Vec::new()
            } else {
                outer.swap_remove(0)
            }
        }
        NliResponse::Flat(scores) => scores,
    };
    Ok(scores
        .iter()
        .find(|s| s.label.eq_ignore_ascii_case("entailment"))
        .map(|s| s.score)
        .unwrap_or(0.0))
}

fn truncate(raw: &str) -> &str {
    match raw.char_indices().nth(200) {
        Some((idx, _)) => &raw[..idx],
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_for_model() {
        assert_eq!(
            ClassifierStrategy::for_model("facebook/bart-large-mnli"),
            ClassifierStrategy::ZeroShot
        );
        assert_eq!(
            ClassifierStrategy::for_model("MoritzLaurer/deberta-v3-base-zeroshot-v2.0"),
            ClassifierStrategy::ZeroShot
        );
        assert_eq!(
            ClassifierStrategy::for_model("cross-encoder/nli-deberta-v3-small"),
            ClassifierStrategy::Nli
        );
        assert_eq!(
            ClassifierStrategy::for_model("some/other-model"),
            ClassifierStrategy::ZeroShot
        );
    }

    #[test]
    fn test_hypothesis_uses_label() {
        assert_eq!(hypothesis(Action::Rollback), "This request is to roll back a service.");
    }

    #[test]
    fn test_parse_zero_shot_pipeline_shape() {
        let raw = r#"{"sequence":"deploy it","labels":["deploy","scale","roll back"],"scores":[0.1,0.7,0.2]}"#;
        let ranked = parse_zero_shot(raw, &Action::KNOWN).unwrap();
        assert_eq!(ranked[0], (Action::Scale, 0.7));
        assert_eq!(ranked[1].0, Action::Rollback);
        assert_eq!(ranked.len(), 3);
    }

    #[test]
    fn test_parse_zero_shot_pairs_shape() {
        let raw = r#"[{"label":"restart","score":0.9},{"label":"view the logs of","score":0.05}]"#;
        let ranked = parse_zero_shot(raw, &Action::KNOWN).unwrap();
        assert_eq!(ranked[0], (Action::Restart, 0.9));
        assert_eq!(ranked[1].0, Action::Logs);
    }

    #[test]
    fn test_parse_zero_shot_rejects_mismatched_lengths() {
        let raw = r#"{"labels":["deploy"],"scores":[0.1,0.2]}"#;
        assert!(matches!(
            parse_zero_shot(raw, &Action::KNOWN),
            Err(ClassifierError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_zero_shot_rejects_garbage() {
        let err = parse_zero_shot(r#"{"error":"Model is loading"}"#, &Action::KNOWN).unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_entailment_shapes() {
        let flat = r#"[{"label":"CONTRADICTION","score":0.1},{"label":"ENTAILMENT","score":0.85}]"#;
        assert_eq!(parse_entailment(flat).unwrap(), 0.85);
        let nested = r#"[[{"label":"entailment","score":0.4},{"label":"neutral","score":0.6}]]"#;
        assert_eq!(parse_entailment(nested).unwrap(), 0.4);
        let missing = r#"[{"label":"neutral","score":1.0}]"#;
        assert_eq!(parse_entailment(missing).unwrap(), 0.0);
    }

    #[test]
    fn test_from_config_without_token_is_none() {
        let config = NluConfig::default();
        let classifier = HuggingFaceClassifier::from_config(&config, Duration::from_secs(1)).unwrap();
        assert!(classifier.is_none());
    }

    #[test]
    fn test_from_config_honours_strategy_override() {
        let config = NluConfig {
            api_token: Some("hf_test".into()),
            strategy: Some(ClassifierStrategy::Nli),
            ..Default::default()
        };
        let classifier = HuggingFaceClassifier::from_config(&config, Duration::from_secs(1))
            .unwrap()
            .unwrap();
        assert_eq!(classifier.strategy(), ClassifierStrategy::Nli);
        assert_eq!(classifier.model(), "facebook/bart-large-mnli");
    }
}
