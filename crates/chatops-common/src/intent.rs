use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Upper bound (inclusive) for a requested replica count.
pub const MAX_REPLICAS: u32 = 100;

/// The fixed action vocabulary understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Deploy,
    Rollback,
    Scale,
    Restart,
    Logs,
    Status,
    Unknown,
}

impl Action {
    /// Every actionable variant, in rule-matching precedence order.
    pub const KNOWN: [Action; 6] = [
        Action::Rollback,
        Action::Scale,
        Action::Restart,
        Action::Logs,
        Action::Status,
        Action::Deploy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Rollback => "rollback",
            Self::Scale => "scale",
            Self::Restart => "restart",
            Self::Logs => "logs",
            Self::Status => "status",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_known(&self) -> bool {
        *self != Self::Unknown
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deploy" => Ok(Self::Deploy),
            "rollback" => Ok(Self::Rollback),
            "scale" => Ok(Self::Scale),
            "restart" => Ok(Self::Restart),
            "logs" => Ok(Self::Logs),
            "status" => Ok(Self::Status),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid action: {}", s)),
        }
    }
}

/// Canonical deployment environments. Aliases are accepted on input only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[serde(alias = "prod")]
    Production,
    #[serde(alias = "stage")]
    Staging,
    #[serde(alias = "dev")]
    Development,
    #[serde(alias = "testing")]
    Test,
    Qa,
    Uat,
}

impl Environment {
    pub const ALL: [Environment; 6] = [
        Environment::Production,
        Environment::Staging,
        Environment::Development,
        Environment::Test,
        Environment::Qa,
        Environment::Uat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Development => "development",
            Self::Test => "test",
            Self::Qa => "qa",
            Self::Uat => "uat",
        }
    }

    /// Words that normalize to this environment, canonical name included.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Production => &["prod", "production"],
            Self::Staging => &["stage", "staging"],
            Self::Development => &["dev", "development"],
            Self::Test => &["test", "testing"],
            Self::Qa => &["qa"],
            Self::Uat => &["uat"],
        }
    }

    /// Normalize a single word (any case) to its canonical environment.
    pub fn from_alias(word: &str) -> Option<Self> {
        let word = word.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|env| env.aliases().contains(&word.as_str()))
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_alias(s).ok_or_else(|| format!("Invalid environment: {}", s))
    }
}

/// Which parsing tier produced the final action.
///
/// Serialized as a plain tag: `regex`, `hf:<model>`, `regex-fallback` or
/// `regex-error-fallback`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum IntentSource {
    Regex,
    Classifier(String),
    RegexFallback,
    RegexErrorFallback,
}

impl fmt::Display for IntentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regex => f.write_str("regex"),
            Self::Classifier(model) => write!(f, "hf:{}", model),
            Self::RegexFallback => f.write_str("regex-fallback"),
            Self::RegexErrorFallback => f.write_str("regex-error-fallback"),
        }
    }
}

impl FromStr for IntentSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regex" => Ok(Self::Regex),
            "regex-fallback" => Ok(Self::RegexFallback),
            "regex-error-fallback" => Ok(Self::RegexErrorFallback),
            other => match other.strip_prefix("hf:") {
                Some(model) if !model.is_empty() => Ok(Self::Classifier(model.to_string())),
                _ => Err(format!("Invalid intent source: {}", s)),
            },
        }
    }
}

impl From<IntentSource> for String {
    fn from(source: IntentSource) -> Self {
        source.to_string()
    }
}

impl TryFrom<String> for IntentSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A required intent field that may need interactive fill-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Action,
    Service,
    Environment,
    Replicas,
}

impl Slot {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Service => "service",
            Self::Environment => "environment",
            Self::Replicas => "replicas",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied values that take precedence over parsed ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotOverrides {
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub environment: Option<Environment>,
    #[serde(default)]
    pub replicas: Option<u32>,
}

impl SlotOverrides {
    pub fn is_empty(&self) -> bool {
        self.service.is_none() && self.environment.is_none() && self.replicas.is_none()
    }
}

/// Structured interpretation of a free-text command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    pub action: Action,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub environment: Option<Environment>,
    #[serde(default)]
    pub replicas: Option<u32>,
    pub confidence: f32,
    pub source: IntentSource,
    /// Set only when the classifier tier failed and the rule result was kept.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier_error: Option<String>,
}

impl ParsedIntent {
    /// The result for input nothing could be made of.
    pub fn unknown() -> Self {
        Self {
            action: Action::Unknown,
            service: None,
            environment: None,
            replicas: None,
            confidence: 0.5,
            source: IntentSource::Regex,
            classifier_error: None,
        }
    }

    /// Apply caller overrides. An override always wins over a parsed value;
    /// blank service names are ignored.
    pub fn with_overrides(&self, overrides: &SlotOverrides) -> Self {
        let mut intent = self.clone();
        if let Some(service) = overrides.service.as_deref().map(str::trim)
            && !service.is_empty()
        {
            intent.service = Some(service.to_string());
        }
        if let Some(environment) = overrides.environment {
            intent.environment = Some(environment);
        }
        if let Some(replicas) = overrides.replicas {
            intent.replicas = Some(replicas);
        }
        intent
    }

    /// Short human-readable description, e.g. `scale api-service to 3 replicas`.
    pub fn summary(&self) -> String {
        let mut text = self.action.as_str().to_string();
        if let Some(service) = &self.service {
            text.push(' ');
            text.push_str(service);
        }
        if let Some(replicas) = self.replicas {
            text.push_str(&format!(" to {} replicas", replicas));
        }
        if let Some(environment) = self.environment {
            text.push_str(&format!(" in {}", environment));
        }
        text
    }
}
