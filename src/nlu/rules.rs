//! Rule-based intent extraction.
//!
//! This pass always runs: it is the baseline result, and the fallback
//! whenever the classifier is disabled, unsure or unreachable.

use std::sync::LazyLock;

use chatops_common::{Action, Environment, IntentSource, MAX_REPLICAS, ParsedIntent};
use regex::Regex;

/// Confidence assigned to a rule-based match of a known action.
pub const RULE_CONFIDENCE: f32 = 0.8;

/// Keyword groups in precedence order; the first group with a hit wins.
const ACTION_KEYWORDS: [(Action, &[&str]); 6] = [
    (
        Action::Rollback,
        &["rollback", "roll back", "revert", "undo", "downgrade"],
    ),
    (Action::Scale, &["scale", "spin up", "resize", "autoscale"]),
    (
        Action::Restart,
        &["restart", "reboot", "bounce", "recycle", "reload"],
    ),
    (Action::Logs, &["logs", "log", "tail"]),
    (Action::Status, &["status", "health", "check", "state"]),
    (
        Action::Deploy,
        &["deploy", "release", "ship", "rollout", "roll out", "push"],
    ),
];

/// Words that are never taken as a service name.
const STOPWORDS: &[&str] = &[
    "a", "all", "an", "and", "app", "are", "at", "back", "be", "can", "could", "current", "do",
    "does", "down", "env", "environment", "for", "from", "get", "give", "how", "i", "in", "is",
    "it", "its", "last", "latest", "let", "lets", "like", "me", "my", "need", "now", "of", "on",
    "out", "please", "pod", "pods", "previous", "recent", "replica", "replicas", "roll", "run",
    "service", "services", "should", "show", "some", "spin", "that", "the", "this", "to", "up",
    "version", "want", "what", "whats", "with", "would", "you",
];

// Replica patterns, in priority order.
static REPLICAS_EXPLICIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\bto|=)\s*(\d+)\s*(?:replicas?|pods?)\b").expect("valid replicas regex")
});
// The count must stand alone, so digits inside a name like `worker-2` are skipped.
static REPLICAS_SCALE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bscale\b.*?\s(\d+)\b").expect("valid scale regex"));
static REPLICAS_SPIN_UP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:spin|scale)\s+up\s+(\d+)\b").expect("valid spin-up regex")
});

/// Deterministic keyword/pattern parser.
#[derive(Debug, Clone)]
pub struct RuleParser {
    /// Known service names, lowercased, longest first.
    lexicon: Vec<String>,
}

impl RuleParser {
    pub fn new<I, S>(known_services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut lexicon: Vec<String> = known_services
            .into_iter()
            .map(|s| s.as_ref().trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        lexicon.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        lexicon.dedup();
        Self { lexicon }
    }

    pub fn known_services(&self) -> &[String] {
        &self.lexicon
    }

    pub fn parse(&self, command: &str) -> ParsedIntent {
        let lowered = command.to_lowercase();
        let tokens = tokenize(&lowered);
        if tokens.is_empty() {
            return ParsedIntent::unknown();
        }

        let action = classify_action(&tokens);
        let confidence = if action.is_known() {
            RULE_CONFIDENCE
        } else {
            ParsedIntent::unknown().confidence
        };

        ParsedIntent {
            action,
            service: self.extract_service(&tokens),
            environment: extract_environment(&tokens),
            replicas: extract_replicas(&lowered),
            confidence,
            source: IntentSource::Regex,
            classifier_error: None,
        }
    }

    fn extract_service(&self, tokens: &[String]) -> Option<String> {
        // "<name> service"
        if let Some(name) = tokens
            .windows(2)
            .find(|pair| pair[1] == "service" && is_candidate(&pair[0]))
            .map(|pair| pair[0].clone())
        {
            return Some(name);
        }

        if let Some(known) = self
            .lexicon
            .iter()
            .find(|known| tokens.iter().any(|t| t == *known))
        {
            return Some(known.clone());
        }

        tokens.iter().find(|t| is_candidate(t)).cloned()
    }
}

/// Split on anything that cannot be part of a service identifier.
fn tokenize(lowered: &str) -> Vec<String> {
    lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '_'))
        .map(|t| t.trim_matches(|c| c == '-' || c == '_'))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn contains_keyword(tokens: &[String], padded: &str, keyword: &str) -> bool {
    if keyword.contains(' ') {
        padded.contains(&format!(" {} ", keyword))
    } else {
        tokens.iter().any(|t| t == keyword)
    }
}

fn classify_action(tokens: &[String]) -> Action {
    let padded = format!(" {} ", tokens.join(" "));
    ACTION_KEYWORDS
        .iter()
        .find(|(_, keywords)| {
            keywords
                .iter()
                .any(|keyword| contains_keyword(tokens, &padded, keyword))
        })
        .map(|(action, _)| *action)
        .unwrap_or(Action::Unknown)
}

fn extract_environment(tokens: &[String]) -> Option<Environment> {
    Environment::ALL.into_iter().find(|env| {
        env.aliases()
            .iter()
            .any(|alias| tokens.iter().any(|t| t == alias))
    })
}

fn extract_replicas(lowered: &str) -> Option<u32> {
    let captured = [&*REPLICAS_EXPLICIT, &*REPLICAS_SCALE, &*REPLICAS_SPIN_UP]
        .iter()
        .find_map(|re| re.captures(lowered))?;
    // The first matching pattern decides; an out-of-range value is dropped, not clamped.
    captured[1]
        .parse::<u64>()
        .ok()
        .filter(|n| *n <= MAX_REPLICAS as u64)
        .map(|n| n as u32)
}

fn is_action_keyword(token: &str) -> bool {
    ACTION_KEYWORDS
        .iter()
        .flat_map(|(_, keywords)| keywords.iter())
        .any(|keyword| *keyword == token)
}

fn is_candidate(token: &str) -> bool {
    token.len() >= 2
        && token.starts_with(|c: char| c.is_alphabetic())
        && !STOPWORDS.contains(&token)
        && !is_action_keyword(token)
        && Environment::from_alias(token).is_none()
}
