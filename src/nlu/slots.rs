//! Required-slot checks and the prompts used to fill missing slots.

use chatops_common::{Action, Environment, MAX_REPLICAS, ParsedIntent, Slot};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Valid,
    /// Missing slots, in the order they should be asked for.
    Missing(Vec<Slot>),
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Slots an action needs before it can run.
pub fn required_slots(action: Action) -> &'static [Slot] {
    match action {
        Action::Deploy => &[Slot::Service, Slot::Environment],
        Action::Scale => &[Slot::Service, Slot::Replicas],
        Action::Rollback | Action::Restart | Action::Logs | Action::Status => &[Slot::Service],
        Action::Unknown => &[Slot::Action],
    }
}

pub fn validate(intent: &ParsedIntent) -> Validation {
    let missing: Vec<Slot> = required_slots(intent.action)
        .iter()
        .copied()
        .filter(|slot| !is_filled(intent, *slot))
        .collect();
    if missing.is_empty() {
        Validation::Valid
    } else {
        Validation::Missing(missing)
    }
}

fn is_filled(intent: &ParsedIntent, slot: Slot) -> bool {
    match slot {
        Slot::Action => intent.action.is_known(),
        Slot::Service => intent
            .service
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty()),
        Slot::Environment => intent.environment.is_some(),
        Slot::Replicas => intent.replicas.is_some_and(|n| n <= MAX_REPLICAS),
    }
}

/// A question for one missing slot, with suggested answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotPrompt {
    pub slot: Slot,
    pub question: String,
    pub choices: Vec<String>,
}

pub fn prompt_for(slot: Slot, known_services: &[String]) -> SlotPrompt {
    let (question, choices) = match slot {
        Slot::Action => (
            "What would you like to do?".to_string(),
            Action::KNOWN.iter().map(|a| a.as_str().to_string()).collect(),
        ),
        Slot::Service => (
            "Which service?".to_string(),
            known_services.to_vec(),
        ),
        Slot::Environment => (
            "Which environment?".to_string(),
            Environment::ALL.iter().map(|e| e.as_str().to_string()).collect(),
        ),
        Slot::Replicas => (
            format!("How many replicas (0-{})?", MAX_REPLICAS),
            Vec::new(),
        ),
    };
    SlotPrompt {
        slot,
        question,
        choices,
    }
}
