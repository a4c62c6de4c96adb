//! Client messaging protocol.
//!
//! Every message is a JSON envelope `{"type": "<camelCaseName>", "data": {...}}`.

use chatops_common::{Job, ParsedIntent, Slot, SlotOverrides};
use serde::{Deserialize, Serialize};

use crate::nlu::SlotPrompt;

/// A command submission, from either the HTTP API or a socket session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    /// Socket sessions may omit this; the session's user is used instead.
    #[serde(default, alias = "userId")]
    pub user_id: String,
    #[serde(default, alias = "enableNLU", alias = "enableNlu")]
    pub enable_nlu: Option<bool>,
    #[serde(default, alias = "confidenceThreshold")]
    pub confidence_threshold: Option<f32>,
    #[serde(default, alias = "slotOverrides")]
    pub slot_overrides: SlotOverrides,
    #[serde(default, alias = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Client → orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    SendCommand(CommandRequest),
    RefreshJob {
        #[serde(alias = "jobId")]
        job_id: String,
    },
    RetryJob {
        #[serde(alias = "jobId")]
        job_id: String,
    },
}

/// Orchestrator → client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    TypingStarted,
    ResponseAdded {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parsed_intent: Option<ParsedIntent>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        missing: Vec<Slot>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        prompt: Option<SlotPrompt>,
    },
    StatusUpdated {
        job: Job,
    },
    LoadingStateChanged {
        loading: bool,
    },
    BusyRejected {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_job_id: Option<String>,
    },
    PollingFailed {
        job_id: String,
        attempts: u32,
        error: String,
    },
}

impl ClientEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::ResponseAdded {
            text: text.into(),
            job_id: None,
            parsed_intent: None,
            missing: Vec::new(),
            prompt: None,
        }
    }

    pub fn job_text(job_id: &str, text: impl Into<String>) -> Self {
        Self::ResponseAdded {
            text: text.into(),
            job_id: Some(job_id.to_string()),
            parsed_intent: None,
            missing: Vec::new(),
            prompt: None,
        }
    }

    /// The envelope's `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TypingStarted => "typingStarted",
            Self::ResponseAdded { .. } => "responseAdded",
            Self::StatusUpdated { .. } => "statusUpdated",
            Self::LoadingStateChanged { .. } => "loadingStateChanged",
            Self::BusyRejected { .. } => "busyRejected",
            Self::PollingFailed { .. } => "pollingFailed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatops_common::Environment;

    #[test]
    fn test_send_command_envelope() {
        let raw = r#"{"type":"sendCommand","data":{"command":"deploy frontend","userId":"u1","enableNLU":false,"slotOverrides":{"environment":"prod"}}}"#;
        let parsed: ClientCommand = serde_json::from_str(raw).unwrap();
        match parsed {
            ClientCommand::SendCommand(request) => {
                assert_eq!(request.command, "deploy frontend");
                assert_eq!(request.user_id, "u1");
                assert_eq!(request.enable_nlu, Some(false));
                assert_eq!(
                    request.slot_overrides.environment,
                    Some(Environment::Production)
                );
            }
            other => panic!("Expected SendCommand, got {other:?}"),
        }
    }

    #[test]
    fn test_refresh_accepts_camel_case_id() {
        let parsed: ClientCommand =
            serde_json::from_str(r#"{"type":"refreshJob","data":{"jobId":"j1"}}"#).unwrap();
        assert_eq!(
            parsed,
            ClientCommand::RefreshJob {
                job_id: "j1".into()
            }
        );
    }

    #[test]
    fn test_event_envelope_shape() {
        let json = serde_json::to_value(ClientEvent::LoadingStateChanged { loading: true }).unwrap();
        assert_eq!(json["type"], "loadingStateChanged");
        assert_eq!(json["data"]["loading"], true);

        let json = serde_json::to_value(ClientEvent::PollingFailed {
            job_id: "j1".into(),
            attempts: 60,
            error: "gave up".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "pollingFailed");
        assert_eq!(json["data"]["attempts"], 60);
    }

    #[test]
    fn test_kind_matches_serialized_tag() {
        for event in [
            ClientEvent::TypingStarted,
            ClientEvent::text("hi"),
            ClientEvent::LoadingStateChanged { loading: false },
            ClientEvent::BusyRejected {
                message: "busy".into(),
                active_job_id: None,
            },
        ] {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["type"], event.kind());
        }
    }

    #[test]
    fn test_status_update_survives_the_wire() {
        let now = chrono::Utc::now();
        let job = Job {
            id: "j1".into(),
            user_id: "alice".into(),
            original_command: "restart worker".into(),
            parsed_intent: ParsedIntent::unknown(),
            job_type: chatops_common::Action::Unknown,
            status: chatops_common::JobStatus::Running,
            output: vec!["Restarting pods".into()],
            error_message: None,
            external_job_id: Some("4242".into()),
            created_at: now,
            updated_at: now,
            started_at: Some(now),
            completed_at: None,
        };
        let event = ClientEvent::StatusUpdated { job: job.clone() };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(serde_json::from_str::<ClientEvent>(&json).unwrap(), event);

        let mut finished = job;
        finished.status = chatops_common::JobStatus::Completed;
        assert_ne!(ClientEvent::StatusUpdated { job: finished }, event);
    }

    #[test]
    fn test_unknown_command_type_is_rejected() {
        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"dance","data":{}}"#).is_err());
    }
}
