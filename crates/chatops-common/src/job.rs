use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::intent::{Action, ParsedIntent};

/// Lifecycle state of a job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Position in the lifecycle: queued < running < any terminal state.
    pub fn stage(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed | Self::Cancelled => 2,
        }
    }

    /// Whether a job in this state may be moved to `next`.
    ///
    /// Re-asserting a non-terminal state is allowed so output can be appended
    /// while a job is still running. Terminal states are final.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        *self == next || next.stage() > self.stage()
    }

    pub fn check_transition(&self, next: JobStatus) -> Result<(), TransitionError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(TransitionError {
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot move job from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// The persisted record of one command execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub user_id: String,
    pub original_command: String,
    pub parsed_intent: ParsedIntent,
    pub job_type: Action,
    pub status: JobStatus,
    pub output: Vec<String>,
    pub error_message: Option<String>,
    pub external_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Fields changed alongside a status update. Output is append-only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub append_output: Vec<String>,
    pub error_message: Option<String>,
    pub external_job_id: Option<String>,
}

impl JobUpdate {
    pub fn output(mut self, line: impl Into<String>) -> Self {
        self.append_output.push(line.into());
        self
    }

    pub fn outputs(mut self, lines: impl IntoIterator<Item = String>) -> Self {
        self.append_output.extend(lines);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn external_id(mut self, id: impl Into<String>) -> Self {
        self.external_job_id = Some(id.into());
        self
    }
}

/// Listing filter for a user's jobs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_roundtrip() {
        for s in &["queued", "running", "completed", "failed", "cancelled"] {
            let parsed: JobStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), *s);
        }
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Failed));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn test_backward_and_terminal_transitions_rejected() {
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Queued));
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for next in [
                JobStatus::Queued,
                JobStatus::Running,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
        let err = JobStatus::Completed
            .check_transition(JobStatus::Failed)
            .unwrap_err();
        assert!(err.to_string().contains("completed"));
    }

    #[test]
    fn test_job_update_builder() {
        let update = JobUpdate::default()
            .output("line 1")
            .outputs(vec!["line 2".to_string()])
            .error("boom")
            .external_id("42");
        assert_eq!(update.append_output, vec!["line 1", "line 2"]);
        assert_eq!(update.error_message.as_deref(), Some("boom"));
        assert_eq!(update.external_job_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_status_serde_is_snake_case() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }
}
