//! Typed error hierarchy for the chatops engine.
//!
//! Four top-level enums cover the four collaborators:
//! - `StoreError`: job store reads and writes
//! - `ClassifierError`: intent classifier calls
//! - `ExecutorError`: job dispatch and status reads
//! - `OrchestratorError`: request-level failures surfaced to the caller

use std::time::Duration;

use chatops_common::{JobStatus, TransitionError};
use thiserror::Error;

/// Errors from the persistent job store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Job {id} not found")]
    NotFound { id: String },

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("Database error: {0}")]
    Database(#[source] anyhow::Error),
}

/// Errors from the intent classifier. Never surfaced to callers: the parser
/// degrades to the rule-based result instead.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("Classifier request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Classifier request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Classifier API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected classifier response: {0}")]
    InvalidResponse(String),
}

/// Errors from an executor's start or poll call.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("GitHub API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Workflow run '{name}' not found after {attempts} attempts")]
    RunNotFound { name: String, attempts: u32 },

    #[error("No execution state for job {job_id}")]
    UnknownJob { job_id: String },

    #[error("Invalid executor response: {0}")]
    InvalidResponse(String),
}

/// Errors returned to the caller of an orchestrator operation.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Job {job_id} is {status}; only failed or cancelled jobs can be retried")]
    NotRetryable { job_id: String, status: JobStatus },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_not_found_carries_id() {
        let err = StoreError::NotFound { id: "abc".into() };
        match &err {
            StoreError::NotFound { id } => assert_eq!(id, "abc"),
            _ => panic!("Expected NotFound"),
        }
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn store_error_converts_from_transition_error() {
        let inner = TransitionError {
            from: JobStatus::Completed,
            to: JobStatus::Running,
        };
        let err: StoreError = inner.into();
        assert!(matches!(err, StoreError::InvalidTransition(_)));
        assert!(err.to_string().contains("completed"));
    }

    #[test]
    fn orchestrator_error_wraps_store_error() {
        let err: OrchestratorError = StoreError::NotFound { id: "j1".into() }.into();
        match &err {
            OrchestratorError::Store(StoreError::NotFound { id }) => assert_eq!(id, "j1"),
            _ => panic!("Expected Store(NotFound)"),
        }
    }

    #[test]
    fn executor_error_run_not_found_mentions_attempts() {
        let err = ExecutorError::RunNotFound {
            name: "chatops-deploy-1".into(),
            attempts: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("chatops-deploy-1"));
        assert!(msg.contains('5'));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StoreError::NotFound { id: "x".into() });
        assert_std_error(&ClassifierError::InvalidResponse("x".into()));
        assert_std_error(&ExecutorError::Timeout(Duration::from_secs(1)));
        assert_std_error(&OrchestratorError::NotRetryable {
            job_id: "x".into(),
            status: JobStatus::Running,
        });
    }
}
