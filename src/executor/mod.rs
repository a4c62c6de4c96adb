//! Job execution strategies.
//!
//! An executor starts work for a job and reports its status when polled. It
//! never writes to the job store: the orchestrator turns every report into a
//! store update and a client event.

pub mod simulated;
pub mod workflow;

use async_trait::async_trait;
use chatops_common::{Action, Job, JobStatus};
use serde::Serialize;

use crate::errors::ExecutorError;

pub use simulated::SimulatedExecutor;
pub use workflow::{GitHubWorkflowClient, WorkflowApi, WorkflowExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    Simulated,
    Workflow,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Workflow => "workflow",
        }
    }
}

impl std::fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the orchestrator keeps per dispatched job.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionHandle {
    pub job_id: String,
    pub action: Action,
    pub kind: ExecutorKind,
    /// Remote run id, once known.
    pub external_id: Option<String>,
    /// Status the job is in right after `start` returns.
    pub initial_status: JobStatus,
    /// Output lines produced while starting.
    pub output: Vec<String>,
}

/// One observation of a job's execution.
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub status: JobStatus,
    /// Output lines that belong to reaching `status`.
    pub output: Vec<String>,
    pub error: Option<String>,
    /// Set when the poll discovered the remote run id.
    pub external_id: Option<String>,
}

impl PollReport {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            output: Vec::new(),
            error: None,
            external_id: None,
        }
    }

    pub fn with_output(mut self, output: Vec<String>) -> Self {
        self.output = output;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    /// Begin execution. An error means nothing was started.
    async fn start(&self, job: &Job) -> Result<ExecutionHandle, ExecutorError>;

    async fn poll(&self, handle: &ExecutionHandle) -> Result<PollReport, ExecutorError>;

    fn is_terminal(&self, status: JobStatus) -> bool {
        status.is_terminal()
    }

    /// Rebuild a handle for a persisted, non-terminal job so it can be polled
    /// again. `None` when this executor can no longer track it.
    async fn resume(&self, job: &Job) -> Option<ExecutionHandle>;

    /// Drop per-job state once the job's final status is persisted. Until
    /// then `resume` keeps working, so a terminal report that could not be
    /// recorded can be fetched again.
    fn forget(&self, _job_id: &str) {}
}
