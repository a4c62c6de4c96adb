//! Persistent job records.
//!
//! The orchestrator only ever talks to `dyn JobStore`; every lifecycle
//! change goes through `update_job_status`, which enforces forward-only
//! transitions.

pub mod db;

use async_trait::async_trait;
use chatops_common::{Job, JobFilter, JobStatus, JobUpdate, ParsedIntent};

use crate::errors::StoreError;

pub use db::SqliteJobStore;

/// Input for a new job. The store assigns id, status and timestamps.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: String,
    pub original_command: String,
    pub parsed_intent: ParsedIntent,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job in `queued`.
    async fn create_job(&self, new: NewJob) -> Result<Job, StoreError>;

    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError>;

    /// Move a job forward. Fails with `InvalidTransition` for backward moves
    /// and for any change to a terminal job.
    async fn update_job_status(
        &self,
        id: &str,
        status: JobStatus,
        update: JobUpdate,
    ) -> Result<Job, StoreError>;

    /// A user's jobs, newest first.
    async fn list_jobs(&self, user_id: &str, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;
}
