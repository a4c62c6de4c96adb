//! The poll target that ties one job's executor reports to the store.

use std::sync::Mutex;

use async_trait::async_trait;
use chatops_common::{Job, JobStatus, JobUpdate};
use tracing::{debug, error, info, warn};

use super::{ClientEvent, Orchestrator, finished_message};
use crate::errors::{ExecutorError, StoreError};
use crate::executor::{ExecutionHandle, PollReport};
use crate::poller::{PollControl, PollTarget};

pub(super) struct JobPollTarget {
    orchestrator: Orchestrator,
    session_id: String,
    handle: Mutex<ExecutionHandle>,
    /// Status last written to the store by this chain.
    last_status: Mutex<JobStatus>,
}

impl JobPollTarget {
    pub(super) fn new(
        orchestrator: Orchestrator,
        session_id: &str,
        handle: ExecutionHandle,
        status: JobStatus,
    ) -> Self {
        Self {
            orchestrator,
            session_id: session_id.to_string(),
            handle: Mutex::new(handle),
            last_status: Mutex::new(status),
        }
    }

    fn handle(&self) -> ExecutionHandle {
        self.handle.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// A remote id the handle does not carry yet.
    fn discover(&self, external_id: Option<&String>) -> Option<String> {
        let id = external_id?;
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        (handle.external_id.as_ref() != Some(id)).then(|| id.clone())
    }

    /// Remember what the store accepted.
    fn recorded(&self, job: &Job) {
        *self.last_status.lock().unwrap_or_else(|e| e.into_inner()) = job.status;
        if job.external_job_id.is_some() {
            self.handle.lock().unwrap_or_else(|e| e.into_inner()).external_id =
                job.external_job_id.clone();
        }
    }

    fn last_status(&self) -> JobStatus {
        *self.last_status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PollTarget for JobPollTarget {
    type Report = PollReport;

    async fn fetch(&self) -> Result<PollReport, ExecutorError> {
        let handle = self.handle();
        self.orchestrator.inner.executor.poll(&handle).await
    }

    fn is_terminal(&self, report: &PollReport) -> bool {
        self.orchestrator.inner.executor.is_terminal(report.status)
    }

    async fn observe(&self, report: &PollReport) -> PollControl {
        let job_id = self.handle().job_id;
        let discovered = self.discover(report.external_id.as_ref());
        let last = self.last_status();

        if report.status.stage() < last.stage() {
            debug!(job_id, reported = %report.status, current = %last, "ignoring stale status");
            return PollControl::Continue;
        }
        // Output is recorded once per status change.
        if report.status == last && discovered.is_none() {
            return PollControl::Continue;
        }

        let mut update = JobUpdate::default().outputs(report.output.iter().cloned());
        if let Some(error) = &report.error {
            update = update.error(error.clone());
        }
        if let Some(id) = &discovered {
            update = update.external_id(id.clone());
        }

        let store = &self.orchestrator.inner.store;
        match store.update_job_status(&job_id, report.status, update).await {
            Ok(job) => {
                self.recorded(&job);
                if let Some(id) = discovered {
                    info!(job_id, external_id = %id, "remote run discovered");
                }
                debug!(job_id, status = %job.status, "job status updated");
                self.orchestrator.push_status(&self.session_id, &job);
                if job.is_terminal() {
                    info!(job_id, status = %job.status, "job finished");
                    self.orchestrator.emit(
                        &self.session_id,
                        ClientEvent::job_text(&job_id, finished_message(&job)),
                    );
                }
                PollControl::Continue
            }
            Err(StoreError::InvalidTransition(e)) => {
                warn!(job_id, error = %e, "job moved on without this chain");
                PollControl::Stop
            }
            Err(e) => {
                error!(job_id, status = %report.status, error = %e, "failed to record job status");
                PollControl::Retry(format!("could not record status {}: {}", report.status, e))
            }
        }
    }
}
