//! Job orchestration: parse → validate → persist → dispatch → poll → notify.
//!
//! The orchestrator is the only component that writes job state. Executors
//! report, the store enforces forward-only transitions, and every change is
//! pushed to the owning session as a `statusUpdated` event, filtered through
//! that session's ledger so a client never sees a job move backwards or
//! finish twice.
//!
//! Each dispatched job gets one tokio task that starts the executor and then
//! polls it. The task is registered in the active-poller map before it is
//! spawned, which keeps a job from ever having two chains.

pub mod events;
mod poll;
pub mod session;

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chatops_common::{Job, JobFilter, JobStatus, JobUpdate, ParsedIntent, Slot};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ChatopsConfig, ExecutorMode};
use crate::errors::{ExecutorError, OrchestratorError, StoreError};
use crate::executor::workflow::is_valid_github_token;
use crate::executor::{
    ExecutionHandle, Executor, ExecutorKind, GitHubWorkflowClient, SimulatedExecutor,
    WorkflowExecutor,
};
use crate::nlu::{IntentParser, ParseOptions, SlotPrompt, Validation, prompt_for, validate};
use crate::poller::{Clock, PollOutcome, Poller, PollerConfig, TokioClock};
use crate::store::{JobStore, NewJob};

pub use events::{ClientCommand, ClientEvent, CommandRequest};
pub use session::Busy;

const BUSY_MESSAGE: &str = "Still working on your previous command. Please wait for it to finish.";

/// Result of submitting a command (or retrying a job).
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Created(Job),
    MissingSlots {
        missing: Vec<Slot>,
        parsed_intent: ParsedIntent,
        prompt: SlotPrompt,
    },
    Unrecognized {
        parsed_intent: ParsedIntent,
    },
    Busy {
        active_job_id: Option<String>,
    },
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn Executor>,
    parser: IntentParser,
    poller: Poller,
    defaults: ParseOptions,
    arena: Mutex<session::Arena>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn Executor>,
        parser: IntentParser,
        poller: Poller,
        defaults: ParseOptions,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                executor,
                parser,
                poller,
                defaults,
                arena: Mutex::new(session::Arena::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Wire up parser, executor and poller from configuration. The executor
    /// strategy is chosen here, once.
    pub fn from_config(config: &ChatopsConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let timeout = config.executor.command_timeout();

        let parser = IntentParser::from_config(&config.nlu, timeout)?;

        let executor: Arc<dyn Executor> = match config.executor_mode() {
            ExecutorMode::Workflow => {
                if let Some(token) = &config.github.token
                    && !is_valid_github_token(token)
                {
                    warn!("GITHUB_TOKEN does not look like a GitHub token");
                }
                match GitHubWorkflowClient::from_config(&config.github, timeout)? {
                    Some(client) => Arc::new(WorkflowExecutor::new(Arc::new(client), &config.github)),
                    None => Arc::new(SimulatedExecutor::new(&config.simulation, clock.clone())),
                }
            }
            ExecutorMode::Simulated => {
                Arc::new(SimulatedExecutor::new(&config.simulation, clock.clone()))
            }
        };
        info!(executor = %executor.kind(), "executor selected");

        let poller = Poller::new(PollerConfig::from(&config.poller), clock);
        Ok(Self::new(
            store,
            executor,
            parser,
            poller,
            ParseOptions::from(&config.nlu),
        ))
    }

    pub fn executor_kind(&self) -> ExecutorKind {
        self.inner.executor.kind()
    }

    pub fn parser(&self) -> &IntentParser {
        &self.inner.parser
    }

    // ── Sessions ────────────────────────────────────────────────────────

    /// Attach an event sink for a session.
    pub fn open_session(&self, session_id: &str) -> mpsc::UnboundedReceiver<ClientEvent> {
        debug!(session_id, "session opened");
        self.arena().open(session_id)
    }

    /// Forget a session: cancel its poll chains and drop its busy lock.
    /// Work already dispatched keeps running remotely.
    pub fn close_session(&self, session_id: &str) {
        let cancelled = self.arena().close(session_id);
        info!(session_id, cancelled_pollers = cancelled, "session closed");
    }

    /// Id of the job holding the session's busy lock, if any.
    pub fn active_job(&self, session_id: &str) -> Option<String> {
        self.arena()
            .busy(session_id)
            .and_then(|b| b.job_id())
            .map(str::to_string)
    }

    pub fn is_busy(&self, session_id: &str) -> bool {
        self.arena().busy(session_id).is_some()
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        self.arena().is_polling(job_id)
    }

    /// Send a plain chat line to a session.
    pub fn notify(&self, session_id: &str, text: impl Into<String>) {
        self.emit(session_id, ClientEvent::text(text));
    }

    /// Cancel every poll chain. Used on server shutdown.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let cancelled = self.arena().cancel_all();
        info!(cancelled_pollers = cancelled, "orchestrator shut down");
    }

    // ── Commands ────────────────────────────────────────────────────────

    pub async fn submit(
        &self,
        session_id: &str,
        request: CommandRequest,
    ) -> Result<SubmitOutcome, OrchestratorError> {
        if let Err(outcome) = self.begin(session_id) {
            return Ok(outcome);
        }

        let options = ParseOptions {
            use_classifier: request
                .enable_nlu
                .unwrap_or(self.inner.defaults.use_classifier),
            confidence_threshold: request
                .confidence_threshold
                .map(|t| t.clamp(0.0, 1.0))
                .unwrap_or(self.inner.defaults.confidence_threshold),
        };
        let intent = self
            .inner
            .parser
            .parse(&request.command, &options)
            .await
            .with_overrides(&request.slot_overrides);
        debug!(
            session_id,
            action = %intent.action,
            source = %intent.source,
            confidence = intent.confidence,
            "command parsed"
        );

        if let Validation::Missing(missing) = validate(&intent) {
            self.release_busy(session_id, &Busy::Submitting);
            return Ok(match missing.first() {
                Some(&slot) if slot != Slot::Action => {
                    let prompt = prompt_for(slot, self.inner.parser.rules().known_services());
                    self.emit(
                        session_id,
                        ClientEvent::ResponseAdded {
                            text: prompt.question.clone(),
                            job_id: None,
                            parsed_intent: Some(intent.clone()),
                            missing: missing.clone(),
                            prompt: Some(prompt.clone()),
                        },
                    );
                    SubmitOutcome::MissingSlots {
                        missing,
                        parsed_intent: intent,
                        prompt,
                    }
                }
                _ => {
                    self.emit(
                        session_id,
                        ClientEvent::ResponseAdded {
                            text: format!(
                                "I couldn't tell what to do with \"{}\". Try deploy, rollback, scale, restart, logs or status.",
                                request.command.trim()
                            ),
                            job_id: None,
                            parsed_intent: Some(intent.clone()),
                            missing,
                            prompt: None,
                        },
                    );
                    SubmitOutcome::Unrecognized {
                        parsed_intent: intent,
                    }
                }
            });
        }

        let new = NewJob {
            user_id: request.user_id,
            original_command: request.command,
            parsed_intent: intent,
        };
        self.create_and_dispatch(session_id, new)
            .await
            .map(SubmitOutcome::Created)
    }

    /// Run a failed or cancelled job again as a new job with the same intent.
    pub async fn retry_job(
        &self,
        session_id: &str,
        job_id: &str,
    ) -> Result<SubmitOutcome, OrchestratorError> {
        let job = self.get_job(job_id).await?;
        if !matches!(job.status, JobStatus::Failed | JobStatus::Cancelled) {
            return Err(OrchestratorError::NotRetryable {
                job_id: job.id,
                status: job.status,
            });
        }
        if let Err(outcome) = self.begin(session_id) {
            return Ok(outcome);
        }

        info!(session_id, job_id, "retrying job");
        let new = NewJob {
            user_id: job.user_id,
            original_command: job.original_command,
            parsed_intent: job.parsed_intent,
        };
        self.create_and_dispatch(session_id, new)
            .await
            .map(SubmitOutcome::Created)
    }

    /// Push a job's current status and resume polling it if nothing is.
    pub async fn refresh_job(&self, session_id: &str, job_id: &str) -> Result<Job, OrchestratorError> {
        let job = self.get_job(job_id).await?;
        self.push_status(session_id, &job);

        if !job.is_terminal() && !self.is_polling(&job.id) {
            match self.inner.executor.resume(&job).await {
                Some(handle) => {
                    info!(session_id, job_id, "resuming status polling");
                    self.spawn_poll_chain(session_id, handle, job.status);
                }
                None => debug!(job_id, "executor can no longer track job"),
            }
        }
        Ok(job)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job, OrchestratorError> {
        self.inner
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound {
                    id: job_id.to_string(),
                }
                .into()
            })
    }

    pub async fn list_jobs(&self, user_id: &str, filter: &JobFilter) -> Result<Vec<Job>, OrchestratorError> {
        Ok(self.inner.store.list_jobs(user_id, filter).await?)
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn arena(&self) -> MutexGuard<'_, session::Arena> {
        self.inner.arena.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, session_id: &str, event: ClientEvent) {
        let sink = self.arena().sink(session_id);
        if let Some(sink) = sink
            && sink.send(event).is_err()
        {
            debug!(session_id, "event sink closed");
        }
    }

    /// Send `statusUpdated` unless the session's ledger says it is stale.
    fn push_status(&self, session_id: &str, job: &Job) {
        let sink = {
            let mut arena = self.arena();
            if !arena.record_status(session_id, &job.id, job.status) {
                return;
            }
            arena.sink(session_id)
        };
        if let Some(sink) = sink {
            let _ = sink.send(ClientEvent::StatusUpdated { job: job.clone() });
        }
    }

    /// Take the busy lock or produce the rejection.
    fn begin(&self, session_id: &str) -> Result<(), SubmitOutcome> {
        let acquired = self.arena().try_acquire(session_id);
        if let Err(holder) = acquired {
            let active_job_id = holder.job_id().map(str::to_string);
            info!(session_id, active_job_id = ?active_job_id, "command rejected, session busy");
            self.emit(
                session_id,
                ClientEvent::BusyRejected {
                    message: BUSY_MESSAGE.to_string(),
                    active_job_id: active_job_id.clone(),
                },
            );
            return Err(SubmitOutcome::Busy { active_job_id });
        }
        self.emit(session_id, ClientEvent::TypingStarted);
        self.emit(session_id, ClientEvent::LoadingStateChanged { loading: true });
        Ok(())
    }

    fn release_busy(&self, session_id: &str, holder: &Busy) {
        let released = self.arena().release(session_id, holder);
        if released {
            self.emit(session_id, ClientEvent::LoadingStateChanged { loading: false });
        }
    }

    async fn create_and_dispatch(&self, session_id: &str, new: NewJob) -> Result<Job, OrchestratorError> {
        let job = match self.inner.store.create_job(new).await {
            Ok(job) => job,
            Err(e) => {
                error!(session_id, error = %e, "failed to persist job");
                self.release_busy(session_id, &Busy::Submitting);
                self.emit(session_id, ClientEvent::text(format!("Could not save the job: {}", e)));
                return Err(e.into());
            }
        };

        self.arena().bind_job(session_id, &job.id);
        info!(
            session_id,
            job_id = %job.id,
            action = %job.job_type,
            executor = %self.inner.executor.kind(),
            "job queued"
        );
        self.push_status(session_id, &job);
        self.emit(
            session_id,
            ClientEvent::job_text(
                &job.id,
                format!("Queued {} (job {})", job.parsed_intent.summary(), job.id),
            ),
        );
        self.spawn_dispatch(session_id, job.clone());
        Ok(job)
    }

    fn spawn_dispatch(&self, session_id: &str, job: Job) {
        let cancel = self.inner.shutdown.child_token();
        if !self.arena().register_poller(&job.id, session_id, cancel.clone()) {
            warn!(job_id = %job.id, "job already has a poll chain");
            return;
        }

        let this = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            // Closing the session must not drop a start that may already
            // have reached the remote side; only shutdown abandons it.
            let started = tokio::select! {
                _ = this.inner.shutdown.cancelled() => {
                    debug!(job_id = %job.id, "dispatch abandoned on shutdown");
                    return;
                }
                started = this.inner.executor.start(&job) => started,
            };
            match started {
                Ok(handle) => {
                    let status = this.record_start(&session_id, &job, &handle).await;
                    this.run_poll_chain(&session_id, handle, status, cancel).await;
                }
                Err(e) => this.fail_dispatch(&session_id, &job, e, &cancel).await,
            }
        });
    }

    fn spawn_poll_chain(&self, session_id: &str, handle: ExecutionHandle, status: JobStatus) {
        let cancel = self.inner.shutdown.child_token();
        if !self
            .arena()
            .register_poller(&handle.job_id, session_id, cancel.clone())
        {
            return;
        }
        let this = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            this.run_poll_chain(&session_id, handle, status, cancel).await;
        });
    }

    /// Persist what `start` reported. Returns the job's status afterwards.
    async fn record_start(&self, session_id: &str, job: &Job, handle: &ExecutionHandle) -> JobStatus {
        let mut update = JobUpdate::default().outputs(handle.output.iter().cloned());
        if let Some(id) = &handle.external_id {
            update = update.external_id(id.clone());
        }
        if handle.initial_status == job.status && update == JobUpdate::default() {
            return job.status;
        }
        match self
            .inner
            .store
            .update_job_status(&job.id, handle.initial_status, update)
            .await
        {
            Ok(updated) => {
                self.push_status(session_id, &updated);
                updated.status
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "failed to record dispatch");
                job.status
            }
        }
    }

    async fn fail_dispatch(
        &self,
        session_id: &str,
        job: &Job,
        error: ExecutorError,
        cancel: &CancellationToken,
    ) {
        warn!(job_id = %job.id, error = %error, "dispatch failed");
        let message = format!("Dispatch failed: {}", error);
        self.mark_failed(session_id, &job.id, &message).await;
        self.finish_chain(session_id, &job.id, cancel);
    }

    async fn run_poll_chain(
        &self,
        session_id: &str,
        handle: ExecutionHandle,
        status: JobStatus,
        cancel: CancellationToken,
    ) {
        let job_id = handle.job_id.clone();
        let target = poll::JobPollTarget::new(self.clone(), session_id, handle, status);
        match self.inner.poller.run(&target, &cancel).await {
            PollOutcome::Terminal { report, attempts } => {
                debug!(job_id, attempts, status = %report.status, "poll chain finished");
                self.inner.executor.forget(&job_id);
            }
            PollOutcome::Stopped { attempts } => {
                debug!(job_id, attempts, "poll chain stopped");
            }
            PollOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                let mut message = format!("Status polling gave up after {} attempts", attempts);
                if let Some(last_error) = last_error {
                    message.push_str(&format!(" (last error: {})", last_error));
                }
                warn!(job_id, attempts, "status polling exhausted");
                self.emit(
                    session_id,
                    ClientEvent::PollingFailed {
                        job_id: job_id.clone(),
                        attempts,
                        error: message.clone(),
                    },
                );
                if self.mark_failed(session_id, &job_id, &message).await {
                    self.inner.executor.forget(&job_id);
                }
            }
            PollOutcome::Cancelled => {
                debug!(job_id, "poll chain cancelled");
                return;
            }
        }
        self.finish_chain(session_id, &job_id, &cancel);
    }

    /// Fail the job. Returns `false` if the store kept it unfinished.
    async fn mark_failed(&self, session_id: &str, job_id: &str, message: &str) -> bool {
        let update = JobUpdate::default()
            .output(format!("Error: {}", message))
            .error(message);
        match self
            .inner
            .store
            .update_job_status(job_id, JobStatus::Failed, update)
            .await
        {
            Ok(job) => {
                self.push_status(session_id, &job);
                self.emit(session_id, ClientEvent::job_text(job_id, finished_message(&job)));
                true
            }
            Err(StoreError::InvalidTransition(e)) => {
                debug!(job_id, error = %e, "job already finished");
                true
            }
            Err(e) => {
                error!(job_id, error = %e, "failed to mark job failed");
                self.emit(
                    session_id,
                    ClientEvent::job_text(
                        job_id,
                        format!(
                            "Job {} could not be marked failed ({}). Refresh it to try again.",
                            job_id, e
                        ),
                    ),
                );
                false
            }
        }
    }

    /// Free the job's poll slot and the session's busy lock.
    fn finish_chain(&self, session_id: &str, job_id: &str, cancel: &CancellationToken) {
        self.arena().unregister_poller(job_id, cancel);
        self.release_busy(session_id, &Busy::Job(job_id.to_string()));
    }
}

/// Chat line announcing a job's terminal status.
fn finished_message(job: &Job) -> String {
    let summary = job.parsed_intent.summary();
    match job.status {
        JobStatus::Completed => format!("Done: {} (job {})", summary, job.id),
        JobStatus::Cancelled => format!("Cancelled: {} (job {})", summary, job.id),
        _ => format!(
            "Failed: {} (job {}): {}",
            summary,
            job.id,
            job.error_message.as_deref().unwrap_or("unknown error")
        ),
    }
}
