//! Orchestrator-owned bookkeeping: sessions, busy locks, active poll chains
//! and the per-session status ledger.
//!
//! Everything here is synchronous and lives behind one `std::sync::Mutex` in
//! the orchestrator. No method awaits.

use std::collections::{HashMap, VecDeque};

use chatops_common::JobStatus;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::events::ClientEvent;

/// What a session's busy lock is held for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Busy {
    /// A command is being parsed and persisted.
    Submitting,
    /// A job has been created and has not finished yet.
    Job(String),
}

impl Busy {
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Submitting => None,
            Self::Job(id) => Some(id),
        }
    }
}

/// How many finished jobs a session remembers having reported.
const FINISHED_JOBS_KEPT: usize = 64;

#[derive(Debug, Default)]
pub struct Session {
    busy: Option<Busy>,
    sink: Option<mpsc::UnboundedSender<ClientEvent>>,
    /// Last `statusUpdated` status sent per unfinished job.
    ledger: HashMap<String, JobStatus>,
    /// Jobs whose terminal status was sent, oldest first.
    finished: VecDeque<String>,
}

impl Session {
    fn mark_finished(&mut self, job_id: &str) {
        self.ledger.remove(job_id);
        if self.finished.len() == FINISHED_JOBS_KEPT {
            self.finished.pop_front();
        }
        self.finished.push_back(job_id.to_string());
    }
}

#[derive(Debug)]
struct ActivePoller {
    session_id: String,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
pub struct Arena {
    sessions: HashMap<String, Session>,
    pollers: HashMap<String, ActivePoller>,
}

impl Arena {
    /// Attach an event sink, replacing any previous one for the same id.
    pub fn open(&mut self, session_id: &str) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.entry(session_id.to_string()).or_default().sink = Some(tx);
        rx
    }

    /// Drop a session and cancel its poll chains. Returns how many were cancelled.
    pub fn close(&mut self, session_id: &str) -> usize {
        self.sessions.remove(session_id);
        let mut cancelled = 0;
        self.pollers.retain(|_, p| {
            if p.session_id != session_id {
                return true;
            }
            p.cancel.cancel();
            cancelled += 1;
            false
        });
        cancelled
    }

    #[cfg(test)]
    pub fn has_session(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Take the session's busy lock. Returns the current holder on contention.
    pub fn try_acquire(&mut self, session_id: &str) -> Result<(), Busy> {
        let session = self.sessions.entry(session_id.to_string()).or_default();
        match &session.busy {
            Some(busy) => Err(busy.clone()),
            None => {
                session.busy = Some(Busy::Submitting);
                Ok(())
            }
        }
    }

    /// Hand a `Submitting` lock over to the job that was just created.
    pub fn bind_job(&mut self, session_id: &str, job_id: &str) {
        if let Some(session) = self.sessions.get_mut(session_id)
            && session.busy == Some(Busy::Submitting)
        {
            session.busy = Some(Busy::Job(job_id.to_string()));
        }
    }

    /// Release the lock if `holder` still owns it. Returns whether it did.
    pub fn release(&mut self, session_id: &str, holder: &Busy) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) if session.busy.as_ref() == Some(holder) => {
                session.busy = None;
                true
            }
            _ => false,
        }
    }

    pub fn busy(&self, session_id: &str) -> Option<&Busy> {
        self.sessions.get(session_id).and_then(|s| s.busy.as_ref())
    }

    pub fn sink(&self, session_id: &str) -> Option<mpsc::UnboundedSender<ClientEvent>> {
        self.sessions.get(session_id).and_then(|s| s.sink.clone())
    }

    /// Record that `status` is about to be pushed for `job_id`.
    ///
    /// Returns `false` unless the status advances past the last one sent, so
    /// a session sees each stage at most once and a single terminal status.
    /// A terminal status moves the job out of the ledger into a bounded list
    /// of finished jobs.
    pub fn record_status(&mut self, session_id: &str, job_id: &str, status: JobStatus) -> bool {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return false;
        };
        if session.finished.iter().any(|id| id == job_id) {
            return false;
        }
        match session.ledger.get(job_id) {
            Some(last) if status.stage() <= last.stage() => false,
            _ if status.is_terminal() => {
                session.mark_finished(job_id);
                true
            }
            _ => {
                session.ledger.insert(job_id.to_string(), status);
                true
            }
        }
    }

    #[cfg(test)]
    pub fn ledger_len(&self, session_id: &str) -> usize {
        self.sessions.get(session_id).map_or(0, |s| s.ledger.len())
    }

    /// Claim the poll slot for a job. `false` if a chain already owns it.
    pub fn register_poller(
        &mut self,
        job_id: &str,
        session_id: &str,
        cancel: CancellationToken,
    ) -> bool {
        if self.pollers.contains_key(job_id) {
            return false;
        }
        self.pollers.insert(
            job_id.to_string(),
            ActivePoller {
                session_id: session_id.to_string(),
                cancel,
            },
        );
        true
    }

    /// Free the poll slot when a chain ends on its own. A cancelled chain's
    /// slot was already freed by whoever cancelled it and may have been
    /// claimed again since.
    pub fn unregister_poller(&mut self, job_id: &str, cancel: &CancellationToken) {
        if !cancel.is_cancelled() {
            self.pollers.remove(job_id);
        }
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        self.pollers.contains_key(job_id)
    }

    /// Cancel every poll chain. Returns how many were running.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pollers.len();
        for (_, poller) in self.pollers.drain() {
            poller.cancel.cancel();
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_lock_is_single_flight() {
        let mut arena = Arena::default();
        assert!(arena.try_acquire("s1").is_ok());
        assert_eq!(arena.try_acquire("s1"), Err(Busy::Submitting));

        arena.bind_job("s1", "j1");
        assert_eq!(arena.try_acquire("s1"), Err(Busy::Job("j1".into())));

        // Other sessions are independent.
        assert!(arena.try_acquire("s2").is_ok());
    }

    #[test]
    fn test_release_requires_matching_holder() {
        let mut arena = Arena::default();
        arena.try_acquire("s1").unwrap();
        arena.bind_job("s1", "j1");

        assert!(!arena.release("s1", &Busy::Job("other".into())));
        assert!(!arena.release("s1", &Busy::Submitting));
        assert!(arena.release("s1", &Busy::Job("j1".into())));
        assert!(arena.busy("s1").is_none());
        assert!(arena.try_acquire("s1").is_ok());
    }

    #[test]
    fn test_ledger_is_monotonic_with_single_terminal() {
        let mut arena = Arena::default();
        arena.try_acquire("s1").unwrap();

        assert!(arena.record_status("s1", "j1", JobStatus::Queued));
        assert!(arena.record_status("s1", "j1", JobStatus::Running));
        assert!(!arena.record_status("s1", "j1", JobStatus::Queued));
        assert!(!arena.record_status("s1", "j1", JobStatus::Running));
        assert!(arena.record_status("s1", "j1", JobStatus::Failed));
        assert!(!arena.record_status("s1", "j1", JobStatus::Failed));
        assert!(!arena.record_status("s1", "j1", JobStatus::Completed));
    }

    #[test]
    fn test_finished_jobs_leave_the_ledger() {
        let mut arena = Arena::default();
        arena.try_acquire("http:alice").unwrap();
        let jobs: Vec<String> = (0..FINISHED_JOBS_KEPT + 10).map(|i| format!("j{i}")).collect();
        for job in &jobs {
            assert!(arena.record_status("http:alice", job, JobStatus::Queued));
            assert!(arena.record_status("http:alice", job, JobStatus::Running));
            assert!(arena.record_status("http:alice", job, JobStatus::Completed));
        }
        assert_eq!(arena.ledger_len("http:alice"), 0);

        let session = &arena.sessions["http:alice"];
        assert_eq!(session.finished.len(), FINISHED_JOBS_KEPT);
        assert_eq!(session.finished.front(), Some(&jobs[10]));

        // Recently finished jobs are not reported again.
        let last = jobs.last().unwrap();
        assert!(!arena.record_status("http:alice", last, JobStatus::Completed));
        assert!(!arena.record_status("http:alice", last, JobStatus::Running));
    }

    #[test]
    fn test_unfinished_jobs_stay_in_ledger() {
        let mut arena = Arena::default();
        arena.try_acquire("s1").unwrap();
        arena.record_status("s1", "j1", JobStatus::Running);
        arena.record_status("s1", "j2", JobStatus::Queued);
        arena.record_status("s1", "j2", JobStatus::Cancelled);
        assert_eq!(arena.ledger_len("s1"), 1);
    }

    #[test]
    fn test_ledger_ignores_unknown_session() {
        let mut arena = Arena::default();
        assert!(!arena.record_status("ghost", "j1", JobStatus::Queued));
    }

    #[test]
    fn test_poller_slot_is_exclusive() {
        let mut arena = Arena::default();
        let first = CancellationToken::new();
        assert!(arena.register_poller("j1", "s1", first.clone()));
        assert!(!arena.register_poller("j1", "s2", CancellationToken::new()));
        arena.unregister_poller("j1", &first);
        assert!(arena.register_poller("j1", "s2", CancellationToken::new()));
    }

    #[test]
    fn test_cancelled_chain_keeps_reclaimed_slot() {
        let mut arena = Arena::default();
        let old = CancellationToken::new();
        arena.register_poller("j1", "s1", old.clone());
        assert_eq!(arena.close("s1"), 1);
        assert!(old.is_cancelled());

        arena.register_poller("j1", "s2", CancellationToken::new());
        arena.unregister_poller("j1", &old);
        assert!(arena.is_polling("j1"));
    }

    #[test]
    fn test_close_returns_only_that_sessions_pollers() {
        let mut arena = Arena::default();
        let _rx = arena.open("s1");
        arena.try_acquire("s1").unwrap();
        let mine = CancellationToken::new();
        let theirs = CancellationToken::new();
        arena.register_poller("j1", "s1", mine.clone());
        arena.register_poller("j2", "s2", theirs.clone());

        assert_eq!(arena.close("s1"), 1);
        assert!(mine.is_cancelled());
        assert!(!theirs.is_cancelled());
        assert!(!arena.is_polling("j1"));
        assert!(arena.is_polling("j2"));
        assert!(!arena.has_session("s1"));
        assert!(arena.busy("s1").is_none());
    }

    #[tokio::test]
    async fn test_open_attaches_sink() {
        let mut arena = Arena::default();
        let mut rx = arena.open("s1");
        arena
            .sink("s1")
            .unwrap()
            .send(ClientEvent::TypingStarted)
            .unwrap();
        assert_eq!(rx.recv().await, Some(ClientEvent::TypingStarted));
        assert!(arena.sink("s2").is_none());
    }
}
