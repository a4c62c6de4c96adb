//! Bounded status polling with jitter, backoff and cancellation.
//!
//! A `Poller` drives one `PollTarget` until it reports a terminal status, the
//! attempt budget runs out, or the cancellation token fires. Failed fetches
//! (timeouts included) and reports the target could not record count against
//! the same budget and stretch the next delay exponentially up to a cap.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PollerSettings;
use crate::errors::ExecutorError;

/// Time source for executors and pollers. Tests run on tokio's paused clock.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollerConfig {
    pub initial_delay: Duration,
    pub interval: Duration,
    /// Each interval is drawn uniformly from `interval ± jitter`.
    pub jitter: Duration,
    pub max_attempts: u32,
    pub error_backoff_cap: Duration,
    pub request_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self::from(&PollerSettings::default())
    }
}

impl From<&PollerSettings> for PollerConfig {
    fn from(settings: &PollerSettings) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            interval: Duration::from_millis(settings.interval_ms),
            jitter: Duration::from_millis(settings.jitter_ms),
            max_attempts: settings.max_attempts,
            error_backoff_cap: Duration::from_millis(settings.error_backoff_cap_ms),
            request_timeout: Duration::from_millis(settings.request_timeout_ms),
        }
    }
}

/// Whether the chain should keep going after an observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollControl {
    Continue,
    Stop,
    /// The report could not be acted on. Counts as a failed attempt, so a
    /// terminal report is fetched again instead of ending the chain.
    Retry(String),
}

/// Something whose external status can be fetched repeatedly.
#[async_trait]
pub trait PollTarget: Send + Sync {
    type Report: Send + Sync;

    async fn fetch(&self) -> Result<Self::Report, ExecutorError>;

    fn is_terminal(&self, report: &Self::Report) -> bool;

    /// Called with every successful fetch, terminal ones included.
    async fn observe(&self, report: &Self::Report) -> PollControl;
}

#[derive(Debug)]
pub enum PollOutcome<R> {
    Terminal { report: R, attempts: u32 },
    /// The target asked to stop before reaching a terminal status.
    Stopped { attempts: u32 },
    Exhausted {
        attempts: u32,
        last_error: Option<String>,
    },
    Cancelled,
}

#[derive(Clone)]
pub struct Poller {
    config: PollerConfig,
    clock: Arc<dyn Clock>,
}

impl Poller {
    pub fn new(config: PollerConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub async fn run<T: PollTarget>(
        &self,
        target: &T,
        cancel: &CancellationToken,
    ) -> PollOutcome<T::Report> {
        let mut delay = self.config.initial_delay;
        let mut consecutive_errors = 0u32;
        let mut last_error = None;

        for attempt in 1..=self.config.max_attempts {
            tokio::select! {
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                _ = self.clock.sleep(delay) => {}
            }

            let fetched = tokio::select! {
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                _ = self.clock.sleep(self.config.request_timeout) => {
                    Err(ExecutorError::Timeout(self.config.request_timeout))
                }
                result = target.fetch() => result,
            };

            let failure = match fetched {
                Ok(report) => match target.observe(&report).await {
                    PollControl::Retry(reason) => reason,
                    control => {
                        consecutive_errors = 0;
                        if target.is_terminal(&report) {
                            debug!(attempt, "poll reached terminal status");
                            return PollOutcome::Terminal {
                                report,
                                attempts: attempt,
                            };
                        }
                        if control == PollControl::Stop {
                            return PollOutcome::Stopped { attempts: attempt };
                        }
                        delay = self.next_interval();
                        continue;
                    }
                },
                Err(e) => e.to_string(),
            };

            consecutive_errors += 1;
            delay = backoff_delay(
                self.config.interval,
                consecutive_errors,
                self.config.error_backoff_cap,
            );
            warn!(attempt, error = %failure, retry_in_ms = delay.as_millis() as u64, "status poll failed");
            last_error = Some(failure);
        }

        PollOutcome::Exhausted {
            attempts: self.config.max_attempts,
            last_error,
        }
    }

    fn next_interval(&self) -> Duration {
        let base = self.config.interval.as_millis() as u64;
        let jitter = self.config.jitter.as_millis() as u64;
        if jitter == 0 {
            return self.config.interval;
        }
        let low = base.saturating_sub(jitter);
        let high = base.saturating_add(jitter);
        Duration::from_millis(rand::thread_rng().gen_range(low..=high))
    }
}

/// `interval * 2^(errors - 1)`, capped.
pub fn backoff_delay(interval: Duration, consecutive_errors: u32, cap: Duration) -> Duration {
    let exponent = consecutive_errors.saturating_sub(1).min(16);
    interval.saturating_mul(1u32 << exponent).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Fake {
        Running,
        Done,
        Fail,
        Hang,
    }

    struct ScriptedTarget {
        script: Mutex<VecDeque<Fake>>,
        fetches: AtomicU32,
        observed: AtomicU32,
        stop_after_observe: bool,
        /// How many observations to refuse before accepting reports.
        refuse: AtomicU32,
    }

    impl ScriptedTarget {
        fn new(script: &[Fake]) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
                fetches: AtomicU32::new(0),
                observed: AtomicU32::new(0),
                stop_after_observe: false,
                refuse: AtomicU32::new(0),
            }
        }

        fn fetches(&self) -> u32 {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PollTarget for ScriptedTarget {
        type Report = Fake;

        async fn fetch(&self) -> Result<Fake, ExecutorError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Fake::Running);
            match next {
                Fake::Fail => Err(ExecutorError::InvalidResponse("boom".into())),
                Fake::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Fake::Running)
                }
                other => Ok(other),
            }
        }

        fn is_terminal(&self, report: &Fake) -> bool {
            *report == Fake::Done
        }

        async fn observe(&self, _report: &Fake) -> PollControl {
            self.observed.fetch_add(1, Ordering::SeqCst);
            let refused = self
                .refuse
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return PollControl::Retry("write failed".into());
            }
            if self.stop_after_observe {
                PollControl::Stop
            } else {
                PollControl::Continue
            }
        }
    }

    fn config(max_attempts: u32) -> PollerConfig {
        PollerConfig {
            initial_delay: Duration::ZERO,
            interval: Duration::from_millis(100),
            jitter: Duration::ZERO,
            max_attempts,
            error_backoff_cap: Duration::from_millis(250),
            request_timeout: Duration::from_secs(1),
        }
    }

    fn poller(max_attempts: u32) -> Poller {
        Poller::new(config(max_attempts), Arc::new(TokioClock))
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_terminal_status() {
        let target = ScriptedTarget::new(&[Fake::Running, Fake::Running, Fake::Done]);
        let outcome = poller(10).run(&target, &CancellationToken::new()).await;
        match outcome {
            PollOutcome::Terminal { report, attempts } => {
                assert_eq!(report, Fake::Done);
                assert_eq!(attempts, 3);
            }
            other => panic!("Expected Terminal, got {other:?}"),
        }
        assert_eq!(target.observed.load(Ordering::SeqCst), 3);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(target.fetches(), 3, "no fetches after terminal");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempt_budget() {
        let target = ScriptedTarget::new(&[]);
        let outcome = poller(5).run(&target, &CancellationToken::new()).await;
        assert!(matches!(
            outcome,
            PollOutcome::Exhausted {
                attempts: 5,
                last_error: None
            }
        ));
        assert_eq!(target.fetches(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_back_off_then_recover() {
        let target = ScriptedTarget::new(&[Fake::Fail, Fake::Fail, Fake::Fail, Fake::Done]);
        let started = Instant::now();
        let outcome = poller(10).run(&target, &CancellationToken::new()).await;
        assert!(matches!(outcome, PollOutcome::Terminal { attempts: 4, .. }));
        // 100ms + 200ms + 250ms (capped) between the four fetches.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(550), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_count_against_budget() {
        let target = ScriptedTarget::new(&[Fake::Fail, Fake::Fail, Fake::Fail]);
        match poller(3).run(&target, &CancellationToken::new()).await {
            PollOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.unwrap().contains("boom"));
            }
            other => panic!("Expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout_is_transient() {
        let target = ScriptedTarget::new(&[Fake::Hang, Fake::Done]);
        let outcome = poller(5).run(&target, &CancellationToken::new()).await;
        assert!(matches!(outcome, PollOutcome::Terminal { attempts: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_fetch() {
        let target = ScriptedTarget::new(&[Fake::Done]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = poller(5).run(&target, &cancel).await;
        assert!(matches!(outcome, PollOutcome::Cancelled));
        assert_eq!(target.fetches(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_running_chain() {
        let target = Arc::new(ScriptedTarget::new(&[]));
        let cancel = CancellationToken::new();
        let handle = {
            let target = target.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { poller(1000).run(&*target, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(350)).await;
        cancel.cancel();
        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, PollOutcome::Cancelled));
        let fetched = target.fetches();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(target.fetches(), fetched);
    }

    #[tokio::test(start_paused = true)]
    async fn test_observer_can_stop_chain() {
        let mut target = ScriptedTarget::new(&[Fake::Running]);
        target.stop_after_observe = true;
        let outcome = poller(5).run(&target, &CancellationToken::new()).await;
        assert!(matches!(outcome, PollOutcome::Stopped { attempts: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecorded_terminal_report_is_fetched_again() {
        let target = ScriptedTarget::new(&[Fake::Done, Fake::Done, Fake::Done]);
        target.refuse.store(2, Ordering::SeqCst);
        let started = Instant::now();
        let outcome = poller(10).run(&target, &CancellationToken::new()).await;
        assert!(matches!(outcome, PollOutcome::Terminal { attempts: 3, .. }));
        assert_eq!(target.observed.load(Ordering::SeqCst), 3);
        // Refusals back off like fetch errors: 100ms then 200ms.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(350), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_reports_exhaust_budget() {
        let target = ScriptedTarget::new(&[Fake::Done, Fake::Done, Fake::Done]);
        target.refuse.store(u32::MAX, Ordering::SeqCst);
        match poller(3).run(&target, &CancellationToken::new()).await {
            PollOutcome::Exhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.as_deref(), Some("write failed"));
            }
            other => panic!("Expected Exhausted, got {other:?}"),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let interval = Duration::from_secs(4);
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(interval, 1, cap), Duration::from_secs(4));
        assert_eq!(backoff_delay(interval, 2, cap), Duration::from_secs(8));
        assert_eq!(backoff_delay(interval, 3, cap), Duration::from_secs(16));
        assert_eq!(backoff_delay(interval, 4, cap), Duration::from_secs(30));
        assert_eq!(backoff_delay(interval, 400, cap), Duration::from_secs(30));
    }

    #[test]
    fn test_jittered_interval_stays_in_window() {
        let poller = Poller::new(
            PollerConfig {
                jitter: Duration::from_secs(1),
                interval: Duration::from_secs(4),
                ..PollerConfig::default()
            },
            Arc::new(TokioClock),
        );
        for _ in 0..200 {
            let delay = poller.next_interval();
            assert!(delay >= Duration::from_secs(3) && delay <= Duration::from_secs(5));
        }
    }

    #[test]
    fn test_config_from_settings() {
        let config = PollerConfig::default();
        assert_eq!(config.interval, Duration::from_secs(4));
        assert_eq!(config.max_attempts, 60);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.error_backoff_cap, Duration::from_secs(30));
    }
}
