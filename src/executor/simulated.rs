//! Local stand-in for real infrastructure.
//!
//! Each started job gets a random plan: it turns `running` after 2–3 seconds
//! and finishes 6–10 seconds after that, succeeding with the configured
//! probability. Status is derived from the injected clock on every poll, so
//! tests on a paused clock are deterministic given a seed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatops_common::{Action, Job, JobStatus, ParsedIntent};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;

use super::{ExecutionHandle, Executor, ExecutorKind, PollReport};
use crate::config::SimulationConfig;
use crate::errors::ExecutorError;
use crate::poller::Clock;

const START_DELAY_MS: (u64, u64) = (2_000, 3_000);
const RUN_DURATION_MS: (u64, u64) = (6_000, 10_000);

const FAILURES: &[&str] = &[
    "Connection to cluster API timed out",
    "Image pull failed: manifest unknown",
    "Insufficient CPU quota in namespace",
    "Readiness check failed after rollout",
    "Permission denied: service account lacks deploy rights",
    "Pod crash-looping: exit code 137 (OOMKilled)",
];

#[derive(Debug, Clone)]
struct Plan {
    intent: ParsedIntent,
    started: Instant,
    running_after: Duration,
    finished_after: Duration,
    failure: Option<&'static str>,
}

pub struct SimulatedExecutor {
    clock: Arc<dyn Clock>,
    success_rate: f64,
    rng: Mutex<StdRng>,
    plans: Mutex<HashMap<String, Plan>>,
}

impl SimulatedExecutor {
    pub fn new(config: &SimulationConfig, clock: Arc<dyn Clock>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            clock,
            success_rate: config.success_rate.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
            plans: Mutex::new(HashMap::new()),
        }
    }

    fn make_plan(&self, intent: &ParsedIntent) -> Plan {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let running_after = Duration::from_millis(rng.gen_range(START_DELAY_MS.0..=START_DELAY_MS.1));
        let run_for = Duration::from_millis(rng.gen_range(RUN_DURATION_MS.0..=RUN_DURATION_MS.1));
        let failure = if rng.gen_bool(self.success_rate) {
            None
        } else {
            FAILURES.choose(&mut *rng).copied()
        };
        Plan {
            intent: intent.clone(),
            started: self.clock.now(),
            running_after,
            finished_after: running_after + run_for,
            failure,
        }
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Simulated
    }

    async fn start(&self, job: &Job) -> Result<ExecutionHandle, ExecutorError> {
        let plan = self.make_plan(&job.parsed_intent);
        tracing::debug!(
            job_id = %job.id,
            running_after_ms = plan.running_after.as_millis() as u64,
            finished_after_ms = plan.finished_after.as_millis() as u64,
            succeeds = plan.failure.is_none(),
            "simulated run planned"
        );
        self.plans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id.clone(), plan);

        Ok(ExecutionHandle {
            job_id: job.id.clone(),
            action: job.job_type,
            kind: ExecutorKind::Simulated,
            external_id: None,
            initial_status: JobStatus::Queued,
            output: vec![format!("Queued {} on the simulated runner", job.parsed_intent.summary())],
        })
    }

    async fn poll(&self, handle: &ExecutionHandle) -> Result<PollReport, ExecutorError> {
        let plan = self
            .plans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&handle.job_id)
            .cloned()
            .ok_or_else(|| ExecutorError::UnknownJob {
                job_id: handle.job_id.clone(),
            })?;

        let elapsed = self.clock.now().saturating_duration_since(plan.started);
        let report = if elapsed < plan.running_after {
            PollReport::status(JobStatus::Queued)
        } else if elapsed < plan.finished_after {
            PollReport::status(JobStatus::Running).with_output(running_output(&plan.intent))
        } else {
            match plan.failure {
                None => PollReport::status(JobStatus::Completed)
                    .with_output(success_output(&plan.intent)),
                Some(reason) => PollReport::status(JobStatus::Failed)
                    .with_output(vec![format!("Error: {}", reason)])
                    .with_error(reason),
            }
        };
        Ok(report)
    }

    async fn resume(&self, job: &Job) -> Option<ExecutionHandle> {
        let known = self
            .plans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&job.id);
        known.then(|| ExecutionHandle {
            job_id: job.id.clone(),
            action: job.job_type,
            kind: ExecutorKind::Simulated,
            external_id: None,
            initial_status: job.status,
            output: Vec::new(),
        })
    }

    fn forget(&self, job_id: &str) {
        self.plans
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id);
    }
}

fn names(intent: &ParsedIntent) -> (&str, &str) {
    let service = intent.service.as_deref().unwrap_or("service");
    let environment = intent.environment.map(|e| e.as_str()).unwrap_or("default");
    (service, environment)
}

fn running_output(intent: &ParsedIntent) -> Vec<String> {
    vec![format!("Executing {}", intent.summary())]
}

fn success_output(intent: &ParsedIntent) -> Vec<String> {
    let (service, env) = names(intent);
    match intent.action {
        Action::Deploy => vec![
            format!("Pulling image {}:latest", service),
            format!("Rolling out {} to {}", service, env),
            format!("Deployment of {} to {} completed", service, env),
        ],
        Action::Rollback => vec![
            format!("Fetching previous release of {}", service),
            format!("Rolled back {} in {} to the previous version", service, env),
        ],
        Action::Scale => {
            let replicas = intent.replicas.unwrap_or(1);
            vec![
                format!("Scaling {} in {} to {} replicas", service, env, replicas),
                format!("{}/{} replicas ready", replicas, replicas),
            ]
        }
        Action::Restart => vec![
            format!("Restarting pods for {} in {}", service, env),
            format!("All pods of {} are running", service),
        ],
        Action::Logs => vec![
            format!("[{}] INFO  server listening on :8080", service),
            format!("[{}] INFO  GET /health 200 2ms", service),
            format!("[{}] WARN  slow query took 812ms", service),
            format!("[{}] INFO  GET /api/v1/items 200 41ms", service),
        ],
        Action::Status => vec![
            format!("{} in {}: healthy", service, env),
            "Replicas: 3/3 ready".to_string(),
            "Last deploy: 2 hours ago".to_string(),
        ],
        Action::Unknown => vec!["Nothing to do".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::TokioClock;
    use chatops_common::{Environment, IntentSource};
    use chrono::Utc;

    fn job(id: &str, action: Action) -> Job {
        let intent = ParsedIntent {
            action,
            service: Some("api-service".into()),
            environment: Some(Environment::Staging),
            replicas: Some(3),
            confidence: 0.8,
            source: IntentSource::Regex,
            classifier_error: None,
        };
        Job {
            id: id.to_string(),
            user_id: "u1".into(),
            original_command: "scale api-service to 3 replicas".into(),
            parsed_intent: intent,
            job_type: action,
            status: JobStatus::Queued,
            output: Vec::new(),
            error_message: None,
            external_job_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn executor(success_rate: f64) -> SimulatedExecutor {
        SimulatedExecutor::new(
            &SimulationConfig {
                success_rate,
                seed: Some(7),
            },
            Arc::new(TokioClock),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_follows_plan_timing() {
        let executor = executor(1.0);
        let handle = executor.start(&job("j1", Action::Scale)).await.unwrap();
        assert_eq!(handle.initial_status, JobStatus::Queued);

        assert_eq!(executor.poll(&handle).await.unwrap().status, JobStatus::Queued);

        tokio::time::advance(Duration::from_millis(3_000)).await;
        let running = executor.poll(&handle).await.unwrap();
        assert_eq!(running.status, JobStatus::Running);

        tokio::time::advance(Duration::from_millis(10_000)).await;
        let done = executor.poll(&handle).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.output.iter().any(|l| l.contains("3 replicas")));
        assert!(done.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_still_queued_before_two_seconds() {
        let executor = executor(1.0);
        let handle = executor.start(&job("j1", Action::Deploy)).await.unwrap();
        tokio::time::advance(Duration::from_millis(1_999)).await;
        assert_eq!(executor.poll(&handle).await.unwrap().status, JobStatus::Queued);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_reports_catalogue_error() {
        let executor = executor(0.0);
        let handle = executor.start(&job("j2", Action::Deploy)).await.unwrap();
        tokio::time::advance(Duration::from_secs(14)).await;
        let report = executor.poll(&handle).await.unwrap();
        assert_eq!(report.status, JobStatus::Failed);
        let error = report.error.unwrap();
        assert!(FAILURES.contains(&error.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_plan_outlives_terminal_report_until_forgotten() {
        let executor = executor(1.0);
        let j = job("j3", Action::Restart);
        let handle = executor.start(&j).await.unwrap();
        assert!(executor.resume(&j).await.is_some());

        tokio::time::advance(Duration::from_secs(14)).await;
        assert_eq!(executor.poll(&handle).await.unwrap().status, JobStatus::Completed);
        assert!(executor.resume(&j).await.is_some());
        assert_eq!(executor.poll(&handle).await.unwrap().status, JobStatus::Completed);

        executor.forget(&j.id);
        assert!(executor.resume(&j).await.is_none());
        assert!(matches!(
            executor.poll(&handle).await,
            Err(ExecutorError::UnknownJob { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_same_plan() {
        let a = executor(0.5);
        let b = executor(0.5);
        for i in 0..5 {
            let j = job(&format!("j{i}"), Action::Deploy);
            a.start(&j).await.unwrap();
            b.start(&j).await.unwrap();
        }
        let plans_a = a.plans.lock().unwrap();
        let plans_b = b.plans.lock().unwrap();
        for (id, plan) in plans_a.iter() {
            let other = &plans_b[id];
            assert_eq!(plan.running_after, other.running_after);
            assert_eq!(plan.finished_after, other.finished_after);
            assert_eq!(plan.failure, other.failure);
        }
    }

    #[test]
    fn test_success_output_is_action_specific() {
        let logs = success_output(&job("x", Action::Logs).parsed_intent);
        assert!(logs.iter().all(|l| l.starts_with("[api-service]")));
        let status = success_output(&job("x", Action::Status).parsed_intent);
        assert!(status[0].contains("healthy"));
    }
}
