//! GitHub Actions workflow executor.
//!
//! Jobs are dispatched as `workflow_dispatch` events. The workflow is expected
//! to set `run-name: chatops-${{ inputs.action }}-${{ inputs.job_id }}` so the
//! run it creates can be found again by name.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatops_common::{Action, Job, JobStatus};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ExecutionHandle, Executor, ExecutorKind, PollReport};
use crate::config::GitHubConfig;
use crate::errors::ExecutorError;

/// Known GitHub token prefixes.
const GITHUB_TOKEN_PREFIXES: &[&str] = &["ghp_", "github_pat_", "gho_", "ghu_", "ghs_", "ghr_"];

/// Format check only; does not verify the token is active or scoped.
pub fn is_valid_github_token(token: &str) -> bool {
    !token.is_empty()
        && GITHUB_TOKEN_PREFIXES
            .iter()
            .any(|prefix| token.starts_with(prefix))
}

/// Deterministic run name for a job.
pub fn run_name(action: Action, job_id: &str) -> String {
    format!("chatops-{}-{}", action, job_id)
}

/// Map a workflow run's `(status, conclusion)` onto the job lifecycle.
///
/// Anything not yet `completed` is still running. A completed run succeeds
/// only with conclusion `success`.
pub fn map_run_status(status: &str, conclusion: Option<&str>) -> JobStatus {
    match status {
        "completed" => match conclusion {
            Some("success") => JobStatus::Completed,
            Some("cancelled") => JobStatus::Cancelled,
            _ => JobStatus::Failed,
        },
        _ => JobStatus::Running,
    }
}

/// `workflow_dispatch` inputs. GitHub only accepts string values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowInputs {
    pub job_id: String,
    pub action: String,
    pub service: String,
    pub environment: String,
    pub replicas: String,
    pub user_id: String,
    pub original_command: String,
}

impl WorkflowInputs {
    pub fn for_job(job: &Job) -> Self {
        let intent = &job.parsed_intent;
        Self {
            job_id: job.id.clone(),
            action: intent.action.to_string(),
            service: intent.service.clone().unwrap_or_default(),
            environment: intent
                .environment
                .map(|e| e.to_string())
                .unwrap_or_default(),
            replicas: intent.replicas.map(|n| n.to_string()).unwrap_or_default(),
            user_id: job.user_id.clone(),
            original_command: job.original_command.clone(),
        }
    }
}

/// A workflow run (subset of fields).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkflowRun {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    /// The rendered `run-name`.
    #[serde(default)]
    pub display_title: Option<String>,
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl WorkflowRun {
    pub fn matches_name(&self, name: &str) -> bool {
        self.display_title.as_deref() == Some(name) || self.name.as_deref() == Some(name)
    }

    pub fn job_status(&self) -> JobStatus {
        map_run_status(&self.status, self.conclusion.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowRunList {
    workflow_runs: Vec<WorkflowRun>,
}

/// The CI operations the workflow executor needs.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    async fn dispatch(
        &self,
        workflow: &str,
        branch: &str,
        inputs: &WorkflowInputs,
    ) -> Result<(), ExecutorError>;

    /// Recent dispatch-triggered runs of `workflow`, newest first.
    async fn list_runs(&self, workflow: &str, branch: &str) -> Result<Vec<WorkflowRun>, ExecutorError>;

    async fn get_run(&self, run_id: u64) -> Result<WorkflowRun, ExecutorError>;

    /// Look for a run by name, retrying with a fixed delay. List errors count
    /// as misses.
    async fn find_run_by_name(
        &self,
        workflow: &str,
        branch: &str,
        name: &str,
        max_attempts: u32,
        delay: Duration,
    ) -> Result<WorkflowRun, ExecutorError> {
        for attempt in 1..=max_attempts {
            match self.list_runs(workflow, branch).await {
                Ok(runs) => {
                    if let Some(run) = runs.into_iter().find(|r| r.matches_name(name)) {
                        return Ok(run);
                    }
                    tracing::debug!(attempt, name, "workflow run not listed yet");
                }
                Err(e) => tracing::warn!(attempt, name, error = %e, "listing workflow runs failed"),
            }
            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
            }
        }
        Err(ExecutorError::RunNotFound {
            name: name.to_string(),
            attempts: max_attempts,
        })
    }
}

/// GitHub REST client for one repository.
pub struct GitHubWorkflowClient {
    client: Client,
    api_url: String,
    repository: String,
    token: String,
    timeout: Duration,
}

impl GitHubWorkflowClient {
    pub fn new(
        api_url: impl Into<String>,
        repository: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ExecutorError> {
        let client = Client::builder()
            .user_agent(concat!("chatops/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            repository: repository.into(),
            token: token.into(),
            timeout,
        })
    }

    /// Build from config. `None` unless a token and repository are configured.
    pub fn from_config(config: &GitHubConfig, timeout: Duration) -> Result<Option<Self>, ExecutorError> {
        match (config.token.as_deref(), config.repository()) {
            (Some(token), Some(repository)) => {
                Self::new(&config.api_url, repository, token, timeout).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}", self.api_url, self.repository, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ExecutorError> {
        let request = request
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| ExecutorError::Timeout(self.timeout))??;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ExecutorError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ExecutorError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl WorkflowApi for GitHubWorkflowClient {
    async fn dispatch(
        &self,
        workflow: &str,
        branch: &str,
        inputs: &WorkflowInputs,
    ) -> Result<(), ExecutorError> {
        let body = serde_json::json!({ "ref": branch, "inputs": inputs });
        self.send(
            self.client
                .post(self.url(&format!("actions/workflows/{}/dispatches", workflow)))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn list_runs(&self, workflow: &str, branch: &str) -> Result<Vec<WorkflowRun>, ExecutorError> {
        let response = self
            .send(
                self.client
                    .get(self.url(&format!("actions/workflows/{}/runs", workflow)))
                    .query(&[
                        ("event", "workflow_dispatch"),
                        ("branch", branch),
                        ("per_page", "30"),
                    ]),
            )
            .await?;
        let list: WorkflowRunList = Self::json(response).await?;
        Ok(list.workflow_runs)
    }

    async fn get_run(&self, run_id: u64) -> Result<WorkflowRun, ExecutorError> {
        let response = self
            .send(self.client.get(self.url(&format!("actions/runs/{}", run_id))))
            .await?;
        Self::json(response).await
    }
}

/// Dispatches each job as a workflow run and tracks it by run id.
pub struct WorkflowExecutor {
    api: Arc<dyn WorkflowApi>,
    workflow: String,
    branch: String,
    discovery_attempts: u32,
    discovery_delay: Duration,
}

impl WorkflowExecutor {
    pub fn new(api: Arc<dyn WorkflowApi>, config: &GitHubConfig) -> Self {
        Self {
            api,
            workflow: config.workflow.clone(),
            branch: config.branch.clone(),
            discovery_attempts: config.discovery_attempts.max(1),
            discovery_delay: Duration::from_millis(config.discovery_delay_ms),
        }
    }

    fn report_for(&self, run: &WorkflowRun) -> PollReport {
        let status = run.job_status();
        let link = run
            .html_url
            .as_deref()
            .map(|url| format!(" ({})", url))
            .unwrap_or_default();
        match status {
            JobStatus::Completed => PollReport::status(status)
                .with_output(vec![format!("Workflow run #{} succeeded{}", run.id, link)]),
            JobStatus::Failed | JobStatus::Cancelled => {
                let conclusion = run.conclusion.as_deref().unwrap_or("none");
                PollReport::status(status)
                    .with_output(vec![format!(
                        "Workflow run #{} concluded with '{}'{}",
                        run.id, conclusion, link
                    )])
                    .with_error(format!("Workflow run concluded with '{}'", conclusion))
            }
            _ => PollReport::status(status)
                .with_output(vec![format!("Workflow run #{} is {}{}", run.id, run.status, link)]),
        }
    }
}

#[async_trait]
impl Executor for WorkflowExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Workflow
    }

    async fn start(&self, job: &Job) -> Result<ExecutionHandle, ExecutorError> {
        let inputs = WorkflowInputs::for_job(job);
        self.api.dispatch(&self.workflow, &self.branch, &inputs).await?;
        tracing::info!(job_id = %job.id, workflow = %self.workflow, "workflow dispatched");

        let name = run_name(job.job_type, &job.id);
        let mut output = vec![format!(
            "Dispatched workflow {} on {}",
            self.workflow, self.branch
        )];

        let external_id = match self
            .api
            .find_run_by_name(
                &self.workflow,
                &self.branch,
                &name,
                self.discovery_attempts,
                self.discovery_delay,
            )
            .await
        {
            Ok(run) => {
                output.push(format!("Tracking workflow run #{}", run.id));
                Some(run.id.to_string())
            }
            Err(e) => {
                // Not fatal: polling keeps trying to discover the run.
                tracing::warn!(job_id = %job.id, error = %e, "workflow run discovery failed");
                output.push(format!("Could not locate workflow run yet: {}", e));
                None
            }
        };

        Ok(ExecutionHandle {
            job_id: job.id.clone(),
            action: job.job_type,
            kind: ExecutorKind::Workflow,
            external_id,
            initial_status: JobStatus::Running,
            output,
        })
    }

    async fn poll(&self, handle: &ExecutionHandle) -> Result<PollReport, ExecutorError> {
        match handle.external_id.as_deref() {
            Some(id) => {
                let run_id: u64 = id.parse().map_err(|_| {
                    ExecutorError::InvalidResponse(format!("Invalid workflow run id '{}'", id))
                })?;
                let run = self.api.get_run(run_id).await?;
                Ok(self.report_for(&run))
            }
            None => {
                let name = run_name(handle.action, &handle.job_id);
                let run = self
                    .api
                    .find_run_by_name(&self.workflow, &self.branch, &name, 1, Duration::ZERO)
                    .await?;
                let mut report = self.report_for(&run);
                report.external_id = Some(run.id.to_string());
                Ok(report)
            }
        }
    }

    async fn resume(&self, job: &Job) -> Option<ExecutionHandle> {
        Some(ExecutionHandle {
            job_id: job.id.clone(),
            action: job.job_type,
            kind: ExecutorKind::Workflow,
            external_id: job.external_job_id.clone(),
            initial_status: job.status,
            output: Vec::new(),
        })
    }
}
