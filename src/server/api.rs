use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chatops_common::{Job, JobFilter, JobStatus, ParsedIntent, Slot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::{OrchestratorError, StoreError};
use crate::nlu::SlotPrompt;
use crate::orchestrator::{CommandRequest, Orchestrator, SubmitOutcome};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub orchestrator: Orchestrator,
}

pub type SharedState = Arc<AppState>;

// ── Request / response payloads ───────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub user_id: String,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobCreated {
    pub job_id: String,
    pub parsed_intent: ParsedIntent,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl From<Job> for JobCreated {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            parsed_intent: job.parsed_intent,
            status: job.status,
            created_at: job.created_at,
        }
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Busy {
        active_job_id: Option<String>,
    },
    MissingSlot {
        missing: Vec<Slot>,
        parsed_intent: ParsedIntent,
        prompt: SlotPrompt,
    },
    Unrecognized {
        parsed_intent: ParsedIntent,
    },
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "INVALID_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Busy { .. } => "BUSY",
            ApiError::MissingSlot { .. } => "MISSING_SLOT",
            ApiError::Unrecognized { .. } => "UNRECOGNIZED_COMMAND",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, body) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({"code": code, "message": message}),
            ),
            ApiError::NotFound(message) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({"code": code, "message": message}),
            ),
            ApiError::Conflict(message) => (
                StatusCode::CONFLICT,
                serde_json::json!({"code": code, "message": message}),
            ),
            ApiError::Busy { active_job_id } => (
                StatusCode::CONFLICT,
                serde_json::json!({
                    "code": code,
                    "message": "A command is already in progress for this session",
                    "active_job_id": active_job_id,
                }),
            ),
            ApiError::MissingSlot {
                missing,
                parsed_intent,
                prompt,
            } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({
                    "code": code,
                    "message": prompt.question.clone(),
                    "missing": missing,
                    "parsed_intent": parsed_intent,
                    "prompt": prompt,
                }),
            ),
            ApiError::Unrecognized { parsed_intent } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({
                    "code": code,
                    "message": "Could not determine an action for this command",
                    "parsed_intent": parsed_intent,
                }),
            ),
            ApiError::Internal(message) => {
                error!(error = %message, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({"code": code, "message": message}),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Store(StoreError::NotFound { id }) => {
                ApiError::NotFound(format!("Job {} not found", id))
            }
            OrchestratorError::Store(StoreError::InvalidTransition(e)) => {
                ApiError::Conflict(e.to_string())
            }
            err @ OrchestratorError::NotRetryable { .. } => ApiError::Conflict(err.to_string()),
            OrchestratorError::Store(e @ StoreError::Database(_)) => ApiError::Internal(e.to_string()),
        }
    }
}

/// Map a non-created outcome to its error response.
fn outcome_response(outcome: SubmitOutcome) -> Result<Response, ApiError> {
    match outcome {
        SubmitOutcome::Created(job) => {
            Ok((StatusCode::CREATED, Json(JobCreated::from(job))).into_response())
        }
        SubmitOutcome::MissingSlots {
            missing,
            parsed_intent,
            prompt,
        } => Err(ApiError::MissingSlot {
            missing,
            parsed_intent,
            prompt,
        }),
        SubmitOutcome::Unrecognized { parsed_intent } => {
            Err(ApiError::Unrecognized { parsed_intent })
        }
        SubmitOutcome::Busy { active_job_id } => Err(ApiError::Busy { active_job_id }),
    }
}

/// HTTP callers without an explicit session share one per user. Explicit
/// ids stay inside that user's HTTP namespace.
fn http_session(session_id: Option<String>, user_id: &str) -> String {
    match session_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => format!("http:{}:{}", user_id, id),
        _ => format!("http:{}", user_id),
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/commands", post(submit_command))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/{id}", get(get_job))
        .route("/api/jobs/{id}/refresh", post(refresh_job))
        .route("/api/jobs/{id}/retry", post(retry_job))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "executor": state.orchestrator.executor_kind(),
    }))
}

async fn submit_command(
    State(state): State<SharedState>,
    Json(mut req): Json<CommandRequest>,
) -> Result<Response, ApiError> {
    req.command = req.command.trim().to_string();
    req.user_id = req.user_id.trim().to_string();
    if req.command.is_empty() {
        return Err(ApiError::BadRequest("command must not be empty".into()));
    }
    if req.user_id.is_empty() {
        return Err(ApiError::BadRequest("user_id must not be empty".into()));
    }
    if let Some(threshold) = req.confidence_threshold
        && !(0.0..=1.0).contains(&threshold)
    {
        return Err(ApiError::BadRequest(format!(
            "confidence_threshold must be between 0 and 1, got {}",
            threshold
        )));
    }

    let session_id = http_session(req.session_id.take(), &req.user_id);
    let outcome = state.orchestrator.submit(&session_id, req).await?;
    outcome_response(outcome)
}

async fn list_jobs(
    State(state): State<SharedState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(JobStatus::from_str)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let filter = JobFilter {
        status,
        limit: query.limit,
    };
    let jobs = state.orchestrator.list_jobs(&query.user_id, &filter).await?;
    Ok(Json(jobs))
}

async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.get_job(&id).await?;
    Ok(Json(job))
}

async fn refresh_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<SessionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.orchestrator.get_job(&id).await?;
    let session_id = http_session(query.session_id, &job.user_id);
    let job = state.orchestrator.refresh_job(&session_id, &id).await?;
    Ok(Json(job))
}

async fn retry_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Query(query): Query<SessionQuery>,
) -> Result<Response, ApiError> {
    let job = state.orchestrator.get_job(&id).await?;
    let session_id = http_session(query.session_id, &job.user_id);
    let outcome = state.orchestrator.retry_job(&session_id, &id).await?;
    outcome_response(outcome)
}

// ── Tests ─────────────────────────────────────────────────────────────
