use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chatops_common::{Action, Job, JobFilter, JobStatus, JobUpdate, ParsedIntent};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::{JobStore, NewJob};
use crate::errors::StoreError;

/// Async-safe handle to the job database.
///
/// Wraps `JobDb` behind `Arc<Mutex>` and runs all access on tokio's blocking
/// thread pool via `spawn_blocking`, so synchronous SQLite I/O never ties up
/// async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<JobDb>>,
}

impl DbHandle {
    pub fn new(db: JobDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&JobDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct JobDb {
    conn: Connection,
}

impl JobDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS jobs (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    original_command TEXT NOT NULL,
                    parsed_intent TEXT NOT NULL,
                    job_type TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'queued',
                    output TEXT NOT NULL DEFAULT '[]',
                    error_message TEXT,
                    external_job_id TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    started_at TEXT,
                    completed_at TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_jobs_user ON jobs(user_id, created_at);
                CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
                ",
            )
            .context("Failed to create jobs table")?;
        Ok(())
    }

    pub fn create_job(&self, new: &NewJob) -> Result<Job> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp(Utc::now());
        let intent =
            serde_json::to_string(&new.parsed_intent).context("Failed to encode parsed intent")?;
        self.conn
            .execute(
                "INSERT INTO jobs (id, user_id, original_command, parsed_intent, job_type, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'queued', ?6, ?6)",
                params![
                    id,
                    new.user_id,
                    new.original_command,
                    intent,
                    new.parsed_intent.action.as_str(),
                    now
                ],
            )
            .context("Failed to insert job")?;
        self.get_job(&id)?
            .context("Job not found after insert")
    }

    pub fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id],
                JobRow::from_row,
            )
            .optional()
            .context("Failed to query job")?;
        row.map(JobRow::into_job).transpose()
    }

    /// Move a job to `status`, appending output and recording fields from
    /// `update`. The read, the transition check and the write happen under
    /// one lock, so concurrent updates cannot reorder a job's lifecycle.
    pub fn update_job_status(&self, id: &str, status: JobStatus, update: JobUpdate) -> Result<Job> {
        let Some(current) = self.get_job(id)? else {
            return Err(StoreError::NotFound { id: id.to_string() }.into());
        };
        if let Err(e) = current.status.check_transition(status) {
            return Err(StoreError::from(e).into());
        }

        let now = Utc::now();
        let started_at = match current.started_at {
            Some(at) => Some(at),
            None if status != JobStatus::Queued => Some(now),
            None => None,
        };
        let completed_at = status.is_terminal().then_some(now);

        let mut output = current.output;
        output.extend(update.append_output);
        let output = serde_json::to_string(&output).context("Failed to encode job output")?;
        let error_message = update.error_message.or(current.error_message);
        let external_job_id = update.external_job_id.or(current.external_job_id);

        self.conn
            .execute(
                "UPDATE jobs SET status = ?1, output = ?2, error_message = ?3, external_job_id = ?4,
                        updated_at = ?5, started_at = ?6, completed_at = ?7
                 WHERE id = ?8",
                params![
                    status.as_str(),
                    output,
                    error_message,
                    external_job_id,
                    timestamp(now),
                    started_at.map(timestamp),
                    completed_at.map(timestamp),
                    id
                ],
            )
            .context("Failed to update job")?;

        self.get_job(id)?.context("Job not found after update")
    }

    /// A user's jobs, newest first.
    pub fn list_jobs(&self, user_id: &str, filter: &JobFilter) -> Result<Vec<Job>> {
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let status = filter.status.map(|s| s.as_str());
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM jobs
                 WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3",
                JOB_COLUMNS
            ))
            .context("Failed to prepare list_jobs")?;
        let rows = stmt
            .query_map(params![user_id, status, limit], JobRow::from_row)
            .context("Failed to query jobs")?;

        let mut jobs = Vec::new();
        for row in rows {
            let row = row.context("Failed to read job row")?;
            jobs.push(row.into_job()?);
        }
        Ok(jobs)
    }
}

const JOB_COLUMNS: &str = "id, user_id, original_command, parsed_intent, job_type, status, output, error_message, external_job_id, created_at, updated_at, started_at, completed_at";

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp '{}'", raw))
}

/// Intermediate row struct for reading jobs from SQLite before converting
/// status / intent / output strings into typed values.
struct JobRow {
    id: String,
    user_id: String,
    original_command: String,
    parsed_intent: String,
    job_type: String,
    status: String,
    output: String,
    error_message: Option<String>,
    external_job_id: Option<String>,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            original_command: row.get(2)?,
            parsed_intent: row.get(3)?,
            job_type: row.get(4)?,
            status: row.get(5)?,
            output: row.get(6)?,
            error_message: row.get(7)?,
            external_job_id: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
            started_at: row.get(11)?,
            completed_at: row.get(12)?,
        })
    }

    fn into_job(self) -> Result<Job> {
        let status = JobStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse job status")?;
        let job_type = Action::from_str(&self.job_type)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse job type")?;
        let parsed_intent: ParsedIntent = serde_json::from_str(&self.parsed_intent)
            .context("Failed to parse intent JSON")?;
        let output: Vec<String> =
            serde_json::from_str(&self.output).context("Failed to parse job output JSON")?;

        Ok(Job {
            id: self.id,
            user_id: self.user_id,
            original_command: self.original_command,
            parsed_intent,
            job_type,
            status,
            output,
            error_message: self.error_message,
            external_job_id: self.external_job_id,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
            started_at: self.started_at.as_deref().map(parse_timestamp).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

/// `JobStore` backed by SQLite.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: DbHandle,
}

impl SqliteJobStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            db: DbHandle::new(JobDb::new(path)?),
        })
    }

    pub fn new_in_memory() -> Result<Self> {
        Ok(Self {
            db: DbHandle::new(JobDb::new_in_memory()?),
        })
    }
}

/// Recover a typed store error raised inside a DB closure.
fn store_error(err: anyhow::Error) -> StoreError {
    match err.downcast::<StoreError>() {
        Ok(e) => e,
        Err(other) => StoreError::Database(other),
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_job(&self, new: NewJob) -> Result<Job, StoreError> {
        self.db
            .call(move |db| db.create_job(&new))
            .await
            .map_err(store_error)
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let id = id.to_string();
        self.db
            .call(move |db| db.get_job(&id))
            .await
            .map_err(store_error)
    }

    async fn update_job_status(
        &self,
        id: &str,
        status: JobStatus,
        update: JobUpdate,
    ) -> Result<Job, StoreError> {
        let id = id.to_string();
        self.db
            .call(move |db| db.update_job_status(&id, status, update))
            .await
            .map_err(store_error)
    }

    async fn list_jobs(&self, user_id: &str, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let user_id = user_id.to_string();
        let filter = filter.clone();
        self.db
            .call(move |db| db.list_jobs(&user_id, &filter))
            .await
            .map_err(store_error)
    }
}
