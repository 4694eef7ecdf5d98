//! # JobStore
//!
//! Durable job state backed by a PostgreSQL table.
//!
//! The store is the source of truth for every job's lifecycle. Queue order
//! lives in the broker; ownership of an attempt is decided here, by the
//! `queued -> running` transition under a row lock.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use uuid::Uuid;

/// Default number of attempts granted to a job when the submitter does not
/// pick one.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Enumeration of errors for operations with the JobStore.
/// Errors that can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("{0} is not a valid JobStatus")]
    ParseJobStatusError(String),
}

/// Enumeration of possible statuses for a Job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "job_status")]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// A job waiting in its lane to be picked up by a worker.
    Queued,
    /// Reserved for delayed execution; no code path produces it yet.
    Scheduled,
    /// A job claimed by a worker and currently being run.
    Running,
    /// A job whose last attempt succeeded. Terminal.
    Completed,
    /// A job that exhausted its attempts and was quarantined. Terminal.
    Failed,
}

/// Allow casting JobStatus from strings.
impl FromStr for JobStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "scheduled" => Ok(JobStatus::Scheduled),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            invalid => Err(StoreError::ParseJobStatusError(invalid.to_owned())),
        }
    }
}

/// A durably recorded job. Serializes to the JSON shape used both by the
/// API read surface and by DLQ snapshots.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Job {
    /// A unique id identifying a job, allocated at submission.
    pub id: Uuid,
    /// The tag keyed into the processor registry.
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub job_type: String,
    /// Opaque JSON parameters; each processor defines its own schema.
    pub payload: sqlx::types::Json<serde_json::Value>,
    /// The current status of the job.
    pub status: JobStatus,
    /// Number of failed attempts so far.
    pub retry_count: i32,
    /// Failed attempts allowed before the job is quarantined.
    pub max_retries: i32,
    /// Ownership key used for access control at the API edge; opaque here.
    pub project_id: Uuid,
    /// Wall time of the last attempt, in milliseconds.
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    /// Liveness heartbeat: advances on every status write, read by the reaper.
    pub updated_at: DateTime<Utc>,
}

/// A job to be inserted into the store by the submission API.
pub struct NewJob {
    /// Caller-supplied id; one is allocated when absent.
    pub id: Option<Uuid>,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub project_id: Uuid,
    pub max_retries: i32,
}

impl NewJob {
    pub fn new(job_type: &str, payload: serde_json::Value, project_id: Uuid) -> Self {
        Self {
            id: None,
            job_type: job_type.to_owned(),
            payload,
            project_id,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Transactional store of job rows on top of PostgreSQL.
pub struct JobStore {
    /// A connection pool used to connect to the PostgreSQL database.
    pool: PgPool,
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl JobStore {
    /// Initialize a new JobStore backed by the `jobs` table.
    pub async fn new(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    /// Initialize a JobStore from an existing connection pool, e.g. one
    /// provided by `sqlx::test`.
    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new row in `queued` state and return it.
    /// We take ownership of NewJob to enforce a specific NewJob is only inserted once.
    pub async fn insert(&self, new_job: NewJob) -> StoreResult<Job> {
        let id = new_job.id.unwrap_or_else(Uuid::now_v7);

        sqlx::query_as(
            r#"
INSERT INTO jobs
    (id, type, payload, status, retry_count, max_retries, project_id, created_at, updated_at)
VALUES
    ($1, $2, $3, 'queued'::job_status, 0, $4, $5, NOW(), NOW())
RETURNING
    *
            "#,
        )
        .bind(id)
        .bind(&new_job.job_type)
        .bind(sqlx::types::Json(&new_job.payload))
        .bind(new_job.max_retries)
        .bind(new_job.project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "INSERT".to_owned(),
            error,
        })
    }

    /// Fetch a job by id.
    pub async fn fetch(&self, id: Uuid) -> StoreResult<Option<Job>> {
        sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })
    }

    /// List a project's jobs, newest first.
    pub async fn list_by_project(&self, project_id: Uuid) -> StoreResult<Vec<Job>> {
        sqlx::query_as("SELECT * FROM jobs WHERE project_id = $1 ORDER BY created_at DESC")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })
    }

    /// Acquire the lease on a job attempt: lock the row, verify it is still
    /// `queued`, and transition it to `running`.
    ///
    /// Returns `None` when the row is missing or when another worker (or the
    /// reaper) already owns the attempt. Duplicate lane entries for the same
    /// id are safe because only the transaction that observes `queued` wins.
    pub async fn claim(&self, id: Uuid) -> StoreResult<Option<Job>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| StoreError::QueryError {
                command: "BEGIN".to_owned(),
                error,
            })?;

        let job: Option<Job> = sqlx::query_as("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        let Some(job) = job else {
            return Ok(None);
        };

        if job.status != JobStatus::Queued {
            tx.rollback()
                .await
                .map_err(|error| StoreError::QueryError {
                    command: "ROLLBACK".to_owned(),
                    error,
                })?;
            return Ok(None);
        }

        let job: Job = sqlx::query_as(
            r#"
UPDATE jobs
SET
    status = 'running'::job_status,
    updated_at = NOW()
WHERE id = $1
RETURNING
    *
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        tx.commit().await.map_err(|error| StoreError::QueryError {
            command: "COMMIT".to_owned(),
            error,
        })?;

        Ok(Some(job))
    }

    /// Record a successful attempt. Returns false when the lease was lost,
    /// i.e. the row is no longer `running`; terminal rows are never touched.
    pub async fn mark_completed(&self, id: Uuid, duration_ms: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
UPDATE jobs
SET
    status = 'completed'::job_status,
    duration_ms = $2,
    updated_at = NOW()
WHERE id = $1 AND status = 'running'::job_status
            "#,
        )
        .bind(id)
        .bind(duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Return a job to its lane's backlog after a retriable failure.
    /// Returns false when the lease was lost.
    pub async fn mark_retryable(
        &self,
        id: Uuid,
        retry_count: i32,
        duration_ms: i64,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
UPDATE jobs
SET
    status = 'queued'::job_status,
    retry_count = $2,
    duration_ms = $3,
    updated_at = NOW()
WHERE id = $1 AND status = 'running'::job_status
            "#,
        )
        .bind(id)
        .bind(retry_count)
        .bind(duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Quarantine a job that exhausted its attempts.
    /// Returns false when the lease was lost.
    pub async fn mark_failed(
        &self,
        id: Uuid,
        retry_count: i32,
        duration_ms: i64,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
UPDATE jobs
SET
    status = 'failed'::job_status,
    retry_count = $2,
    duration_ms = $3,
    updated_at = NOW()
WHERE id = $1 AND status = 'running'::job_status
            "#,
        )
        .bind(id)
        .bind(retry_count)
        .bind(duration_ms)
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        Ok(result.rows_affected() > 0)
    }

    /// Rows in `running` whose heartbeat is older than the threshold. These
    /// belong to workers presumed dead and are owned by the reaper.
    pub async fn stuck(&self, older_than: chrono::Duration) -> StoreResult<Vec<Job>> {
        let cutoff = Utc::now() - older_than;

        sqlx::query_as("SELECT * FROM jobs WHERE status = 'running'::job_status AND updated_at < $1")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })
    }

    /// Open a transaction for a multi-step recovery (see `requeue_in_tx`).
    pub async fn begin(&self) -> StoreResult<sqlx::Transaction<'static, sqlx::Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|error| StoreError::QueryError {
                command: "BEGIN".to_owned(),
                error,
            })
    }

    /// Reset a stuck row to `queued` inside the caller's transaction, so the
    /// matching broker push can happen before the commit. Returns false when
    /// the row is no longer `running`.
    pub async fn requeue_in_tx(
        &self,
        tx: &mut sqlx::Transaction<'static, sqlx::Postgres>,
        id: Uuid,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
UPDATE jobs
SET
    status = 'queued'::job_status,
    updated_at = NOW()
WHERE id = $1 AND status = 'running'::job_status
            "#,
        )
        .bind(id)
        .execute(&mut **tx)
        .await
        .map_err(|error| StoreError::QueryError {
            command: "UPDATE".to_owned(),
            error,
        })?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::seed_project;

    use serde_json::json;
    use sqlx::PgPool;

    #[sqlx::test(migrations = "../migrations")]
    async fn test_insert_and_fetch(db: PgPool) {
        let store = JobStore::new_from_pool(db.clone());
        let project_id = seed_project(&db).await;

        let inserted = store
            .insert(NewJob::new("email", json!({"to": "a@b.com"}), project_id))
            .await
            .expect("failed to insert job");

        assert_eq!(inserted.status, JobStatus::Queued);
        assert_eq!(inserted.retry_count, 0);
        assert_eq!(inserted.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(inserted.job_type, "email");

        let fetched = store
            .fetch(inserted.id)
            .await
            .expect("failed to fetch job")
            .expect("job not found");

        assert_eq!(fetched.id, inserted.id);
        assert_eq!(fetched.payload.0, json!({"to": "a@b.com"}));
        assert_eq!(fetched.project_id, project_id);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_insert_honors_caller_supplied_id(db: PgPool) {
        let store = JobStore::new_from_pool(db.clone());
        let project_id = seed_project(&db).await;

        let id = Uuid::now_v7();
        let mut new_job = NewJob::new("pdf", json!({}), project_id);
        new_job.id = Some(id);

        let inserted = store.insert(new_job).await.expect("failed to insert job");
        assert_eq!(inserted.id, id);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_claim_wins_exactly_once(db: PgPool) {
        let store = JobStore::new_from_pool(db.clone());
        let project_id = seed_project(&db).await;

        let job = store
            .insert(NewJob::new("email", json!({}), project_id))
            .await
            .expect("failed to insert job");

        let first = store.claim(job.id).await.expect("first claim errored");
        let second = store.claim(job.id).await.expect("second claim errored");

        let claimed = first.expect("first claim should win the lease");
        assert_eq!(claimed.status, JobStatus::Running);
        assert!(second.is_none(), "second claim must observe non-queued");
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_claim_missing_row(db: PgPool) {
        let store = JobStore::new_from_pool(db);

        let claimed = store.claim(Uuid::now_v7()).await.expect("claim errored");
        assert!(claimed.is_none());
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_status_writes_require_the_lease(db: PgPool) {
        let store = JobStore::new_from_pool(db.clone());
        let project_id = seed_project(&db).await;

        let job = store
            .insert(NewJob::new("email", json!({}), project_id))
            .await
            .expect("failed to insert job");

        // Still queued: no lease, no write.
        assert!(!store.mark_completed(job.id, 5).await.expect("update errored"));

        store
            .claim(job.id)
            .await
            .expect("claim errored")
            .expect("claim should win");
        assert!(store.mark_completed(job.id, 5).await.expect("update errored"));

        // Terminal rows are never overwritten.
        assert!(!store.mark_failed(job.id, 1, 5).await.expect("update errored"));
        assert!(!store.mark_retryable(job.id, 1, 5).await.expect("update errored"));

        let fetched = store
            .fetch(job.id)
            .await
            .expect("failed to fetch job")
            .expect("job not found");
        assert_eq!(fetched.status, JobStatus::Completed);
        assert_eq!(fetched.duration_ms, Some(5));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_mark_retryable_returns_job_to_queued(db: PgPool) {
        let store = JobStore::new_from_pool(db.clone());
        let project_id = seed_project(&db).await;

        let job = store
            .insert(NewJob::new("email", json!({}), project_id))
            .await
            .expect("failed to insert job");
        store
            .claim(job.id)
            .await
            .expect("claim errored")
            .expect("claim should win");

        assert!(store.mark_retryable(job.id, 1, 42).await.expect("update errored"));

        let fetched = store
            .fetch(job.id)
            .await
            .expect("failed to fetch job")
            .expect("job not found");
        assert_eq!(fetched.status, JobStatus::Queued);
        assert_eq!(fetched.retry_count, 1);
        assert_eq!(fetched.duration_ms, Some(42));
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_stuck_selects_only_stale_running_rows(db: PgPool) {
        let store = JobStore::new_from_pool(db.clone());
        let project_id = seed_project(&db).await;

        let stale = store
            .insert(NewJob::new("email", json!({}), project_id))
            .await
            .expect("failed to insert job");
        let fresh = store
            .insert(NewJob::new("email", json!({}), project_id))
            .await
            .expect("failed to insert job");

        store
            .claim(stale.id)
            .await
            .expect("claim errored")
            .expect("claim should win");
        store
            .claim(fresh.id)
            .await
            .expect("claim errored")
            .expect("claim should win");

        sqlx::query("UPDATE jobs SET updated_at = NOW() - INTERVAL '2 hours' WHERE id = $1")
            .bind(stale.id)
            .execute(&db)
            .await
            .expect("failed to backdate job");

        let stuck = store
            .stuck(chrono::Duration::hours(1))
            .await
            .expect("stuck query errored");

        assert_eq!(stuck.len(), 1);
        assert_eq!(stuck[0].id, stale.id);
    }

    #[sqlx::test(migrations = "../migrations")]
    async fn test_requeue_in_tx(db: PgPool) {
        let store = JobStore::new_from_pool(db.clone());
        let project_id = seed_project(&db).await;

        let job = store
            .insert(NewJob::new("email", json!({}), project_id))
            .await
            .expect("failed to insert job");
        store
            .claim(job.id)
            .await
            .expect("claim errored")
            .expect("claim should win");

        let mut tx = store.begin().await.expect("begin errored");
        assert!(store
            .requeue_in_tx(&mut tx, job.id)
            .await
            .expect("requeue errored"));
        tx.commit().await.expect("commit errored");

        let fetched = store
            .fetch(job.id)
            .await
            .expect("failed to fetch job")
            .expect("job not found");
        assert_eq!(fetched.status, JobStatus::Queued);

        // A row that is not running any more is left alone.
        let mut tx = store.begin().await.expect("begin errored");
        assert!(!store
            .requeue_in_tx(&mut tx, job.id)
            .await
            .expect("requeue errored"));
        tx.rollback().await.expect("rollback errored");
    }
}
