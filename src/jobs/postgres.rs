//! Postgres polling queue over the `balance_jobs` table
//!
//! Claims use `FOR UPDATE SKIP LOCKED`, so competing workers never block
//! on each other, and a partial unique index allows at most one running
//! job at any time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use super::{Job, JobId, JobKind, JobQueue, QueueError, WORKER_LOST};

const JOB_COLUMNS: &str = "id, kind, status, attempts, max_attempts, last_error, \
                           run_at, locked_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    kind: String,
    status: String,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
    run_at: DateTime<Utc>,
    locked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            kind: row.kind.parse()?,
            status: row.status.parse()?,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            last_error: row.last_error,
            run_at: row.run_at,
            locked_at: row.locked_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Job queue backed by Postgres
#[derive(Debug, Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, kind: JobKind, max_attempts: i32) -> Result<Job, QueueError> {
        let job = Job::new(kind, max_attempts);

        let row: JobRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO balance_jobs (id, kind, status, attempts, max_attempts, run_at)
            VALUES ($1, $2, 'queued', 0, $3, NOW())
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.id)
        .bind(kind.as_str())
        .bind(job.max_attempts)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(job_id = %row.id, kind = %kind, "job enqueued");
        row.try_into()
    }

    async fn claim(&self) -> Result<Option<Job>, QueueError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE balance_jobs
            SET status = 'running',
                attempts = attempts + 1,
                locked_at = NOW(),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM balance_jobs
                WHERE status = 'queued'
                  AND run_at <= NOW()
                  AND NOT EXISTS (
                      SELECT 1 FROM balance_jobs WHERE status = 'running'
                  )
                ORDER BY run_at, created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let job = Job::try_from(row)?;
                tracing::debug!(job_id = %job.id, attempts = job.attempts, "job claimed");
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, id: JobId) -> Result<Job, QueueError> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE balance_jobs
            SET status = 'completed',
                locked_at = NULL,
                last_error = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(QueueError::NotRunning(id))?.try_into()
    }

    async fn fail(
        &self,
        id: JobId,
        error: &str,
        retry_after: Option<Duration>,
    ) -> Result<Job, QueueError> {
        let retry = retry_after.is_some();
        let delay_secs = retry_after.map(|d| d.as_secs_f64()).unwrap_or(0.0);

        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE balance_jobs
            SET status = CASE WHEN $3 AND attempts < max_attempts
                              THEN 'queued' ELSE 'failed' END,
                run_at = CASE WHEN $3 AND attempts < max_attempts
                              THEN NOW() + make_interval(secs => $4) ELSE run_at END,
                last_error = $2,
                locked_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(error)
        .bind(retry)
        .bind(delay_secs)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(QueueError::NotRunning(id))?.try_into()
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM balance_jobs WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(Job::try_from).transpose()
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE balance_jobs
            SET status = CASE WHEN attempts < max_attempts THEN 'queued' ELSE 'failed' END,
                last_error = CASE WHEN attempts < max_attempts THEN last_error ELSE $2 END,
                locked_at = NULL,
                updated_at = NOW()
            WHERE status = 'running'
              AND locked_at <= NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(older_than.as_secs_f64())
        .bind(WORKER_LOST)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn purge_finished(&self, older_than: Duration) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            DELETE FROM balance_jobs
            WHERE status IN ('completed', 'failed')
              AND updated_at <= NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(older_than.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
