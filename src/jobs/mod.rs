//! Job Queue Bridge
//!
//! Durable, at-least-once queue for the "reset all balances" job.
//! A producer enqueues, a single worker claims one job at a time and runs
//! the ledger reset, and a maintenance task recovers jobs orphaned by a
//! crashed worker and purges finished ones.

pub mod maintenance;
pub mod memory;
pub mod postgres;
pub mod worker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub use maintenance::{MaintenanceConfig, MaintenanceReport, QueueMaintenance};
pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;
pub use worker::{ResetAllProducer, ResetWorker, WorkerConfig};

pub type JobId = Uuid;

/// Kinds of queued work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    #[serde(rename = "resetAllUsersBalance")]
    ResetAllUsersBalance,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ResetAllUsersBalance => "resetAllUsersBalance",
        }
    }
}

impl FromStr for JobKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resetAllUsersBalance" => Ok(JobKind::ResetAllUsersBalance),
            other => Err(QueueError::Corrupt(format!("unknown job kind '{other}'"))),
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle: queued -> running -> completed | failed, with running
/// returning to queued on a retryable failure or crash recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(QueueError::Corrupt(format!("unknown job status '{other}'"))),
        }
    }
}

/// A queued job and its delivery state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    /// Deliveries so far, incremented on every claim
    pub attempts: i32,
    pub max_attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Earliest time the job may be claimed
    pub run_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(kind: JobKind, max_attempts: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
            run_at: now,
            locked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Redelivery policy for retryable failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    /// Base delay, multiplied by the attempt number
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(2000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next delivery after `attempts` deliveries (linear)
    pub fn delay_for(&self, attempts: i32) -> Duration {
        let factor = u32::try_from(attempts.max(1)).unwrap_or(1);
        self.backoff.saturating_mul(factor)
    }
}

/// Last error recorded on a job whose worker stopped mid-run
pub const WORKER_LOST: &str = "worker lost";

/// Queue errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job is not running: {0}")]
    NotRunning(JobId),

    #[error("Corrupt job row: {0}")]
    Corrupt(String),
}

/// Durable at-least-once job queue
#[async_trait]
pub trait JobQueue: Send + Sync + 'static {
    async fn enqueue(&self, kind: JobKind, max_attempts: i32) -> Result<Job, QueueError>;

    /// Claim the oldest due job and mark it running. Returns `None` when
    /// nothing is due or another job is already running.
    async fn claim(&self) -> Result<Option<Job>, QueueError>;

    async fn complete(&self, id: JobId) -> Result<Job, QueueError>;

    /// Record a failed delivery. With `retry_after` set and attempts left,
    /// the job is queued again after the delay; otherwise it is failed.
    async fn fail(
        &self,
        id: JobId,
        error: &str,
        retry_after: Option<Duration>,
    ) -> Result<Job, QueueError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError>;

    /// Return running jobs locked longer than `older_than` to the queue.
    /// Jobs with no attempts left are failed with [`WORKER_LOST`] instead.
    /// Returns how many jobs were recovered either way.
    async fn requeue_stale(&self, older_than: Duration) -> Result<u64, QueueError>;

    /// Delete completed and failed jobs last updated before `older_than`
    async fn purge_finished(&self, older_than: Duration) -> Result<u64, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(JobKind::ResetAllUsersBalance.as_str(), "resetAllUsersBalance");
        assert_eq!(
            "resetAllUsersBalance".parse::<JobKind>().unwrap(),
            JobKind::ResetAllUsersBalance
        );
        assert!("mint".parse::<JobKind>().is_err());

        let json = serde_json::to_string(&JobKind::ResetAllUsersBalance).unwrap();
        assert_eq!(json, "\"resetAllUsersBalance\"");
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!(JobStatus::Failed.is_finished());
        assert!(!JobStatus::Running.is_finished());
    }

    #[test]
    fn test_retry_delay_is_linear() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(1500));
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = Job::new(JobKind::ResetAllUsersBalance, 0);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.max_attempts, 1);
        assert!(job.has_attempts_left());
    }
}
