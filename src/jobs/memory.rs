//! In-memory job queue for tests and local runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{Job, JobId, JobKind, JobQueue, JobStatus, QueueError, WORKER_LOST};

/// Job queue kept in process memory, in enqueue order
#[derive(Debug, Default)]
pub struct MemoryJobQueue {
    jobs: Mutex<Vec<Job>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn running_mut(jobs: &mut [Job], id: JobId) -> Result<&mut Job, QueueError> {
        let job = jobs
            .iter_mut()
            .find(|job| job.id == id)
            .ok_or(QueueError::NotFound(id))?;
        if job.status != JobStatus::Running {
            return Err(QueueError::NotRunning(id));
        }
        Ok(job)
    }

    /// Every job currently stored
    pub fn snapshot(&self) -> Vec<Job> {
        self.jobs().clone()
    }

    /// Make a queued job due now, skipping its backoff delay
    pub fn make_due(&self, id: JobId) {
        if let Some(job) = self.jobs().iter_mut().find(|job| job.id == id) {
            job.run_at = Utc::now();
        }
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, kind: JobKind, max_attempts: i32) -> Result<Job, QueueError> {
        let job = Job::new(kind, max_attempts);
        self.jobs().push(job.clone());
        tracing::info!(job_id = %job.id, kind = %kind, "job enqueued");
        Ok(job)
    }

    async fn claim(&self) -> Result<Option<Job>, QueueError> {
        let mut jobs = self.jobs();
        if jobs.iter().any(|job| job.status == JobStatus::Running) {
            return Ok(None);
        }

        let now = Utc::now();
        let next = jobs
            .iter_mut()
            .filter(|job| job.status == JobStatus::Queued && job.run_at <= now)
            .min_by_key(|job| (job.run_at, job.created_at));

        Ok(next.map(|job| {
            job.status = JobStatus::Running;
            job.attempts += 1;
            job.locked_at = Some(now);
            job.updated_at = now;
            job.clone()
        }))
    }

    async fn complete(&self, id: JobId) -> Result<Job, QueueError> {
        let mut jobs = self.jobs();
        let job = Self::running_mut(&mut jobs, id)?;
        job.status = JobStatus::Completed;
        job.locked_at = None;
        job.last_error = None;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn fail(
        &self,
        id: JobId,
        error: &str,
        retry_after: Option<Duration>,
    ) -> Result<Job, QueueError> {
        let mut jobs = self.jobs();
        let job = Self::running_mut(&mut jobs, id)?;
        let now = Utc::now();

        match retry_after {
            Some(delay) if job.has_attempts_left() => {
                job.status = JobStatus::Queued;
                job.run_at = after(now, delay);
            }
            _ => job.status = JobStatus::Failed,
        }
        job.last_error = Some(error.to_string());
        job.locked_at = None;
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.jobs().iter().find(|job| job.id == id).cloned())
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64, QueueError> {
        let now = Utc::now();
        let cutoff = before(now, older_than);
        let mut requeued = 0;

        for job in self.jobs().iter_mut() {
            let stale = job.status == JobStatus::Running
                && job.locked_at.map_or(false, |locked| locked <= cutoff);
            if stale {
                if job.has_attempts_left() {
                    job.status = JobStatus::Queued;
                } else {
                    job.status = JobStatus::Failed;
                    job.last_error = Some(WORKER_LOST.to_string());
                }
                job.locked_at = None;
                job.updated_at = now;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn purge_finished(&self, older_than: Duration) -> Result<u64, QueueError> {
        let cutoff = before(Utc::now(), older_than);
        let mut jobs = self.jobs();
        let stored = jobs.len();
        jobs.retain(|job| !(job.status.is_finished() && job.updated_at <= cutoff));
        Ok((stored - jobs.len()) as u64)
    }
}
