//! Reset producer and worker

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::Instrument;

use crate::ledger::{Ledger, LedgerError, ResetReport};
use crate::store::LedgerStore;

use super::{Job, JobId, JobKind, JobQueue, JobStatus, QueueError, RetryPolicy};

/// Publishes reset requests to the queue
pub struct ResetAllProducer<Q> {
    queue: Arc<Q>,
    retry: RetryPolicy,
}

impl<Q> Clone for ResetAllProducer<Q> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            retry: self.retry,
        }
    }
}

impl<Q: JobQueue> ResetAllProducer<Q> {
    pub fn new(queue: Arc<Q>, retry: RetryPolicy) -> Self {
        Self { queue, retry }
    }

    /// Enqueue one reset job and return without waiting for it to run
    pub async fn enqueue_reset_all(&self) -> Result<Job, QueueError> {
        self.queue
            .enqueue(JobKind::ResetAllUsersBalance, self.retry.max_attempts)
            .await
    }

    pub async fn job(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        self.queue.get(id).await
    }
}

/// Worker settings
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            retry: RetryPolicy::default(),
        }
    }
}

/// Claims queued jobs one at a time and runs them against the ledger
pub struct ResetWorker<S, Q> {
    ledger: Ledger<S>,
    queue: Arc<Q>,
    config: WorkerConfig,
}

impl<S: LedgerStore, Q: JobQueue> ResetWorker<S, Q> {
    pub fn new(ledger: Ledger<S>, queue: Arc<Q>, config: WorkerConfig) -> Self {
        Self {
            ledger,
            queue,
            config,
        }
    }

    /// Claim and run at most one job, returning its state afterwards
    pub async fn run_once(&self) -> Result<Option<Job>, QueueError> {
        let Some(job) = self.queue.claim().await? else {
            return Ok(None);
        };

        tracing::info!(
            job_id = %job.id,
            kind = %job.kind,
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            "job started"
        );

        let span = tracing::info_span!("job", job_id = %job.id, attempt = job.attempts);
        let outcome = match job.kind {
            JobKind::ResetAllUsersBalance => self.ledger.reset_all_balances().instrument(span).await,
        };

        let finished = self.settle(&job, outcome).await?;
        Ok(Some(finished))
    }

    async fn settle(
        &self,
        job: &Job,
        outcome: Result<ResetReport, LedgerError>,
    ) -> Result<Job, QueueError> {
        match outcome {
            Ok(report) => {
                tracing::info!(
                    job_id = %job.id,
                    accounts_reset = report.accounts_reset,
                    total_amount = %report.total_amount,
                    "job completed"
                );
                self.queue.complete(job.id).await
            }
            Err(err) => {
                let retry_after = err
                    .is_retryable()
                    .then(|| self.config.retry.delay_for(job.attempts));

                let updated = self.queue.fail(job.id, &err.to_string(), retry_after).await?;
                if updated.status == JobStatus::Queued {
                    tracing::warn!(
                        job_id = %job.id,
                        attempt = job.attempts,
                        retry_in_ms = retry_after.map(|d| d.as_millis() as u64),
                        error = %err,
                        "job failed, will retry"
                    );
                } else {
                    tracing::error!(
                        job_id = %job.id,
                        attempt = job.attempts,
                        error = %err,
                        "job failed permanently"
                    );
                }
                Ok(updated)
            }
        }
    }

    /// Poll the queue until `shutdown` flips to true
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!(
                poll_interval_ms = self.config.poll_interval.as_millis() as u64,
                "reset worker started"
            );
            let mut ticker = interval(self.config.poll_interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Drain everything that is due before sleeping again
                        loop {
                            match self.run_once().await {
                                Ok(Some(_)) => continue,
                                Ok(None) => break,
                                Err(e) => {
                                    tracing::error!(error = %e, "job queue poll failed");
                                    break;
                                }
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("reset worker stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::MemoryJobQueue;
    use crate::ledger::LedgerConfig;
    use crate::store::{AccountStore, MemoryStore, UnitOfWork};
    use crate::domain::Amount;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    async fn funded_ledger() -> Ledger<MemoryStore> {
        let ledger = Ledger::new(Arc::new(MemoryStore::new()), LedgerConfig::default());
        for id in [1, 2] {
            ledger.open_account(id).await.unwrap();
            ledger
                .add(id, Amount::new(dec!(50)).unwrap())
                .await
                .unwrap();
        }
        ledger
    }

    fn retry(max_attempts: i32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_worker_runs_reset_once() {
        let ledger = funded_ledger().await;
        let queue = Arc::new(MemoryJobQueue::new());
        let producer = ResetAllProducer::new(Arc::clone(&queue), retry(3));
        let worker = ResetWorker::new(ledger.clone(), Arc::clone(&queue), WorkerConfig::default());

        let job = producer.enqueue_reset_all().await.unwrap();
        assert_eq!(job.kind, JobKind::ResetAllUsersBalance);
        // Enqueue alone changes nothing
        assert_eq!(ledger.store().total_balance(), dec!(100));

        let done = worker.run_once().await.unwrap().unwrap();
        assert_eq!(done.id, job.id);
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(ledger.store().total_balance(), Decimal::ZERO);

        assert!(worker.run_once().await.unwrap().is_none());
        let stored = producer.job(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_redelivered_job_is_noop() {
        let ledger = funded_ledger().await;
        let queue = Arc::new(MemoryJobQueue::new());
        let producer = ResetAllProducer::new(Arc::clone(&queue), retry(3));
        let worker = ResetWorker::new(ledger.clone(), Arc::clone(&queue), WorkerConfig::default());

        producer.enqueue_reset_all().await.unwrap();
        producer.enqueue_reset_all().await.unwrap();
        worker.run_once().await.unwrap().unwrap();
        let records = ledger.store().record_count();

        let second = worker.run_once().await.unwrap().unwrap();
        assert_eq!(second.status, JobStatus::Completed);
        assert_eq!(ledger.store().record_count(), records);
    }

    #[tokio::test]
    async fn test_internal_failure_is_retried_then_failed() {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(
            Arc::clone(&store),
            LedgerConfig {
                unit_timeout: Duration::from_millis(30),
            },
        );
        ledger.open_account(1).await.unwrap();
        ledger.add(1, Amount::new(dec!(10)).unwrap()).await.unwrap();

        let queue = Arc::new(MemoryJobQueue::new());
        let producer = ResetAllProducer::new(Arc::clone(&queue), retry(2));
        let worker = ResetWorker::new(
            ledger.clone(),
            Arc::clone(&queue),
            WorkerConfig {
                poll_interval: Duration::from_millis(10),
                retry: retry(2),
            },
        );

        // Hold the row lock so every reset attempt times out
        let mut blocker = store.begin().await.unwrap();
        blocker.lock_and_get(1).await.unwrap();

        let job = producer.enqueue_reset_all().await.unwrap();
        let first = worker.run_once().await.unwrap().unwrap();
        assert_eq!(first.status, JobStatus::Queued);
        assert!(first.last_error.is_some());

        queue.make_due(job.id);
        let second = worker.run_once().await.unwrap().unwrap();
        assert_eq!(second.status, JobStatus::Failed);
        assert_eq!(second.attempts, 2);

        blocker.rollback().await.unwrap();
        assert_eq!(store.total_balance(), dec!(10));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let ledger = funded_ledger().await;
        let queue = Arc::new(MemoryJobQueue::new());
        let producer = ResetAllProducer::new(Arc::clone(&queue), retry(3));
        let worker = ResetWorker::new(
            ledger.clone(),
            Arc::clone(&queue),
            WorkerConfig {
                poll_interval: Duration::from_millis(10),
                retry: retry(3),
            },
        );

        let (tx, rx) = watch::channel(false);
        let handle = worker.start(rx);

        let job = producer.enqueue_reset_all().await.unwrap();
        let mut status = JobStatus::Queued;
        for _ in 0..100 {
            status = producer.job(job.id).await.unwrap().unwrap().status;
            if status.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(ledger.store().total_balance(), Decimal::ZERO);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
