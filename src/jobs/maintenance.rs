//! Queue maintenance
//!
//! Periodic upkeep of the job table: stale running jobs left behind by a
//! crashed worker are handed back to the queue, and finished jobs past
//! their retention are deleted.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;

use super::{JobQueue, QueueError};

/// Configuration for queue maintenance
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// How often the maintenance pass runs (default: 1 minute)
    pub interval: Duration,
    /// Running jobs locked for longer are requeued (default: 5 minutes)
    pub stale_after: Duration,
    /// Finished jobs older than this are purged (default: 7 days)
    pub retain_finished: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(300),
            retain_finished: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

/// Report from one maintenance pass
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub jobs_requeued: u64,
    pub jobs_purged: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Runs periodic queue maintenance
pub struct QueueMaintenance<Q> {
    queue: Arc<Q>,
    config: MaintenanceConfig,
}

impl<Q: JobQueue> QueueMaintenance<Q> {
    pub fn new(queue: Arc<Q>, config: MaintenanceConfig) -> Self {
        Self { queue, config }
    }

    async fn requeue_stale(&self) -> Result<u64, QueueError> {
        let requeued = self.queue.requeue_stale(self.config.stale_after).await?;
        if requeued > 0 {
            tracing::warn!(jobs_requeued = requeued, "Requeued stale running jobs");
        }
        Ok(requeued)
    }

    async fn purge_finished(&self) -> Result<u64, QueueError> {
        let purged = self.queue.purge_finished(self.config.retain_finished).await?;
        if purged > 0 {
            tracing::info!(jobs_purged = purged, "Purged finished jobs");
        }
        Ok(purged)
    }

    /// Run every maintenance step once
    pub async fn run_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.requeue_stale().await {
            Ok(count) => report.jobs_requeued = count,
            Err(e) => report.errors.push(format!("Stale job requeue: {}", e)),
        }

        match self.purge_finished().await {
            Ok(count) => report.jobs_purged = count,
            Err(e) => report.errors.push(format!("Finished job purge: {}", e)),
        }

        for error in &report.errors {
            tracing::error!(error = %error, "Queue maintenance step failed");
        }

        report.completed_at = Utc::now();
        report
    }

    /// Start maintenance in the background until `shutdown` flips to true
    pub fn start(self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Queue maintenance started");
            let mut ticker = interval(self.config.interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_once().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Queue maintenance stopped");
        })
    }
}
