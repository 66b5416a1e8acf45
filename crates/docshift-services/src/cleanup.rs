use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use docshift_core::AppError;
use docshift_db::{AccountStore, JobStore};
use docshift_storage::{remove_file, ClientPartitions};

/// What one sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub accounts_removed: usize,
    pub jobs_removed: usize,
    pub orphans_removed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.accounts_removed + self.jobs_removed + self.orphans_removed
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Periodically reclaims expired accounts, expired jobs and output files no
/// job accounts for.
pub struct ExpirySweeper {
    jobs: Arc<dyn JobStore>,
    accounts: Arc<dyn AccountStore>,
    partitions: ClientPartitions,
    sweep_interval: StdDuration,
    orphan_grace: Duration,
}

impl ExpirySweeper {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        accounts: Arc<dyn AccountStore>,
        partitions: ClientPartitions,
        sweep_interval: StdDuration,
        orphan_grace: Duration,
    ) -> Self {
        Self {
            jobs,
            accounts,
            partitions,
            sweep_interval,
            orphan_grace,
        }
    }

    /// Start the background sweep task.
    /// Returns a JoinHandle for graceful shutdown
    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut sweep_interval = interval(self.sweep_interval);
            sweep_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("Expiry sweeper shutting down");
                        break;
                    }
                    _ = sweep_interval.tick() => {
                        tracing::debug!("Starting scheduled expiry sweep");
                        self.run_once().await;
                    }
                }
            }
        })
    }

    pub async fn run_once(&self) -> SweepReport {
        self.run_at(Utc::now()).await
    }

    /// One full sweep as of `now`. Individual failures are logged and the
    /// sweep carries on.
    #[tracing::instrument(skip(self), fields(cleanup.operation = "sweep"))]
    pub async fn run_at(&self, now: DateTime<Utc>) -> SweepReport {
        let accounts_removed = match self.sweep_expired_accounts(now).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to sweep expired accounts");
                0
            }
        };

        let jobs_removed = match self.sweep_expired_jobs(now).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to sweep expired jobs");
                0
            }
        };

        let orphans_removed = match self.sweep_orphans(now).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to sweep orphaned outputs");
                0
            }
        };

        let report = SweepReport {
            accounts_removed,
            jobs_removed,
            orphans_removed,
        };

        if report.is_empty() {
            tracing::debug!("Expiry sweep found nothing to remove");
        } else {
            tracing::info!(
                accounts_removed,
                jobs_removed,
                orphans_removed,
                "Expiry sweep completed"
            );
        }
        report
    }

    #[tracing::instrument(skip(self), fields(cleanup.target = "accounts"))]
    async fn sweep_expired_accounts(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let expired = self.accounts.list_expired(now).await?;
        let mut removed = 0;

        for account in expired {
            tracing::info!(
                client_id = %account.client_id,
                expires_at = %account.expires_at,
                "Removing expired client storage"
            );

            // Keep the record while files remain so the next sweep retries.
            if let Err(e) = self.partitions.remove_client(account.client_id).await {
                tracing::error!(
                    error = %e,
                    client_id = %account.client_id,
                    "Failed to remove client partitions, keeping account"
                );
                continue;
            }

            match self.accounts.delete(account.client_id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        client_id = %account.client_id,
                        "Failed to delete client storage account"
                    );
                }
            }
        }

        Ok(removed)
    }

    #[tracing::instrument(skip(self), fields(cleanup.target = "jobs"))]
    async fn sweep_expired_jobs(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let expired = self.jobs.list_expired(now).await?;
        let mut removed = 0;

        for job in expired {
            tracing::info!(
                job_id = %job.id,
                status = %job.status,
                expires_at = %job.expires_at,
                "Deleting expired job"
            );

            let artifacts = job
                .output_path()
                .into_iter()
                .chain(std::iter::once(job.input_path()));
            for path in artifacts {
                if let Err(e) = remove_file(path).await {
                    tracing::error!(
                        error = %e,
                        job_id = %job.id,
                        path = %path.display(),
                        "Failed to delete job artifact, continuing with record deletion"
                    );
                }
            }

            match self.jobs.delete(job.id).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(error = %e, job_id = %job.id, "Failed to delete job record");
                }
            }
        }

        Ok(removed)
    }

    /// Output files whose name is not a known job ID and that are older than
    /// the grace period.
    #[tracing::instrument(skip(self), fields(cleanup.target = "orphans"))]
    async fn sweep_orphans(&self, now: DateTime<Utc>) -> Result<usize, AppError> {
        let cutoff = now - self.orphan_grace;
        let files = self.partitions.list_output_files().await?;
        let mut removed = 0;

        for file in files {
            let Some(modified) = file.modified else {
                continue;
            };
            if modified >= cutoff {
                continue;
            }

            if let Ok(job_id) = Uuid::parse_str(&file.stem) {
                match self.jobs.exists(job_id).await {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, job_id = %job_id, "Could not check job for output file, skipping");
                        continue;
                    }
                }
            }

            if self.remove_orphan(&file.path, &file.partition).await {
                removed += 1;
            }
        }

        Ok(removed)
    }

    async fn remove_orphan(&self, path: &Path, partition: &str) -> bool {
        match remove_file(path).await {
            Ok(removed) => {
                if removed {
                    tracing::info!(path = %path.display(), partition = %partition, "Removed orphaned output");
                }
                removed
            }
            Err(e) => {
                tracing::error!(error = %e, path = %path.display(), "Failed to remove orphaned output");
                false
            }
        }
    }
}
