use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use docshift_core::constants::{
    DEFAULT_COMPLETED_RETENTION_SECS, DEFAULT_FAILED_RETENTION_SECS,
    DEFAULT_PENDING_RETENTION_HOURS,
};
use docshift_core::models::{ConversionKind, Job, JobStatus};
use docshift_core::{validate_filename, AppError, Config, TransitionError};
use docshift_db::JobStore;
use docshift_storage::ClientPartitions;

/// How long a job record and its artifacts are kept in each phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub pending: Duration,
    pub completed: Duration,
    pub failed: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            pending: Duration::hours(DEFAULT_PENDING_RETENTION_HOURS),
            completed: Duration::seconds(DEFAULT_COMPLETED_RETENTION_SECS),
            failed: Duration::seconds(DEFAULT_FAILED_RETENTION_SECS),
        }
    }
}

impl RetentionPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pending: config.pending_retention(),
            completed: config.completed_retention(),
            failed: config.failed_retention(),
        }
    }
}

/// Owns job records and every status change they go through.
///
/// Each transition is a single conditional write on the previous status, so
/// concurrent callers racing on one job see exactly one winner; the others
/// get [`TransitionError::InvalidTransition`].
#[derive(Clone)]
pub struct JobLifecycleManager {
    store: Arc<dyn JobStore>,
    partitions: ClientPartitions,
    retention: RetentionPolicy,
}

impl JobLifecycleManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        partitions: ClientPartitions,
        retention: RetentionPolicy,
    ) -> Self {
        Self {
            store,
            partitions,
            retention,
        }
    }

    pub fn partitions(&self) -> &ClientPartitions {
        &self.partitions
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Create and persist a `Pending` job. Rejects filenames that are not
    /// safe as a single path component.
    #[tracing::instrument(skip(self))]
    pub async fn create(
        &self,
        client_id: Uuid,
        kind: ConversionKind,
        input_filename: &str,
    ) -> Result<Job, AppError> {
        let job = self.prepare(client_id, kind, input_filename)?;
        self.register(&job).await?;
        Ok(job)
    }

    /// Build a `Pending` job and its input path without persisting it, so
    /// the input can be stored before any worker can see the job.
    pub fn prepare(
        &self,
        client_id: Uuid,
        kind: ConversionKind,
        input_filename: &str,
    ) -> Result<Job, AppError> {
        validate_filename(input_filename)?;

        let job_id = Uuid::new_v4();
        let input_path = self
            .partitions
            .input_path(client_id, job_id, input_filename);
        Ok(Job::new(
            job_id,
            client_id,
            kind,
            input_filename,
            input_path.to_string_lossy(),
            Utc::now(),
            self.retention.pending,
        ))
    }

    /// Persist a job built by [`prepare`](Self::prepare).
    pub async fn register(&self, job: &Job) -> Result<(), AppError> {
        self.store.insert(job).await?;

        tracing::info!(
            job_id = %job.id,
            client_id = %job.client_id,
            conversion_type = %job.conversion_type,
            "Job created"
        );
        Ok(())
    }

    /// Where the converter writes this job's artifact. The job's own
    /// `output_path` stays empty until it completes.
    pub fn planned_output_path(&self, client_id: Uuid, job: &Job) -> PathBuf {
        self.partitions
            .output_path(client_id, job.id, job.conversion_type.output_extension())
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        self.store.get(job_id).await
    }

    /// Oldest `Pending` jobs, for workers that claim from the store.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<Job>, AppError> {
        self.store.list_pending(limit).await
    }

    /// The expiry restarts from the claim, using the pending window.
    #[tracing::instrument(skip(self, job_id), fields(job_id = %job_id))]
    pub async fn mark_processing(&self, job_id: Uuid) -> Result<Job, AppError> {
        let retention = self.retention.pending;
        self.transition(job_id, JobStatus::Pending, move |job, now| {
            job.mark_processing(now, retention)
        })
        .await
    }

    #[tracing::instrument(skip(self, job_id, output_path), fields(job_id = %job_id))]
    pub async fn mark_completed(
        &self,
        job_id: Uuid,
        output_path: impl Into<String>,
    ) -> Result<Job, AppError> {
        let output_path = output_path.into();
        let retention = self.retention.completed;
        self.transition(job_id, JobStatus::Processing, move |job, now| {
            job.mark_completed(output_path, now, retention)
        })
        .await
    }

    #[tracing::instrument(skip(self, job_id, error_detail), fields(job_id = %job_id))]
    pub async fn mark_failed(
        &self,
        job_id: Uuid,
        error_detail: impl Into<String>,
    ) -> Result<Job, AppError> {
        let error_detail = error_detail.into();
        let retention = self.retention.failed;
        self.transition(job_id, JobStatus::Processing, move |job, now| {
            job.mark_failed(error_detail, now, retention)
        })
        .await
    }

    async fn transition<F>(
        &self,
        job_id: Uuid,
        expected: JobStatus,
        apply: F,
    ) -> Result<Job, AppError>
    where
        F: FnOnce(&mut Job, DateTime<Utc>) -> Result<(), TransitionError>,
    {
        let mut job = self
            .store
            .get(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;

        apply(&mut job, Utc::now())?;

        if !self.store.update_if_status(&job, expected).await? {
            // Someone else moved or removed the job between our read and
            // write.
            let from = self
                .store
                .get(job_id)
                .await?
                .map(|current| current.status)
                .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))?;
            return Err(TransitionError::InvalidTransition {
                job_id,
                from,
                to: job.status,
            }
            .into());
        }

        tracing::info!(job_id = %job_id, from = %expected, to = %job.status, "Job transitioned");
        Ok(job)
    }
}
