//! Runs one job from `Processing` to a terminal state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use docshift_core::models::{clip_error_detail, Job};
use docshift_core::AppError;
use docshift_events::{EventPublisher, JobEvent};
use docshift_services::{JobLifecycleManager, QuotaLedger};
use docshift_storage::{ensure_parent_dir, remove_file};

use crate::registry::ConversionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    /// Another delivery already claimed the job.
    AlreadyClaimed,
    /// The sweeper removed the job while it was being converted.
    Reclaimed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed { job_id: Uuid, output_path: PathBuf },
    Failed { job_id: Uuid, error: String },
    Skipped { job_id: Uuid, reason: SkipReason },
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The job was claimed and still exists, but its failure could not be
    /// recorded, so it is stuck in `Processing`.
    #[error("job {job_id} left inconsistent: {source}")]
    Inconsistent {
        job_id: Uuid,
        #[source]
        source: AppError,
    },

    /// The job could not be read or claimed. It is untouched and safe to
    /// redeliver.
    #[error("job {job_id} could not be claimed: {source}")]
    Unavailable {
        job_id: Uuid,
        #[source]
        source: AppError,
    },
}

impl DispatchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, DispatchError::Inconsistent { .. })
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            DispatchError::Inconsistent { job_id, .. }
            | DispatchError::Unavailable { job_id, .. } => *job_id,
        }
    }
}

pub struct Dispatcher {
    jobs: JobLifecycleManager,
    quota: QuotaLedger,
    registry: Arc<ConversionRegistry>,
    publisher: EventPublisher,
    download_prefix: String,
}

impl Dispatcher {
    pub fn new(
        jobs: JobLifecycleManager,
        quota: QuotaLedger,
        registry: Arc<ConversionRegistry>,
        publisher: EventPublisher,
        download_prefix: impl Into<String>,
    ) -> Self {
        Self {
            jobs,
            quota,
            registry,
            publisher,
            download_prefix: download_prefix.into(),
        }
    }

    pub fn jobs(&self) -> &JobLifecycleManager {
        &self.jobs
    }

    /// Converter failures end in a `Failed` outcome. Only a store failure
    /// while recording that failure is returned as an error; a job deleted
    /// underneath the dispatch is skipped as `Reclaimed`.
    #[tracing::instrument(skip(self, job_id, client_id), fields(job_id = %job_id, client_id = %client_id))]
    pub async fn dispatch(
        &self,
        job_id: Uuid,
        client_id: Uuid,
    ) -> Result<DispatchOutcome, DispatchError> {
        let job = match self.jobs.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::warn!("Job not found, skipping dispatch");
                return Ok(DispatchOutcome::Skipped {
                    job_id,
                    reason: SkipReason::NotFound,
                });
            }
            Err(source) => return Err(DispatchError::Unavailable { job_id, source }),
        };

        let job = match self.jobs.mark_processing(job.id).await {
            Ok(job) => job,
            Err(AppError::Transition(e)) => {
                tracing::info!(reason = %e, "Job already claimed, skipping dispatch");
                return Ok(DispatchOutcome::Skipped {
                    job_id,
                    reason: SkipReason::AlreadyClaimed,
                });
            }
            Err(AppError::NotFound(_)) => {
                return Ok(DispatchOutcome::Skipped {
                    job_id,
                    reason: SkipReason::NotFound,
                });
            }
            Err(source) => return Err(DispatchError::Unavailable { job_id, source }),
        };

        let output_path = self.jobs.planned_output_path(client_id, &job);
        let conversion = self.convert(&job, &output_path).await;

        let result = match conversion {
            Ok(()) => self.complete(&job, client_id, output_path).await,
            Err(error) => self.fail(&job, client_id, &output_path, error).await,
        };

        if let Err(e) = remove_file(job.input_path()).await {
            tracing::warn!(error = %e, path = %job.input_path().display(), "Failed to delete input artifact");
        }

        if let Err(e) = self.quota.recompute(client_id).await {
            tracing::warn!(error = %e, "Failed to recompute storage usage after dispatch");
        }

        result
    }

    /// Run the registered converter on a blocking thread. Any error or panic
    /// comes back as its description.
    async fn convert(&self, job: &Job, output_path: &Path) -> Result<(), String> {
        let kind = job.conversion_type;
        let converter = self
            .registry
            .get(kind)
            .ok_or_else(|| format!("no converter registered for kind {}", kind))?;

        let input = job.input_path().to_path_buf();
        if !tokio::fs::try_exists(&input).await.unwrap_or(false) {
            return Err(format!("input artifact is missing: {}", input.display()));
        }

        ensure_parent_dir(output_path)
            .await
            .map_err(|e| format!("failed to prepare output directory: {}", e))?;

        let output = output_path.to_path_buf();
        tracing::debug!(conversion_type = %kind, input = %input.display(), "Running converter");

        match tokio::task::spawn_blocking(move || converter.convert(&input, &output)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(e) if e.is_panic() => Err("converter panicked".to_string()),
            Err(e) => Err(format!("converter task failed: {}", e)),
        }
    }

    async fn complete(
        &self,
        job: &Job,
        client_id: Uuid,
        output_path: PathBuf,
    ) -> Result<DispatchOutcome, DispatchError> {
        match self
            .jobs
            .mark_completed(job.id, output_path.to_string_lossy())
            .await
        {
            Ok(completed) => {
                self.publisher.publish(JobEvent::completed(
                    &completed,
                    client_id,
                    &self.download_prefix,
                ));
                tracing::info!(output = %output_path.display(), "Conversion completed");
                Ok(DispatchOutcome::Completed {
                    job_id: job.id,
                    output_path,
                })
            }
            Err(AppError::NotFound(_)) => Ok(self.reclaimed(job, &output_path).await),
            Err(e) => {
                tracing::error!(error = %e, "Failed to record completion");
                self.fail(
                    job,
                    client_id,
                    &output_path,
                    format!("failed to record completion: {}", e),
                )
                .await
            }
        }
    }

    async fn fail(
        &self,
        job: &Job,
        client_id: Uuid,
        output_path: &Path,
        error: String,
    ) -> Result<DispatchOutcome, DispatchError> {
        let error = clip_error_detail(error);
        tracing::warn!(error = %error, "Conversion failed");

        if let Err(e) = remove_file(output_path).await {
            tracing::warn!(error = %e, path = %output_path.display(), "Failed to delete partial output");
        }

        match self.jobs.mark_failed(job.id, error.clone()).await {
            Ok(_) => {}
            Err(AppError::NotFound(_)) => return Ok(self.reclaimed(job, output_path).await),
            Err(source) => {
                tracing::error!(error = %source, "Failed to record job failure");
                return Err(DispatchError::Inconsistent {
                    job_id: job.id,
                    source,
                });
            }
        }

        self.publisher
            .publish(JobEvent::failed(job.id, client_id, error.clone()));
        Ok(DispatchOutcome::Failed {
            job_id: job.id,
            error,
        })
    }

    /// The record is gone, so nothing may point at the output any more.
    async fn reclaimed(&self, job: &Job, output_path: &Path) -> DispatchOutcome {
        tracing::warn!("Job was removed during conversion, discarding output");
        if let Err(e) = remove_file(output_path).await {
            tracing::warn!(error = %e, path = %output_path.display(), "Failed to delete output of reclaimed job");
        }
        DispatchOutcome::Skipped {
            job_id: job.id,
            reason: SkipReason::Reclaimed,
        }
    }
}
