//! Job repository: persistence for the document_jobs table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use docshift_core::constants::NEW_JOB_CHANNEL;
use docshift_core::models::{Job, JobStatus};
use docshift_core::AppError;

use super::store::JobStore;

const JOB_COLUMNS: &str = r#"
    id,
    client_id,
    conversion_type,
    input_filename,
    input_path,
    output_path,
    status,
    error_message,
    created_at,
    updated_at,
    expires_at
"#;

#[derive(Clone)]
pub struct JobRepository {
    pool: PgPool,
}

impl JobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for JobRepository {
    /// Insert the row, then notify [`NEW_JOB_CHANNEL`]. The notify runs after
    /// the insert has committed and a failure is only logged: workers also
    /// poll.
    #[tracing::instrument(skip(self, job), fields(db.table = "document_jobs", job_id = %job.id))]
    async fn insert(&self, job: &Job) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO document_jobs (
                id, client_id, conversion_type, input_filename, input_path, output_path,
                status, error_message, created_at, updated_at, expires_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(job.id)
        .bind(job.client_id)
        .bind(job.conversion_type.as_str())
        .bind(&job.input_filename)
        .bind(&job.input_path)
        .bind(&job.output_path)
        .bind(job.status)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(
                error = %e,
                job_id = %job.id,
                conversion_type = %job.conversion_type,
                "Failed to insert job into database"
            );
            AppError::Database(e)
        })?;

        if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
            .bind(NEW_JOB_CHANNEL)
            .bind(job.id.to_string())
            .execute(&self.pool)
            .await
        {
            tracing::warn!(
                error = %e,
                job_id = %job.id,
                "Failed to notify workers of new job, they will find it by polling"
            );
        }

        tracing::debug!(job_id = %job.id, "Job inserted");
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "document_jobs", db.record_id = %job_id))]
    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        let job = sqlx::query_as::<Postgres, Job>(&format!(
            "SELECT {} FROM document_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    #[tracing::instrument(
        skip(self, job),
        fields(db.table = "document_jobs", job_id = %job.id, expected = %expected, to = %job.status)
    )]
    async fn update_if_status(&self, job: &Job, expected: JobStatus) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE document_jobs
            SET status = $2,
                output_path = $3,
                error_message = $4,
                updated_at = $5,
                expires_at = $6
            WHERE id = $1 AND status = $7
            "#,
        )
        .bind(job.id)
        .bind(job.status)
        .bind(&job.output_path)
        .bind(&job.error_message)
        .bind(job.updated_at)
        .bind(job.expires_at)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if !applied {
            tracing::debug!(job_id = %job.id, "Conditional job update matched no row");
        }
        Ok(applied)
    }

    #[tracing::instrument(skip(self), fields(db.table = "document_jobs"))]
    async fn list_pending(&self, limit: usize) -> Result<Vec<Job>, AppError> {
        let jobs = sqlx::query_as::<Postgres, Job>(&format!(
            "SELECT {} FROM document_jobs WHERE status = $1 ORDER BY created_at ASC LIMIT $2",
            JOB_COLUMNS
        ))
        .bind(JobStatus::Pending)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    #[tracing::instrument(skip(self), fields(db.table = "document_jobs"))]
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Job>, AppError> {
        let jobs = sqlx::query_as::<Postgres, Job>(&format!(
            "SELECT {} FROM document_jobs WHERE expires_at < $1 ORDER BY expires_at ASC",
            JOB_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    #[tracing::instrument(skip(self), fields(db.table = "document_jobs", db.record_id = %job_id))]
    async fn delete(&self, job_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM document_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self), fields(db.table = "document_jobs", db.record_id = %job_id))]
    async fn exists(&self, job_id: Uuid) -> Result<bool, AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM document_jobs WHERE id = $1)")
                .bind(job_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(exists)
    }
}
