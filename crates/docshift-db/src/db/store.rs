use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use docshift_core::models::{ClientStorageAccount, Job, JobStatus};
use docshift_core::AppError;

/// Durable record of every job.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<(), AppError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, AppError>;

    /// Overwrite the mutable fields of `job` only while the stored status is
    /// still `expected`.
    ///
    /// Returns `false` when the row is missing or another writer moved it
    /// first; nothing is written in that case.
    async fn update_if_status(&self, job: &Job, expected: JobStatus) -> Result<bool, AppError>;

    /// Up to `limit` `Pending` jobs, oldest first.
    async fn list_pending(&self, limit: usize) -> Result<Vec<Job>, AppError>;

    /// Jobs whose `expires_at` is strictly before `now`.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Job>, AppError>;

    /// Returns whether a row was removed.
    async fn delete(&self, job_id: Uuid) -> Result<bool, AppError>;

    async fn exists(&self, job_id: Uuid) -> Result<bool, AppError> {
        Ok(self.get(job_id).await?.is_some())
    }
}

/// Durable record of per-client storage accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get(&self, client_id: Uuid) -> Result<Option<ClientStorageAccount>, AppError>;

    /// Insert `account` unless one already exists for its client, and return
    /// whichever record is stored afterwards.
    async fn insert_if_absent(
        &self,
        account: &ClientStorageAccount,
    ) -> Result<ClientStorageAccount, AppError>;

    /// Overwrite the measured usage. Returns `false` if the account is gone.
    async fn update_usage(
        &self,
        client_id: Uuid,
        size_bytes: i64,
        calculated_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Accounts whose session ended before `now`.
    async fn list_expired(&self, now: DateTime<Utc>)
        -> Result<Vec<ClientStorageAccount>, AppError>;

    async fn delete(&self, client_id: Uuid) -> Result<bool, AppError>;
}
