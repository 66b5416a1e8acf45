//! In-process stores backed by a mutex-guarded map.
//!
//! Every operation takes the lock once, so the conditional update has the
//! same all-or-nothing behaviour as the SQL version.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use docshift_core::models::{ClientStorageAccount, Job, JobStatus};
use docshift_core::AppError;

use super::store::{AccountStore, JobStore};

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), AppError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(AppError::Internal(format!(
                "job {} already exists",
                job.id
            )));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        Ok(self.jobs.lock().await.get(&job_id).cloned())
    }

    async fn update_if_status(&self, job: &Job, expected: JobStatus) -> Result<bool, AppError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&job.id) {
            Some(stored) if stored.status == expected => {
                stored.status = job.status;
                stored.output_path = job.output_path.clone();
                stored.error_message = job.error_message.clone();
                stored.updated_at = job.updated_at;
                stored.expires_at = job.expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<Job>, AppError> {
        let jobs = self.jobs.lock().await;
        let mut pending: Vec<Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|j| j.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Job>, AppError> {
        let jobs = self.jobs.lock().await;
        let mut expired: Vec<Job> = jobs.values().filter(|j| j.is_expired(now)).cloned().collect();
        expired.sort_by_key(|j| j.expires_at);
        Ok(expired)
    }

    async fn delete(&self, job_id: Uuid) -> Result<bool, AppError> {
        Ok(self.jobs.lock().await.remove(&job_id).is_some())
    }

    async fn exists(&self, job_id: Uuid) -> Result<bool, AppError> {
        Ok(self.jobs.lock().await.contains_key(&job_id))
    }
}

#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: Mutex<HashMap<Uuid, ClientStorageAccount>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get(&self, client_id: Uuid) -> Result<Option<ClientStorageAccount>, AppError> {
        Ok(self.accounts.lock().await.get(&client_id).cloned())
    }

    async fn insert_if_absent(
        &self,
        account: &ClientStorageAccount,
    ) -> Result<ClientStorageAccount, AppError> {
        let mut accounts = self.accounts.lock().await;
        let stored = accounts
            .entry(account.client_id)
            .or_insert_with(|| account.clone());
        Ok(stored.clone())
    }

    async fn update_usage(
        &self,
        client_id: Uuid,
        size_bytes: i64,
        calculated_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut accounts = self.accounts.lock().await;
        match accounts.get_mut(&client_id) {
            Some(account) => {
                account.size_bytes = size_bytes;
                account.last_calculated_at = Some(calculated_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClientStorageAccount>, AppError> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .values()
            .filter(|a| a.is_expired(now))
            .cloned()
            .collect())
    }

    async fn delete(&self, client_id: Uuid) -> Result<bool, AppError> {
        Ok(self.accounts.lock().await.remove(&client_id).is_some())
    }
}
