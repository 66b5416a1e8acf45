use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use docshift_core::models::{Admission, ClientStorageAccount};
use docshift_core::AppError;
use docshift_db::AccountStore;
use docshift_storage::{directory_size, ClientPartitions};

/// Read-only view of a client's quota position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub used_bytes: u64,
    pub remaining_bytes: u64,
    pub quota_bytes: u64,
    pub expires_at: DateTime<Utc>,
    pub last_calculated_at: Option<DateTime<Utc>>,
}

/// Tracks per-client storage usage against the daily quota.
///
/// Usage is always the measured size of the client's output partition; it is
/// never incremented by request-supplied sizes.
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn AccountStore>,
    partitions: ClientPartitions,
    daily_quota_bytes: u64,
    session_ttl: Duration,
}

impl QuotaLedger {
    pub fn new(
        store: Arc<dyn AccountStore>,
        partitions: ClientPartitions,
        daily_quota_bytes: u64,
        session_ttl: Duration,
    ) -> Self {
        Self {
            store,
            partitions,
            daily_quota_bytes,
            session_ttl,
        }
    }

    pub fn daily_quota_bytes(&self) -> u64 {
        self.daily_quota_bytes
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_or_create(&self, client_id: Uuid) -> Result<ClientStorageAccount, AppError> {
        if let Some(account) = self.store.get(client_id).await? {
            return Ok(account);
        }
        let account = ClientStorageAccount::new(client_id, Utc::now(), self.session_ttl);
        self.store.insert_if_absent(&account).await
    }

    /// Decide whether `candidate_bytes` more may be accepted for `client_id`.
    /// Must run before the input artifact is written.
    #[tracing::instrument(skip(self))]
    pub async fn can_admit(
        &self,
        client_id: Uuid,
        candidate_bytes: u64,
    ) -> Result<Admission, AppError> {
        let account = self.get_or_create(client_id).await?;
        let admission = account.admit(candidate_bytes, self.daily_quota_bytes, Utc::now());

        if let Admission::Rejected(ref reason) = admission {
            tracing::info!(
                client_id = %client_id,
                candidate_bytes = candidate_bytes,
                used_bytes = account.used_bytes(),
                reason = %reason,
                "Upload rejected"
            );
        }
        Ok(admission)
    }

    /// Re-measure the client's output partition and store the result.
    ///
    /// A client without an account is left alone; the next
    /// [`get_or_create`](Self::get_or_create) starts it from zero.
    #[tracing::instrument(skip(self))]
    pub async fn recompute(&self, client_id: Uuid) -> Result<u64, AppError> {
        let size_bytes = directory_size(&self.partitions.output_dir(client_id)).await?;
        let stored_size = i64::try_from(size_bytes).unwrap_or(i64::MAX);

        if self
            .store
            .update_usage(client_id, stored_size, Utc::now())
            .await?
        {
            tracing::debug!(client_id = %client_id, size_bytes = size_bytes, "Usage recomputed");
        } else {
            tracing::debug!(client_id = %client_id, "No storage account to update");
        }
        Ok(size_bytes)
    }

    pub async fn usage(&self, client_id: Uuid) -> Result<Option<QuotaUsage>, AppError> {
        Ok(self.store.get(client_id).await?.map(|account| QuotaUsage {
            used_bytes: account.used_bytes(),
            remaining_bytes: account.remaining_bytes(self.daily_quota_bytes),
            quota_bytes: self.daily_quota_bytes,
            expires_at: account.expires_at,
            last_calculated_at: account.last_calculated_at,
        }))
    }
}
