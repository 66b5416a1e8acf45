use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AdmissionError;

/// Storage usage record for one client.
///
/// `size_bytes` is only ever written from a directory walk of the client's
/// output partition; it is never incremented in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ClientStorageAccount {
    pub client_id: Uuid,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_calculated_at: Option<DateTime<Utc>>,
}

/// Result of an upload admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected(AdmissionError),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted)
    }

    /// Human-readable reason; empty when accepted.
    pub fn reason(&self) -> String {
        match self {
            Admission::Accepted => String::new(),
            Admission::Rejected(err) => err.to_string(),
        }
    }

    pub fn into_result(self) -> Result<(), AdmissionError> {
        match self {
            Admission::Accepted => Ok(()),
            Admission::Rejected(err) => Err(err),
        }
    }
}

impl ClientStorageAccount {
    pub fn new(client_id: Uuid, now: DateTime<Utc>, session_ttl: Duration) -> Self {
        Self {
            client_id,
            size_bytes: 0,
            created_at: now,
            expires_at: now + session_ttl,
            last_calculated_at: None,
        }
    }

    pub fn used_bytes(&self) -> u64 {
        self.size_bytes.max(0) as u64
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn remaining_bytes(&self, quota_bytes: u64) -> u64 {
        quota_bytes.saturating_sub(self.used_bytes())
    }

    /// Decide whether `candidate_bytes` more may be stored for this client.
    pub fn admit(&self, candidate_bytes: u64, quota_bytes: u64, now: DateTime<Utc>) -> Admission {
        if self.is_expired(now) {
            return Admission::Rejected(AdmissionError::SessionExpired);
        }

        if self.used_bytes().saturating_add(candidate_bytes) > quota_bytes {
            return Admission::Rejected(AdmissionError::QuotaExceeded {
                quota_bytes,
                used_bytes: self.used_bytes(),
                remaining_bytes: self.remaining_bytes(quota_bytes),
            });
        }

        Admission::Accepted
    }
}
