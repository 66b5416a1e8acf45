//! Error types module
//!
//! Errors are split by how callers are expected to react to them:
//!
//! - [`AdmissionError`]: the upload is refused before any job exists.
//! - [`TransitionError`]: an illegal job state change; logged and absorbed.
//! - [`AppError`]: infrastructure and lookup failures, the only class that
//!   propagates out of the dispatcher.
//!
//! Failures inside converters are not represented here: they are captured as
//! a job's `error_message`.
//!
//! The `Database` variant and `From<sqlx::Error>` are gated behind the `sqlx` feature.

use std::io;
use uuid::Uuid;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

use crate::models::JobStatus;

fn mb(bytes: &u64) -> f64 {
    *bytes as f64 / (1024.0 * 1024.0)
}

/// Reasons an upload is refused before a job is created.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmissionError {
    #[error("session expired, reload the page to start a new session")]
    SessionExpired,

    #[error(
        "quota exceeded: daily quota of {:.0} MB reached ({:.1} MB used, {:.1} MB remaining)",
        mb(.quota_bytes),
        mb(.used_bytes),
        mb(.remaining_bytes)
    )]
    QuotaExceeded {
        quota_bytes: u64,
        used_bytes: u64,
        remaining_bytes: u64,
    },

    #[error("unsupported conversion type: {0}")]
    UnsupportedConversion(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),
}

/// An attempted job state change that the state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("job {job_id}: cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Notification bus error: {0}")]
    Bus(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Bus(_) => "BUS_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Admission(AdmissionError::SessionExpired) => "SESSION_EXPIRED",
            AppError::Admission(AdmissionError::QuotaExceeded { .. }) => "QUOTA_EXCEEDED",
            AppError::Admission(AdmissionError::UnsupportedConversion(_)) => {
                "UNSUPPORTED_CONVERSION"
            }
            AppError::Admission(AdmissionError::InvalidFilename(_)) => "INVALID_FILENAME",
            AppError::Transition(_) => "INVALID_TRANSITION",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::Storage(_) | AppError::Bus(_)
        )
    }
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Database(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Storage(format!("IO error: {}", err))
    }
}
