use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use super::ConversionKind;
use crate::constants::MAX_ERROR_DETAIL_BYTES;
use crate::error::TransitionError;

const TRUNCATION_MARKER: &str = " [truncated]";

/// Cap an error description at [`MAX_ERROR_DETAIL_BYTES`], cutting on a char
/// boundary.
pub fn clip_error_detail(detail: impl Into<String>) -> String {
    let mut detail = detail.into();
    if detail.len() <= MAX_ERROR_DETAIL_BYTES {
        return detail;
    }

    let mut end = MAX_ERROR_DETAIL_BYTES - TRUNCATION_MARKER.len();
    while !detail.is_char_boundary(end) {
        end -= 1;
    }
    detail.truncate(end);
    detail.push_str(TRUNCATION_MARKER);
    detail
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "job_status", rename_all = "lowercase")
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid job status: {}", s)),
        }
    }
}

/// One requested conversion, owned by the client whose partition holds its
/// artifacts.
///
/// `output_path` is set only once the job is `Completed` and `error_message`
/// only once it is `Failed`. Transitions go through the `mark_*` methods,
/// which enforce `Pending -> Processing -> {Completed, Failed}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Job {
    pub id: Uuid,
    pub client_id: Uuid,
    pub conversion_type: ConversionKind,
    pub input_filename: String,
    pub input_path: String,
    pub output_path: Option<String>,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for Job {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Job {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            conversion_type: row
                .try_get::<String, _>("conversion_type")?
                .parse()
                .map_err(|e| {
                    sqlx::Error::Decode(format!("Failed to parse conversion_type: {}", e).into())
                })?,
            input_filename: row.try_get("input_filename")?,
            input_path: row.try_get("input_path")?,
            output_path: row.try_get("output_path")?,
            status: row.try_get("status")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

impl Job {
    /// Build a new `Pending` job. `pending_retention` bounds how long it may
    /// wait for dispatch before the sweeper reclaims it.
    pub fn new(
        id: Uuid,
        client_id: Uuid,
        conversion_type: ConversionKind,
        input_filename: impl Into<String>,
        input_path: impl Into<String>,
        now: DateTime<Utc>,
        pending_retention: Duration,
    ) -> Self {
        Self {
            id,
            client_id,
            conversion_type,
            input_filename: input_filename.into(),
            input_path: input_path.into(),
            output_path: None,
            status: JobStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
            expires_at: now + pending_retention,
        }
    }

    pub fn input_path(&self) -> &Path {
        Path::new(&self.input_path)
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref().map(Path::new)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    fn ensure_status(&self, expected: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition {
                job_id: self.id,
                from: self.status,
                to,
            })
        }
    }

    /// Claim the job. The expiry restarts from the claim so a job waiting
    /// near the end of its pending window is not reclaimed mid-conversion.
    pub fn mark_processing(
        &mut self,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<(), TransitionError> {
        self.ensure_status(JobStatus::Pending, JobStatus::Processing)?;
        self.status = JobStatus::Processing;
        self.updated_at = now;
        self.expires_at = now + retention;
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        output_path: impl Into<String>,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<(), TransitionError> {
        self.ensure_status(JobStatus::Processing, JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.output_path = Some(output_path.into());
        self.error_message = None;
        self.updated_at = now;
        self.expires_at = now + retention;
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        error_message: impl Into<String>,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<(), TransitionError> {
        self.ensure_status(JobStatus::Processing, JobStatus::Failed)?;
        self.status = JobStatus::Failed;
        self.output_path = None;
        self.error_message = Some(clip_error_detail(error_message));
        self.updated_at = now;
        self.expires_at = now + retention;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_job(now: DateTime<Utc>) -> Job {
        Job::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            ConversionKind::CsvToJson,
            "input.csv",
            "/tmp/input/input.csv",
            now,
            Duration::hours(24),
        )
    }

    #[test]
    fn test_job_status_display() {
        assert_eq!(JobStatus::Pending.to_string(), "pending");
        assert_eq!(JobStatus::Processing.to_string(), "processing");
        assert_eq!(JobStatus::Completed.to_string(), "completed");
        assert_eq!(JobStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_job_status_from_str() {
        assert_eq!("pending".parse::<JobStatus>().unwrap(), JobStatus::Pending);
        assert_eq!(
            "processing".parse::<JobStatus>().unwrap(),
            JobStatus::Processing
        );
        assert!("running".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_new_job_is_pending_with_expiry() {
        let now = Utc::now();
        let job = pending_job(now);
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.output_path.is_none());
        assert!(job.error_message.is_none());
        assert_eq!(job.expires_at, now + Duration::hours(24));
    }

    #[test]
    fn test_mark_processing_updates_status() {
        let now = Utc::now();
        let mut job = pending_job(now);
        let later = now + Duration::seconds(1);
        job.mark_processing(later, Duration::hours(24)).unwrap();
        assert_eq!(job.status, JobStatus::Processing);
        assert_eq!(job.updated_at, later);
    }

    #[test]
    fn test_mark_processing_restarts_expiry() {
        let created = Utc::now() - Duration::hours(23);
        let mut job = pending_job(created);
        let claimed = created + Duration::hours(23);
        job.mark_processing(claimed, Duration::hours(24)).unwrap();
        assert_eq!(job.expires_at, claimed + Duration::hours(24));
        assert!(!job.is_expired(created + Duration::hours(25)));
    }

    #[test]
    fn test_mark_processing_twice_is_rejected() {
        let now = Utc::now();
        let mut job = pending_job(now);
        job.mark_processing(now, Duration::hours(24)).unwrap();
        let err = job.mark_processing(now, Duration::hours(24)).unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                job_id: job.id,
                from: JobStatus::Processing,
                to: JobStatus::Processing,
            }
        );
    }

    #[test]
    fn test_mark_completed_sets_output_and_retention() {
        let now = Utc::now();
        let mut job = pending_job(now);
        job.mark_processing(now, Duration::hours(24)).unwrap();
        job.mark_completed("/tmp/output/job.json", now, Duration::hours(1))
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.output_path.as_deref(), Some("/tmp/output/job.json"));
        assert!(job.error_message.is_none());
        assert_eq!(job.expires_at, now + Duration::hours(1));
    }

    #[test]
    fn test_mark_failed_sets_error_and_short_retention() {
        let now = Utc::now();
        let mut job = pending_job(now);
        job.mark_processing(now, Duration::hours(24)).unwrap();
        job.mark_failed("conversion error", now, Duration::minutes(10))
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("conversion error"));
        assert!(job.output_path.is_none());
        assert_eq!(job.expires_at, now + Duration::minutes(10));
    }

    #[test]
    fn test_mark_failed_clips_long_error() {
        let now = Utc::now();
        let mut job = pending_job(now);
        job.mark_processing(now, Duration::hours(24)).unwrap();
        job.mark_failed("é".repeat(5000), now, Duration::minutes(10))
            .unwrap();

        let stored = job.error_message.unwrap();
        assert!(stored.len() <= MAX_ERROR_DETAIL_BYTES);
        assert!(stored.ends_with(TRUNCATION_MARKER));
        assert!(stored.starts_with("éé"));
    }

    #[test]
    fn test_clip_keeps_short_error() {
        assert_eq!(clip_error_detail("exit status 1"), "exit status 1");
        let exact = "x".repeat(MAX_ERROR_DETAIL_BYTES);
        assert_eq!(clip_error_detail(exact.clone()), exact);
    }

    #[test]
    fn test_terminal_states_cannot_be_left() {
        let now = Utc::now();
        let mut job = pending_job(now);
        job.mark_processing(now, Duration::hours(24)).unwrap();
        job.mark_completed("/tmp/out.json", now, Duration::hours(1))
            .unwrap();
        assert!(job.mark_processing(now, Duration::hours(24)).is_err());
        assert!(job.mark_failed("late", now, Duration::minutes(10)).is_err());
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_pending_job_cannot_complete_directly() {
        let now = Utc::now();
        let mut job = pending_job(now);
        assert!(job
            .mark_completed("/tmp/out.json", now, Duration::hours(1))
            .is_err());
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.output_path.is_none());
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        let job = pending_job(now);
        assert!(!job.is_expired(now));
        assert!(job.is_expired(now + Duration::hours(25)));
    }
}
