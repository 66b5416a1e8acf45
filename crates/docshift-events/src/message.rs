use serde::{Deserialize, Serialize};
use uuid::Uuid;

use docshift_core::models::{clip_error_detail, Job, JobStatus};

/// Wire form of a job state change.
///
/// Serialized as `{"type": "<kind>", "data": {...}}`; the same body is
/// forwarded unchanged to realtime clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobEvent {
    JobCompleted(JobCompleted),
    JobFailed(JobFailed),
    JobProgress(JobProgress),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompleted {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub download_url: String,
    pub filename: String,
    pub client_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailed {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub error: String,
    pub client_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// Percentage, 0 to 100.
    pub progress: u8,
    pub client_id: Uuid,
}

const KNOWN_KINDS: [&str; 3] = ["job_completed", "job_failed", "job_progress"];

impl JobEvent {
    pub fn completed(job: &Job, client_id: Uuid, download_prefix: &str) -> Self {
        JobEvent::JobCompleted(JobCompleted {
            job_id: job.id,
            status: JobStatus::Completed,
            download_url: format!("{}/{}", download_prefix.trim_end_matches('/'), job.id),
            filename: job.input_filename.clone(),
            client_id,
        })
    }

    /// The error is clipped so the payload always fits a `pg_notify`.
    pub fn failed(job_id: Uuid, client_id: Uuid, error: impl Into<String>) -> Self {
        JobEvent::JobFailed(JobFailed {
            job_id,
            status: JobStatus::Failed,
            error: clip_error_detail(error),
            client_id,
        })
    }

    pub fn progress(job_id: Uuid, client_id: Uuid, progress: u8) -> Self {
        JobEvent::JobProgress(JobProgress {
            job_id,
            status: JobStatus::Processing,
            progress: progress.min(100),
            client_id,
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::JobCompleted(_) => "job_completed",
            JobEvent::JobFailed(_) => "job_failed",
            JobEvent::JobProgress(_) => "job_progress",
        }
    }

    pub fn job_id(&self) -> Uuid {
        match self {
            JobEvent::JobCompleted(e) => e.job_id,
            JobEvent::JobFailed(e) => e.job_id,
            JobEvent::JobProgress(e) => e.job_id,
        }
    }

    /// Room the event is delivered to.
    pub fn client_id(&self) -> Uuid {
        match self {
            JobEvent::JobCompleted(e) => e.client_id,
            JobEvent::JobFailed(e) => e.client_id,
            JobEvent::JobProgress(e) => e.client_id,
        }
    }

    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a bus payload.
    ///
    /// `Ok(None)` means well-formed JSON carrying a kind this process does
    /// not relay.
    pub fn decode(payload: &str) -> Result<Option<JobEvent>, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(payload)?;
        let kind = value.get("type").and_then(|t| t.as_str()).unwrap_or_default();
        if !KNOWN_KINDS.contains(&kind) {
            return Ok(None);
        }
        serde_json::from_value(value).map(Some)
    }
}
