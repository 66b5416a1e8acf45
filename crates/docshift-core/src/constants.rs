//! Defaults shared by configuration and tests.

/// Daily per-client storage quota (250 MiB).
pub const DEFAULT_DAILY_QUOTA_BYTES: u64 = 250 * 1024 * 1024;

/// Session window for a freshly created client storage account.
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 24 * 7;

/// Retention of a completed job and its output artifact.
pub const DEFAULT_COMPLETED_RETENTION_SECS: i64 = 60 * 60;

/// Retention of a failed job. Shorter than success retention.
pub const DEFAULT_FAILED_RETENTION_SECS: i64 = 10 * 60;

/// Expiry assigned at creation, so a job that is never dispatched is still reclaimed.
pub const DEFAULT_PENDING_RETENTION_HOURS: i64 = 24;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Minimum age of an unaccounted output file before the sweeper deletes it.
pub const DEFAULT_ORPHAN_GRACE_HOURS: i64 = 24;

pub const DEFAULT_WORKER_MAX_CONCURRENCY: usize = 4;

pub const DEFAULT_WORKER_QUEUE_SIZE: usize = 1000;

/// How often idle workers look for pending jobs when no wake-up arrives.
pub const DEFAULT_WORKER_POLL_INTERVAL_MS: u64 = 1000;

/// Channel notified whenever a job row is inserted, so idle workers wake up.
pub const NEW_JOB_CHANNEL: &str = "docshift_new_job";

/// Upper bound on a stored or published error detail. `pg_notify` rejects
/// payloads of 8000 bytes or more, and JSON escaping can grow a control
/// character to six bytes.
pub const MAX_ERROR_DETAIL_BYTES: usize = 1024;

/// Largest payload `pg_notify` accepts.
pub const MAX_NOTIFY_PAYLOAD_BYTES: usize = 7999;

/// Channel carrying job state-change events.
pub const DEFAULT_NOTIFICATION_CHANNEL: &str = "job_notifications";

pub const DEFAULT_DOWNLOAD_URL_PREFIX: &str = "/documents/download";

/// Extension used when a conversion kind has no entry in the extension table.
pub const FALLBACK_OUTPUT_EXTENSION: &str = "out";

pub const INPUT_PARTITION: &str = "input";
pub const OUTPUT_PARTITION: &str = "output";
