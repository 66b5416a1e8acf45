//! Configuration module
//!
//! Settings for the worker process: database, storage root, quota and
//! retention windows, worker pool sizing, notification bus and the external
//! converter commands.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;

use crate::constants::*;
use crate::models::ConversionKind;

const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STORAGE_ROOT: &str = "./storage";

/// Which notification bus implementation the process wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackend {
    /// PostgreSQL LISTEN/NOTIFY, shared by every process on the same database.
    Postgres,
    /// In-process broadcast channel.
    Local,
}

impl FromStr for BusBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(BusBackend::Postgres),
            "local" | "memory" => Ok(BusBackend::Local),
            other => Err(anyhow::anyhow!("Invalid NOTIFICATION_BUS: {}", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub environment: String,
    /// `compact` console output, or `json`.
    pub log_format: String,
    pub storage_root: PathBuf,
    pub daily_quota_bytes: u64,
    pub session_ttl_hours: i64,
    pub completed_retention_secs: i64,
    pub failed_retention_secs: i64,
    pub pending_retention_hours: i64,
    pub sweep_interval_secs: u64,
    pub orphan_grace_hours: i64,
    pub worker_max_concurrency: usize,
    pub worker_queue_size: usize,
    pub worker_poll_interval_ms: u64,
    pub notification_channel: String,
    pub download_url_prefix: String,
    pub notification_bus: BusBackend,
    /// Command templates keyed by kind, read from `CONVERTER_<KIND>`.
    pub converter_commands: HashMap<ConversionKind, String>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Configuration with every tunable at its default, for the given
    /// database and storage root.
    pub fn new(database_url: impl Into<String>, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            database_url: database_url.into(),
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            environment: "development".to_string(),
            log_format: "compact".to_string(),
            storage_root: storage_root.into(),
            daily_quota_bytes: DEFAULT_DAILY_QUOTA_BYTES,
            session_ttl_hours: DEFAULT_SESSION_TTL_HOURS,
            completed_retention_secs: DEFAULT_COMPLETED_RETENTION_SECS,
            failed_retention_secs: DEFAULT_FAILED_RETENTION_SECS,
            pending_retention_hours: DEFAULT_PENDING_RETENTION_HOURS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            orphan_grace_hours: DEFAULT_ORPHAN_GRACE_HOURS,
            worker_max_concurrency: DEFAULT_WORKER_MAX_CONCURRENCY,
            worker_queue_size: DEFAULT_WORKER_QUEUE_SIZE,
            worker_poll_interval_ms: DEFAULT_WORKER_POLL_INTERVAL_MS,
            notification_channel: DEFAULT_NOTIFICATION_CHANNEL.to_string(),
            download_url_prefix: DEFAULT_DOWNLOAD_URL_PREFIX.to_string(),
            notification_bus: BusBackend::Postgres,
            converter_commands: HashMap::new(),
        }
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
        let storage_root =
            env::var("STORAGE_ROOT").unwrap_or_else(|_| DEFAULT_STORAGE_ROOT.to_string());

        let mut config = Config::new(database_url, storage_root);

        config.environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());
        if let Ok(format) = env::var("LOG_FORMAT") {
            config.log_format = format.trim().to_lowercase();
        }
        config.db_max_connections = env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS);
        config.db_timeout_seconds = env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS);

        let default_quota_mb = DEFAULT_DAILY_QUOTA_BYTES / (1024 * 1024);
        config.daily_quota_bytes = env_or("DAILY_QUOTA_MB", default_quota_mb) * 1024 * 1024;
        config.session_ttl_hours = env_or("SESSION_TTL_HOURS", DEFAULT_SESSION_TTL_HOURS);
        config.completed_retention_secs =
            env_or("COMPLETED_RETENTION_SECS", DEFAULT_COMPLETED_RETENTION_SECS);
        config.failed_retention_secs =
            env_or("FAILED_RETENTION_SECS", DEFAULT_FAILED_RETENTION_SECS);
        config.pending_retention_hours =
            env_or("PENDING_RETENTION_HOURS", DEFAULT_PENDING_RETENTION_HOURS);
        config.sweep_interval_secs = env_or("SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS);
        config.orphan_grace_hours = env_or("ORPHAN_GRACE_HOURS", DEFAULT_ORPHAN_GRACE_HOURS);
        config.worker_max_concurrency =
            env_or("WORKER_MAX_CONCURRENCY", DEFAULT_WORKER_MAX_CONCURRENCY);
        config.worker_queue_size = env_or("WORKER_QUEUE_SIZE", DEFAULT_WORKER_QUEUE_SIZE);
        config.worker_poll_interval_ms =
            env_or("WORKER_POLL_INTERVAL_MS", DEFAULT_WORKER_POLL_INTERVAL_MS);

        if let Ok(channel) = env::var("NOTIFICATION_CHANNEL") {
            config.notification_channel = channel;
        }
        if let Ok(prefix) = env::var("DOWNLOAD_URL_PREFIX") {
            config.download_url_prefix = prefix.trim_end_matches('/').to_string();
        }
        if let Ok(bus) = env::var("NOTIFICATION_BUS") {
            config.notification_bus = bus.parse()?;
        }

        for kind in ConversionKind::ALL {
            let key = format!("CONVERTER_{}", kind.as_str().to_uppercase());
            if let Ok(template) = env::var(&key) {
                if !template.trim().is_empty() {
                    config.converter_commands.insert(kind, template);
                }
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.notification_bus == BusBackend::Postgres
            && !(self.database_url.starts_with("postgres://")
                || self.database_url.starts_with("postgresql://"))
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        if self.daily_quota_bytes == 0 {
            return Err(anyhow::anyhow!("DAILY_QUOTA_MB must be greater than 0"));
        }

        if self.worker_max_concurrency == 0 {
            return Err(anyhow::anyhow!(
                "WORKER_MAX_CONCURRENCY must be greater than 0"
            ));
        }

        if self.worker_queue_size == 0 {
            return Err(anyhow::anyhow!("WORKER_QUEUE_SIZE must be greater than 0"));
        }

        if self.worker_poll_interval_ms == 0 {
            return Err(anyhow::anyhow!(
                "WORKER_POLL_INTERVAL_MS must be greater than 0"
            ));
        }

        if self.sweep_interval_secs == 0 {
            return Err(anyhow::anyhow!("SWEEP_INTERVAL_SECS must be greater than 0"));
        }

        for (name, value) in [
            ("SESSION_TTL_HOURS", self.session_ttl_hours),
            ("COMPLETED_RETENTION_SECS", self.completed_retention_secs),
            ("FAILED_RETENTION_SECS", self.failed_retention_secs),
            ("PENDING_RETENTION_HOURS", self.pending_retention_hours),
        ] {
            if value <= 0 {
                return Err(anyhow::anyhow!("{} must be greater than 0", name));
            }
        }

        if self.orphan_grace_hours < 0 {
            return Err(anyhow::anyhow!("ORPHAN_GRACE_HOURS cannot be negative"));
        }

        if self.notification_channel.is_empty() {
            return Err(anyhow::anyhow!("NOTIFICATION_CHANNEL cannot be empty"));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn log_json(&self) -> bool {
        self.log_format == "json"
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::hours(self.session_ttl_hours)
    }

    pub fn completed_retention(&self) -> Duration {
        Duration::seconds(self.completed_retention_secs)
    }

    pub fn failed_retention(&self) -> Duration {
        Duration::seconds(self.failed_retention_secs)
    }

    pub fn pending_retention(&self) -> Duration {
        Duration::hours(self.pending_retention_hours)
    }

    pub fn orphan_grace(&self) -> Duration {
        Duration::hours(self.orphan_grace_hours)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn worker_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.worker_poll_interval_ms)
    }
}
