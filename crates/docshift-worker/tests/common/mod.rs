#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use docshift_core::constants::DEFAULT_DAILY_QUOTA_BYTES;
use docshift_core::models::{ConversionKind, Job, JobStatus};
use docshift_db::{InMemoryAccountStore, InMemoryJobStore, JobStore};
use docshift_events::{EventPublisher, JobEvent, LocalBus, MessageStream, NotificationBus};
use docshift_services::{JobLifecycleManager, QuotaLedger, RetentionPolicy};
use docshift_storage::ClientPartitions;
use docshift_worker::{ConversionRegistry, Dispatcher};
use futures::StreamExt;
use tempfile::TempDir;
use uuid::Uuid;

pub const CHANNEL: &str = "job_notifications";
pub const DOWNLOAD_PREFIX: &str = "/api/download";

pub struct Harness {
    pub dir: TempDir,
    pub partitions: ClientPartitions,
    pub job_store: Arc<dyn JobStore>,
    pub accounts: Arc<InMemoryAccountStore>,
    pub jobs: JobLifecycleManager,
    pub quota: QuotaLedger,
    pub bus: Arc<LocalBus>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Harness {
    pub fn new(registry: ConversionRegistry) -> Self {
        Self::with_job_store(registry, Arc::new(InMemoryJobStore::new()))
    }

    pub fn with_job_store(registry: ConversionRegistry, job_store: Arc<dyn JobStore>) -> Self {
        let dir = TempDir::new().unwrap();
        let partitions = ClientPartitions::new(dir.path());
        let accounts = Arc::new(InMemoryAccountStore::new());
        let jobs = JobLifecycleManager::new(
            job_store.clone(),
            partitions.clone(),
            RetentionPolicy::default(),
        );
        let quota = QuotaLedger::new(
            accounts.clone(),
            partitions.clone(),
            DEFAULT_DAILY_QUOTA_BYTES,
            Duration::days(7),
        );
        let bus = Arc::new(LocalBus::default());
        let publisher = EventPublisher::new(bus.clone(), CHANNEL);
        let dispatcher = Arc::new(Dispatcher::new(
            jobs.clone(),
            quota.clone(),
            Arc::new(registry),
            publisher,
            DOWNLOAD_PREFIX,
        ));

        Self {
            dir,
            partitions,
            job_store,
            accounts,
            jobs,
            quota,
            bus,
            dispatcher,
        }
    }

    pub async fn subscribe(&self) -> MessageStream {
        self.bus.subscribe(CHANNEL).await.unwrap()
    }

    /// A pending job with its input already on disk.
    pub async fn pending_job(
        &self,
        client_id: Uuid,
        kind: ConversionKind,
        filename: &str,
        body: &[u8],
    ) -> Job {
        let job = self.jobs.create(client_id, kind, filename).await.unwrap();
        let mut source = body;
        self.partitions
            .write_stream(job.input_path(), &mut source)
            .await
            .unwrap();
        job
    }

    pub async fn wait_for_status(&self, job_id: Uuid, status: JobStatus) -> Job {
        for _ in 0..200 {
            if let Some(job) = self.jobs.get(job_id).await.unwrap() {
                if job.status == status {
                    return job;
                }
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("job {} never reached {}", job_id, status);
    }
}

pub async fn next_event(stream: &mut MessageStream) -> JobEvent {
    let payload = tokio::time::timeout(StdDuration::from_secs(2), stream.next())
        .await
        .expect("no event before timeout")
        .expect("bus closed");
    JobEvent::decode(&payload).unwrap().expect("unknown event kind")
}

/// Reads each line of a CSV file with a header row into a JSON array of
/// objects.
pub fn csv_to_json(input: &Path, output: &Path) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(input)?;
    let mut lines = text.lines();
    let header: Vec<&str> = lines
        .next()
        .ok_or_else(|| anyhow::anyhow!("empty csv"))?
        .split(',')
        .collect();

    let rows: Vec<serde_json::Value> = lines
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let object: serde_json::Map<String, serde_json::Value> = header
                .iter()
                .zip(line.split(','))
                .map(|(key, value)| (key.to_string(), serde_json::Value::from(value)))
                .collect();
            serde_json::Value::Object(object)
        })
        .collect();

    std::fs::write(output, serde_json::to_vec(&rows)?)?;
    Ok(())
}
