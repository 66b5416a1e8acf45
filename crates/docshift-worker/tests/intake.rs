mod common;

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docshift_core::constants::NEW_JOB_CHANNEL;
use docshift_core::models::{ConversionKind, Job, JobStatus};
use docshift_core::{AdmissionError, AppError};
use docshift_db::{InMemoryJobStore, JobStore};
use docshift_events::NotificationBus;
use docshift_worker::{ConversionRegistry, DispatchError, JobQueue, WorkerPool, WorkerPoolConfig};
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use common::{csv_to_json, Harness};

const MB: u64 = 1024 * 1024;

fn start_queue(h: &Harness) -> (JobQueue, WorkerPool, CancellationToken) {
    start_queue_with(
        h,
        WorkerPoolConfig {
            queue_size: 16,
            max_concurrent: 2,
            poll_interval: StdDuration::from_millis(50),
        },
        None,
    )
}

fn start_queue_with(
    h: &Harness,
    config: WorkerPoolConfig,
    wake_bus: Option<Arc<dyn NotificationBus>>,
) -> (JobQueue, WorkerPool, CancellationToken) {
    let shutdown = CancellationToken::new();
    let (queue, pool) = JobQueue::start(h.dispatcher.clone(), config, wake_bus, shutdown.clone());
    (queue, pool, shutdown)
}

fn slow_csv_registry(delay: StdDuration) -> ConversionRegistry {
    ConversionRegistry::builder()
        .register(ConversionKind::CsvToJson, move |input: &Path, output: &Path| {
            std::thread::sleep(delay);
            csv_to_json(input, output)
        })
        .build()
}

#[tokio::test]
async fn create_and_enqueue_runs_job_to_completion() {
    let registry = ConversionRegistry::builder()
        .register(ConversionKind::CsvToJson, csv_to_json)
        .build();
    let h = Harness::new(registry);
    let (queue, pool, shutdown) = start_queue(&h);
    let client_id = Uuid::new_v4();

    let body = b"city,country\nLyon,FR\n";
    assert!(h
        .quota
        .can_admit(client_id, body.len() as u64)
        .await
        .unwrap()
        .is_accepted());

    let mut source: &[u8] = body;
    let receipt = queue
        .create_and_enqueue(client_id, ConversionKind::CsvToJson, "cities.csv", &mut source)
        .await
        .unwrap();
    assert_eq!(receipt.status, JobStatus::Pending);

    let job = h.wait_for_status(receipt.job_id, JobStatus::Completed).await;
    let output = job.output_path().unwrap().to_path_buf();
    assert!(output.exists());
    assert!(output.starts_with(h.partitions.output_dir(client_id)));

    shutdown.cancel();
    tokio::time::timeout(StdDuration::from_secs(2), pool.handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn upload_over_quota_is_rejected_before_any_job() {
    let h = Harness::new(ConversionRegistry::default());
    let client_id = Uuid::new_v4();
    h.quota.get_or_create(client_id).await.unwrap();

    let out_dir = h.partitions.output_dir(client_id);
    tokio::fs::create_dir_all(&out_dir).await.unwrap();
    let used = tokio::fs::File::create(out_dir.join(format!("{}.pdf", Uuid::new_v4())))
        .await
        .unwrap();
    used.set_len(249 * MB).await.unwrap();
    assert_eq!(h.quota.recompute(client_id).await.unwrap(), 249 * MB);

    let admission = h.quota.can_admit(client_id, 5 * MB).await.unwrap();
    assert!(!admission.is_accepted());
    assert!(admission.reason().starts_with("quota exceeded"));
    match admission.into_result() {
        Err(AdmissionError::QuotaExceeded {
            remaining_bytes, ..
        }) => assert_eq!(remaining_bytes, MB),
        other => panic!("unexpected admission {:?}", other),
    }

    // A smaller upload still fits.
    assert!(h.quota.can_admit(client_id, MB).await.unwrap().is_accepted());
}

/// Yields a few bytes, then fails.
struct BrokenReader {
    sent: bool,
}

impl AsyncRead for BrokenReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.sent {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "client went away",
            )));
        }
        self.sent = true;
        buf.put_slice(b"partial,");
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn failed_input_write_removes_partial_file() {
    let h = Harness::new(ConversionRegistry::default());
    let (queue, _pool, shutdown) = start_queue(&h);
    let client_id = Uuid::new_v4();

    let mut source = BrokenReader { sent: false };
    let err = queue
        .create_and_enqueue(client_id, ConversionKind::CsvToJson, "big.csv", &mut source)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "STORAGE_ERROR");

    let input_dir = h.partitions.input_dir(client_id);
    let mut entries = tokio::fs::read_dir(&input_dir).await.unwrap();
    assert!(entries.next_entry().await.unwrap().is_none());
    assert!(h.jobs.list_pending(10).await.unwrap().is_empty());

    shutdown.cancel();
}

#[tokio::test]
async fn invalid_filename_creates_nothing() {
    let h = Harness::new(ConversionRegistry::default());
    let (queue, _pool, shutdown) = start_queue(&h);

    let mut source: &[u8] = b"x";
    let err = queue
        .create_and_enqueue(
            Uuid::new_v4(),
            ConversionKind::CsvToJson,
            "../../etc/passwd",
            &mut source,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::Admission(AdmissionError::InvalidFilename(_))
    ));
    assert!(!h.partitions.input_root().exists());

    shutdown.cancel();
}

/// Job store that refuses to record failures.
struct NoFailureWrites {
    inner: InMemoryJobStore,
}

#[async_trait]
impl JobStore for NoFailureWrites {
    async fn insert(&self, job: &Job) -> Result<(), AppError> {
        self.inner.insert(job).await
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, AppError> {
        self.inner.get(job_id).await
    }

    async fn update_if_status(&self, job: &Job, expected: JobStatus) -> Result<bool, AppError> {
        if job.status == JobStatus::Failed {
            return Err(AppError::Internal("connection reset".to_string()));
        }
        self.inner.update_if_status(job, expected).await
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Job>, AppError> {
        self.inner.list_expired(now).await
    }

    async fn list_pending(&self, limit: usize) -> Result<Vec<Job>, AppError> {
        self.inner.list_pending(limit).await
    }

    async fn delete(&self, job_id: Uuid) -> Result<bool, AppError> {
        self.inner.delete(job_id).await
    }
}

#[tokio::test]
async fn unrecordable_failure_reaches_fault_channel() {
    let registry = ConversionRegistry::builder()
        .register(
            ConversionKind::CsvToJson,
            |_: &Path, _: &Path| -> anyhow::Result<()> { Err(anyhow::anyhow!("unreadable")) },
        )
        .build();
    let store = Arc::new(NoFailureWrites {
        inner: InMemoryJobStore::new(),
    });
    let h = Harness::with_job_store(registry, store);
    let (queue, mut pool, shutdown) = start_queue(&h);
    let client_id = Uuid::new_v4();

    let mut source: &[u8] = b"a,b\n";
    let receipt = queue
        .create_and_enqueue(client_id, ConversionKind::CsvToJson, "a.csv", &mut source)
        .await
        .unwrap();

    let fault = tokio::time::timeout(StdDuration::from_secs(2), pool.faults.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fault.job_id, receipt.job_id);
    assert_eq!(fault.client_id, client_id);
    assert!(matches!(fault.error, DispatchError::Inconsistent { .. }));
    assert!(fault.error.is_fatal());

    let stuck = h.jobs.get(receipt.job_id).await.unwrap().unwrap();
    assert_eq!(stuck.status, JobStatus::Processing);

    shutdown.cancel();
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_jobs() {
    let h = Harness::new(slow_csv_registry(StdDuration::from_millis(100)));
    let (queue, pool, shutdown) = start_queue(&h);
    let client_id = Uuid::new_v4();

    let mut source: &[u8] = b"k\nv\n";
    let receipt = queue
        .create_and_enqueue(client_id, ConversionKind::CsvToJson, "slow.csv", &mut source)
        .await
        .unwrap();
    h.wait_for_status(receipt.job_id, JobStatus::Processing).await;

    shutdown.cancel();
    tokio::time::timeout(StdDuration::from_secs(2), pool.handle)
        .await
        .unwrap()
        .unwrap();

    let job = h.jobs.get(receipt.job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn job_written_by_another_process_is_picked_up() {
    let registry = ConversionRegistry::builder()
        .register(ConversionKind::CsvToJson, csv_to_json)
        .build();
    let h = Harness::new(registry);
    let (_queue, pool, shutdown) = start_queue(&h);
    let client_id = Uuid::new_v4();

    // Straight into the store: nothing is sent through the queue.
    let job = h
        .pending_job(client_id, ConversionKind::CsvToJson, "remote.csv", b"k\nv\n")
        .await;

    let done = h.wait_for_status(job.id, JobStatus::Completed).await;
    assert!(done.output_path().unwrap().exists());

    shutdown.cancel();
    tokio::time::timeout(StdDuration::from_secs(2), pool.handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn new_job_notification_wakes_the_pool() {
    let registry = ConversionRegistry::builder()
        .register(ConversionKind::CsvToJson, csv_to_json)
        .build();
    let h = Harness::new(registry);
    let wake_bus: Arc<dyn NotificationBus> = h.bus.clone();
    let (_queue, _pool, shutdown) = start_queue_with(
        &h,
        WorkerPoolConfig {
            queue_size: 16,
            max_concurrent: 2,
            poll_interval: StdDuration::from_secs(60),
        },
        Some(wake_bus),
    );
    // Let the startup scan run and the relay subscribe.
    tokio::time::sleep(StdDuration::from_millis(100)).await;

    let client_id = Uuid::new_v4();
    let job = h
        .pending_job(client_id, ConversionKind::CsvToJson, "woken.csv", b"k\nv\n")
        .await;
    h.bus
        .publish(NEW_JOB_CHANNEL, &job.id.to_string())
        .await
        .unwrap();

    h.wait_for_status(job.id, JobStatus::Completed).await;
    shutdown.cancel();
}

#[tokio::test]
async fn try_enqueue_rejects_when_full_and_after_stop() {
    let h = Harness::new(slow_csv_registry(StdDuration::from_millis(300)));
    let (queue, pool, shutdown) = start_queue_with(
        &h,
        WorkerPoolConfig {
            queue_size: 1,
            max_concurrent: 1,
            poll_interval: StdDuration::from_secs(60),
        },
        None,
    );
    let client_id = Uuid::new_v4();

    // Occupies the only worker.
    let mut source: &[u8] = b"k\nv\n";
    let busy = queue
        .create_and_enqueue(client_id, ConversionKind::CsvToJson, "busy.csv", &mut source)
        .await
        .unwrap();
    h.wait_for_status(busy.job_id, JobStatus::Processing).await;

    // With the worker busy, the pool holds at most one signal while it waits
    // for a slot and the channel holds one more.
    let mut accepted = 0;
    let err = loop {
        match queue.try_enqueue(Uuid::new_v4(), client_id) {
            Ok(()) => accepted += 1,
            Err(e) => break e,
        }
        assert!(accepted <= 2, "queue never filled up");
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    };
    assert!(accepted >= 1);
    assert!(matches!(err, AppError::Internal(ref msg) if msg.contains("full")));

    shutdown.cancel();
    tokio::time::timeout(StdDuration::from_secs(2), pool.handle)
        .await
        .unwrap()
        .unwrap();

    let err = queue.try_enqueue(Uuid::new_v4(), client_id).unwrap_err();
    assert!(matches!(err, AppError::Internal(ref msg) if msg.contains("closed")));
}
