//! Process wiring for the `docshift-worker` binary.

pub mod database;
pub mod shutdown;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use docshift_core::{BusBackend, Config};
use docshift_db::{ClientStorageRepository, JobRepository};
use docshift_events::{
    run_bus_listener, EventPublisher, LocalBus, NotificationBus, PgNotifyBus, RealtimeHub,
};
use docshift_services::{ExpirySweeper, JobLifecycleManager, QuotaLedger, RetentionPolicy};
use docshift_storage::ClientPartitions;

use crate::dispatcher::Dispatcher;
use crate::queue::{JobQueue, WorkerPool, WorkerPoolConfig};
use crate::registry::ConversionRegistry;

pub use database::setup_database;
pub use shutdown::shutdown_signal;

/// Everything a running worker process holds on to.
///
/// `queue` accepts uploads from an intake layer mounted in the same process.
/// Jobs created elsewhere are picked up from the store.
pub struct WorkerRuntime {
    pub queue: JobQueue,
    pub jobs: JobLifecycleManager,
    pub quota: QuotaLedger,
    pub hub: Arc<RealtimeHub>,
    pub pool: WorkerPool,
    pub sweeper: JoinHandle<()>,
    pub listener: JoinHandle<()>,
}

/// Connect to the database, build the services and start every background
/// task. All tasks stop when `shutdown` is cancelled.
pub async fn initialize_worker(
    config: &Config,
    registry: ConversionRegistry,
    shutdown: CancellationToken,
) -> Result<WorkerRuntime> {
    let db = setup_database(config).await?;

    let partitions = ClientPartitions::new(&config.storage_root);
    partitions
        .ensure_root()
        .await
        .context("Failed to prepare storage root")?;
    tracing::info!(root = %partitions.root().display(), "Storage root ready");

    let job_store = Arc::new(JobRepository::new(db.clone()));
    let account_store = Arc::new(ClientStorageRepository::new(db.clone()));

    let bus: Arc<dyn NotificationBus> = match config.notification_bus {
        BusBackend::Postgres => Arc::new(PgNotifyBus::new(db.clone())),
        BusBackend::Local => Arc::new(LocalBus::default()),
    };
    tracing::info!(bus = ?config.notification_bus, channel = %config.notification_channel, "Notification bus ready");

    let jobs = JobLifecycleManager::new(
        job_store.clone(),
        partitions.clone(),
        RetentionPolicy::from_config(config),
    );
    let quota = QuotaLedger::new(
        account_store.clone(),
        partitions.clone(),
        config.daily_quota_bytes,
        config.session_ttl(),
    );

    if registry.is_empty() {
        tracing::warn!("No converters registered, every job will fail");
    } else {
        tracing::info!(kinds = ?registry.kinds(), "Converters registered");
    }

    let publisher = EventPublisher::new(bus.clone(), config.notification_channel.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        jobs.clone(),
        quota.clone(),
        Arc::new(registry),
        publisher,
        config.download_url_prefix.clone(),
    ));

    // New job rows are announced through Postgres whichever bus carries
    // job events.
    let wake_bus: Arc<dyn NotificationBus> = Arc::new(PgNotifyBus::new(db.clone()));
    let (queue, pool) = JobQueue::start(
        dispatcher,
        WorkerPoolConfig::from_config(config),
        Some(wake_bus),
        shutdown.clone(),
    );

    let sweeper = Arc::new(ExpirySweeper::new(
        job_store,
        account_store,
        partitions,
        config.sweep_interval(),
        config.orphan_grace(),
    ))
    .start(shutdown.clone());

    let hub = Arc::new(RealtimeHub::new());
    let listener = tokio::spawn(run_bus_listener(
        bus,
        hub.clone(),
        config.notification_channel.clone(),
        shutdown,
    ));

    Ok(WorkerRuntime {
        queue,
        jobs,
        quota,
        hub,
        pool,
        sweeper,
        listener,
    })
}
