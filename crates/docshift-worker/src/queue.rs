//! Job queue: worker pool, store polling with LISTEN/NOTIFY wake-ups, and
//! job intake.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use docshift_core::constants::{
    DEFAULT_WORKER_MAX_CONCURRENCY, DEFAULT_WORKER_POLL_INTERVAL_MS, DEFAULT_WORKER_QUEUE_SIZE,
    NEW_JOB_CHANNEL,
};
use docshift_core::models::{ConversionKind, JobStatus};
use docshift_core::{AppError, Config};
use docshift_events::NotificationBus;
use docshift_services::JobLifecycleManager;
use docshift_storage::remove_file;

use crate::dispatcher::{DispatchError, DispatchOutcome, Dispatcher};

const WAKE_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSignal {
    pub job_id: Uuid,
    pub client_id: Uuid,
}

/// What the caller gets back once a job is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobReceipt {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// A dispatch that left a job in an inconsistent state. The process should
/// stop taking work when it receives one.
#[derive(Debug)]
pub struct DispatchFault {
    pub job_id: Uuid,
    pub client_id: Uuid,
    pub error: DispatchError,
}

/// Background pieces returned by [`JobQueue::start`].
pub struct WorkerPool {
    pub handle: JoinHandle<()>,
    pub faults: mpsc::UnboundedReceiver<DispatchFault>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Capacity of the in-process signal channel.
    pub queue_size: usize,
    pub max_concurrent: usize,
    /// How often the store is scanned for pending jobs.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_WORKER_QUEUE_SIZE,
            max_concurrent: DEFAULT_WORKER_MAX_CONCURRENCY,
            poll_interval: Duration::from_millis(DEFAULT_WORKER_POLL_INTERVAL_MS),
        }
    }
}

impl WorkerPoolConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue_size: config.worker_queue_size,
            max_concurrent: config.worker_max_concurrency,
            poll_interval: config.worker_poll_interval(),
        }
    }
}

/// Hands jobs to a fixed-size worker pool.
///
/// Jobs reach the pool two ways: signals sent by this process through
/// [`enqueue`](Self::enqueue), and `Pending` rows found in the job store,
/// which covers jobs written by other processes and signals lost on restart.
/// Both may deliver the same job; the claim in the dispatcher lets only one
/// of them run it.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<DispatchSignal>,
    jobs: JobLifecycleManager,
}

impl JobQueue {
    /// Create the queue and spawn its worker pool.
    ///
    /// When `wake_bus` is given the pool also scans the store as soon as a
    /// message arrives on [`NEW_JOB_CHANNEL`], in addition to polling. The
    /// pool stops pulling work once `shutdown` is cancelled and the returned
    /// handle resolves after in-flight dispatches finish.
    pub fn start(
        dispatcher: Arc<Dispatcher>,
        config: WorkerPoolConfig,
        wake_bus: Option<Arc<dyn NotificationBus>>,
        shutdown: CancellationToken,
    ) -> (Self, WorkerPool) {
        let config = WorkerPoolConfig {
            queue_size: config.queue_size.max(1),
            max_concurrent: config.max_concurrent.max(1),
            poll_interval: config.poll_interval.max(Duration::from_millis(10)),
        };
        let (tx, rx) = mpsc::channel(config.queue_size);
        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let jobs = dispatcher.jobs().clone();

        let handle = tokio::spawn(Self::worker_pool(
            rx, dispatcher, config, wake_bus, fault_tx, shutdown,
        ));

        (
            Self { tx, jobs },
            WorkerPool {
                handle,
                faults: fault_rx,
            },
        )
    }

    /// Create a job, stream its input to disk and queue it for dispatch.
    ///
    /// The caller must already have passed the quota admission check. The
    /// input is stored before the job record exists, so no worker can claim
    /// a job whose input is still being written. When the input cannot be
    /// written the partial file is removed and no job is recorded.
    #[tracing::instrument(skip(self, client_id, kind, source), fields(client_id = %client_id, conversion_type = %kind))]
    pub async fn create_and_enqueue(
        &self,
        client_id: Uuid,
        kind: ConversionKind,
        filename: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<JobReceipt, AppError> {
        let job = self.jobs.prepare(client_id, kind, filename)?;

        match self
            .jobs
            .partitions()
            .write_stream(job.input_path(), source)
            .await
        {
            Ok(bytes) => {
                tracing::debug!(job_id = %job.id, bytes = bytes, "Input stored");
            }
            Err(e) => {
                tracing::error!(error = %e, job_id = %job.id, "Failed to store input");
                self.discard_input(job.input_path()).await;
                return Err(e.into());
            }
        }

        if let Err(e) = self.jobs.register(&job).await {
            self.discard_input(job.input_path()).await;
            return Err(e);
        }

        self.enqueue(job.id, client_id).await?;

        Ok(JobReceipt {
            job_id: job.id,
            status: job.status,
        })
    }

    async fn discard_input(&self, path: &Path) {
        if let Err(e) = remove_file(path).await {
            tracing::warn!(error = %e, path = %path.display(), "Failed to remove partial input");
        }
    }

    /// Queue a dispatch signal, waiting for room if the queue is full.
    /// Sending the same job twice is harmless.
    #[tracing::instrument(skip(self))]
    pub async fn enqueue(&self, job_id: Uuid, client_id: Uuid) -> Result<(), AppError> {
        self.tx
            .send(DispatchSignal { job_id, client_id })
            .await
            .map_err(|_| AppError::Internal("Job queue is closed".to_string()))?;
        tracing::debug!(job_id = %job_id, "Job enqueued");
        Ok(())
    }

    /// Like [`enqueue`](Self::enqueue) but rejects instead of waiting.
    pub fn try_enqueue(&self, job_id: Uuid, client_id: Uuid) -> Result<(), AppError> {
        self.tx
            .try_send(DispatchSignal { job_id, client_id })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::warn!(job_id = %job_id, "Job queue is full, rejecting job");
                    AppError::Internal("Job queue is full, please try again later".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    AppError::Internal("Job queue is closed".to_string())
                }
            })
    }

    async fn worker_pool(
        mut rx: mpsc::Receiver<DispatchSignal>,
        dispatcher: Arc<Dispatcher>,
        config: WorkerPoolConfig,
        wake_bus: Option<Arc<dyn NotificationBus>>,
        faults: mpsc::UnboundedSender<DispatchFault>,
        shutdown: CancellationToken,
    ) {
        tracing::info!(
            queue_size = config.queue_size,
            max_concurrent = config.max_concurrent,
            poll_interval_ms = config.poll_interval.as_millis() as u64,
            listen_notify = wake_bus.is_some(),
            "Job worker pool started"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));

        // The sender stays in scope for the whole loop so `wake_rx` only
        // yields when a notification arrives.
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(16);
        if let Some(bus) = wake_bus {
            tokio::spawn(Self::relay_wakeups(bus, wake_tx.clone(), shutdown.clone()));
        }

        let mut poll = interval(config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut signals_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                signal = rx.recv(), if signals_open => match signal {
                    Some(signal) => {
                        // Hold the signal until a worker slot is free.
                        let permit = tokio::select! {
                            _ = shutdown.cancelled() => break,
                            permit = semaphore.clone().acquire_owned() => match permit {
                                Ok(permit) => permit,
                                Err(_) => break,
                            },
                        };
                        Self::spawn_dispatch(&dispatcher, signal, permit, &faults);
                    }
                    None => signals_open = false,
                },
                Some(()) = wake_rx.recv() => {
                    Self::claim_pending(&dispatcher, &semaphore, &faults).await;
                }
                _ = poll.tick() => {
                    Self::claim_pending(&dispatcher, &semaphore, &faults).await;
                }
            }
        }
        drop(wake_tx);

        tracing::info!("Job worker pool shutting down, waiting for in-flight jobs");
        let _ = semaphore.acquire_many(config.max_concurrent as u32).await;
        tracing::info!("Job worker pool stopped");
    }

    /// Dispatch as many `Pending` jobs from the store as there are free
    /// workers.
    async fn claim_pending(
        dispatcher: &Arc<Dispatcher>,
        semaphore: &Arc<Semaphore>,
        faults: &mpsc::UnboundedSender<DispatchFault>,
    ) {
        let available = semaphore.available_permits();
        if available == 0 {
            tracing::debug!("No workers available, skipping claim");
            return;
        }

        let pending = match dispatcher.jobs().list_pending(available).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list pending jobs");
                return;
            }
        };

        if pending.is_empty() {
            tracing::trace!("No pending jobs in store");
            return;
        }

        for job in pending {
            let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                break;
            };
            let signal = DispatchSignal {
                job_id: job.id,
                client_id: job.client_id,
            };
            Self::spawn_dispatch(dispatcher, signal, permit, faults);
        }
    }

    /// Forward every message on [`NEW_JOB_CHANNEL`] as a wake-up, resubscribing
    /// after the subscription drops.
    async fn relay_wakeups(
        bus: Arc<dyn NotificationBus>,
        wake: mpsc::Sender<()>,
        shutdown: CancellationToken,
    ) {
        loop {
            let subscription = tokio::select! {
                _ = shutdown.cancelled() => return,
                subscription = bus.subscribe(NEW_JOB_CHANNEL) => subscription,
            };

            match subscription {
                Ok(mut stream) => {
                    tracing::debug!(channel = NEW_JOB_CHANNEL, "Listening for new jobs");
                    loop {
                        let message = tokio::select! {
                            _ = shutdown.cancelled() => return,
                            message = stream.next() => message,
                        };
                        match message {
                            // A full channel already holds a pending wake-up.
                            Some(_) => {
                                let _ = wake.try_send(());
                            }
                            None => break,
                        }
                    }
                    tracing::warn!("New job subscription ended, will retry");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "New job subscription failed, will retry");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = sleep(WAKE_RETRY_DELAY) => {}
            }
        }
    }

    fn spawn_dispatch(
        dispatcher: &Arc<Dispatcher>,
        signal: DispatchSignal,
        permit: OwnedSemaphorePermit,
        faults: &mpsc::UnboundedSender<DispatchFault>,
    ) {
        let dispatcher = dispatcher.clone();
        let faults = faults.clone();
        tokio::spawn(async move {
            let _permit = permit;
            Self::run_one(&dispatcher, signal, &faults).await;
        });
    }

    async fn run_one(
        dispatcher: &Dispatcher,
        signal: DispatchSignal,
        faults: &mpsc::UnboundedSender<DispatchFault>,
    ) {
        match dispatcher.dispatch(signal.job_id, signal.client_id).await {
            Ok(DispatchOutcome::Completed { .. }) | Ok(DispatchOutcome::Failed { .. }) => {}
            Ok(DispatchOutcome::Skipped { reason, .. }) => {
                tracing::debug!(job_id = %signal.job_id, reason = ?reason, "Dispatch skipped");
            }
            Err(error) if error.is_fatal() => {
                tracing::error!(error = %error, job_id = %signal.job_id, "Job processing failed");
                let fault = DispatchFault {
                    job_id: signal.job_id,
                    client_id: signal.client_id,
                    error,
                };
                if faults.send(fault).is_err() {
                    tracing::error!(job_id = %signal.job_id, "No fault listener, dropping fault");
                }
            }
            Err(error) => {
                tracing::warn!(error = %error, job_id = %signal.job_id, "Job could not be dispatched");
            }
        }
    }
}
