//! Notification bus implementations.
//!
//! [`PgNotifyBus`] rides on PostgreSQL `LISTEN`/`NOTIFY` so that every
//! process connected to the same database sees the same channel.
//! [`LocalBus`] is a `tokio::sync::broadcast` channel for single-process use.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::broadcast;

use docshift_core::constants::MAX_NOTIFY_PAYLOAD_BYTES;
use docshift_core::AppError;

/// Stream of raw message payloads. It ends when the subscription is lost.
pub type MessageStream = BoxStream<'static, String>;

/// Publish/subscribe transport for job events.
#[async_trait]
pub trait NotificationBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), AppError>;

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, AppError>;
}

/// PostgreSQL `pg_notify` / `PgListener` bus.
#[derive(Clone)]
pub struct PgNotifyBus {
    pool: PgPool,
}

impl PgNotifyBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationBus for PgNotifyBus {
    #[tracing::instrument(skip(self, channel, payload), fields(channel = %channel, size_bytes = payload.len()))]
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), AppError> {
        if payload.len() > MAX_NOTIFY_PAYLOAD_BYTES {
            return Err(AppError::Bus(format!(
                "payload of {} bytes exceeds the pg_notify limit",
                payload.len()
            )));
        }
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Bus(format!("pg_notify on {} failed: {}", channel, e)))?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, AppError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| AppError::Bus(format!("PgListener connect failed: {}", e)))?;
        listener
            .listen(channel)
            .await
            .map_err(|e| AppError::Bus(format!("LISTEN {} failed: {}", channel, e)))?;

        tracing::debug!(channel = %channel, "Listening for notifications");

        let stream = stream::unfold(listener, |mut listener| async move {
            match listener.recv().await {
                Ok(notification) => Some((notification.payload().to_string(), listener)),
                Err(e) => {
                    tracing::warn!(error = %e, "Notification listener lost its connection");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process bus.
///
/// When the buffer is full the oldest messages are dropped for slow
/// subscribers, which is consistent with at-most-once delivery.
pub struct LocalBus {
    sender: broadcast::Sender<(String, String)>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl NotificationBus for LocalBus {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), AppError> {
        // Ignore the SendError: it only means there are zero receivers.
        let _ = self
            .sender
            .send((channel.to_string(), payload.to_string()));
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, AppError> {
        let receiver = self.sender.subscribe();
        let channel = channel.to_string();

        let stream = stream::unfold(receiver, move |mut receiver| {
            let channel = channel.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok((name, payload)) if name == channel => {
                            return Some((payload, receiver));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(skipped = n, channel = %channel, "Local bus subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(stream.boxed())
    }
}
