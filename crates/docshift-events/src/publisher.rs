use std::sync::Arc;

use tokio::task::JoinHandle;

use docshift_core::AppError;

use crate::bus::NotificationBus;
use crate::message::JobEvent;

/// Fire-and-forget publisher for job events on one well-known channel.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn NotificationBus>,
    channel: Arc<str>,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn NotificationBus>, channel: impl Into<String>) -> Self {
        Self {
            bus,
            channel: Arc::from(channel.into()),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Hand `event` to the bus on a background task.
    ///
    /// Failures are logged and dropped; callers never wait on delivery. The
    /// handle is returned only so tests can await completion.
    pub fn publish(&self, event: JobEvent) -> JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = publisher.publish_now(&event).await {
                tracing::warn!(
                    error = %e,
                    job_id = %event.job_id(),
                    client_id = %event.client_id(),
                    event = event.kind(),
                    "Failed to publish job event"
                );
            }
        })
    }

    /// Serialize and publish `event`, returning any failure.
    pub async fn publish_now(&self, event: &JobEvent) -> Result<(), AppError> {
        let payload = event
            .to_payload()
            .map_err(|e| AppError::Bus(format!("Failed to serialize event: {}", e)))?;
        self.bus.publish(&self.channel, &payload).await?;

        tracing::debug!(
            job_id = %event.job_id(),
            client_id = %event.client_id(),
            event = event.kind(),
            channel = %self.channel,
            "Job event published"
        );
        Ok(())
    }
}
