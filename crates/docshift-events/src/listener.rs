use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::bus::NotificationBus;
use crate::hub::RealtimeHub;
use crate::message::JobEvent;

const INITIAL_BACKOFF: Duration = Duration::from_secs(5);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Relay one bus payload to its client room.
///
/// Returns the number of connections reached, or `None` when the payload was
/// malformed or of a kind that is not relayed.
pub async fn handle_message(hub: &RealtimeHub, payload: &str) -> Option<usize> {
    match JobEvent::decode(payload) {
        Ok(Some(event)) => {
            let delivered = hub.emit_to_room(event.client_id(), &event).await;
            tracing::debug!(
                job_id = %event.job_id(),
                client_id = %event.client_id(),
                event = event.kind(),
                delivered = delivered,
                "Job event relayed"
            );
            Some(delivered)
        }
        Ok(None) => {
            tracing::debug!("Ignoring notification of unrelayed kind");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed notification");
            None
        }
    }
}

/// Subscribe to `channel` and relay every message to the hub until
/// `shutdown` is cancelled.
///
/// A lost or failed subscription is retried with exponential backoff from
/// 5 s, capped at 60 s.
pub async fn run_bus_listener(
    bus: Arc<dyn NotificationBus>,
    hub: Arc<RealtimeHub>,
    channel: String,
    shutdown: CancellationToken,
) {
    run_bus_listener_with_backoff(bus, hub, channel, shutdown, INITIAL_BACKOFF, MAX_BACKOFF).await
}

pub async fn run_bus_listener_with_backoff(
    bus: Arc<dyn NotificationBus>,
    hub: Arc<RealtimeHub>,
    channel: String,
    shutdown: CancellationToken,
    initial_backoff: Duration,
    max_backoff: Duration,
) {
    let mut backoff = initial_backoff;

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match bus.subscribe(&channel).await {
            Ok(mut messages) => {
                tracing::info!(channel = %channel, "Bus listener subscribed");
                backoff = initial_backoff;

                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => {
                            tracing::info!(channel = %channel, "Bus listener shutting down");
                            return;
                        }
                        message = messages.next() => match message {
                            Some(payload) => {
                                handle_message(&hub, &payload).await;
                            }
                            None => {
                                tracing::warn!(channel = %channel, "Bus subscription ended, will resubscribe");
                                break;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    channel = %channel,
                    retry_in_secs = backoff.as_secs_f64(),
                    "Bus subscribe failed, will retry"
                );
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(max_backoff);
    }

    tracing::info!(channel = %channel, "Bus listener stopped");
}
