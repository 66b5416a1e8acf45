use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::message::JobEvent;

/// Identifies one live connection inside a room.
pub type ConnectionId = Uuid;

/// Channel sender half for pushing events to a connection.
pub type ClientSender = mpsc::UnboundedSender<JobEvent>;

/// Live client connections grouped into rooms keyed by client ID.
///
/// The transport that drains each receiver (WebSocket, SSE, ...) lives
/// outside this crate.
#[derive(Default)]
pub struct RealtimeHub {
    rooms: RwLock<HashMap<Uuid, HashMap<ConnectionId, ClientSender>>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection in `client_id`'s room.
    ///
    /// Returns the connection ID and the receiver the caller forwards to the
    /// client.
    pub async fn join(&self, client_id: Uuid) -> (ConnectionId, mpsc::UnboundedReceiver<JobEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();
        self.rooms
            .write()
            .await
            .entry(client_id)
            .or_default()
            .insert(conn_id, tx);
        tracing::debug!(client_id = %client_id, conn_id = %conn_id, "Client joined room");
        (conn_id, rx)
    }

    pub async fn leave(&self, client_id: Uuid, conn_id: ConnectionId) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(&client_id) {
            room.remove(&conn_id);
            if room.is_empty() {
                rooms.remove(&client_id);
            }
        }
    }

    /// Send `event` to every connection in the room.
    ///
    /// Returns how many connections accepted it. Connections whose receiver
    /// is gone are pruned.
    pub async fn emit_to_room(&self, client_id: Uuid, event: &JobEvent) -> usize {
        let mut closed = Vec::new();
        let mut delivered = 0;
        {
            let rooms = self.rooms.read().await;
            let Some(room) = rooms.get(&client_id) else {
                return 0;
            };
            for (conn_id, sender) in room {
                if sender.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(*conn_id);
                }
            }
        }

        for conn_id in closed {
            self.leave(client_id, conn_id).await;
        }

        delivered
    }

    pub async fn room_size(&self, client_id: Uuid) -> usize {
        self.rooms
            .read()
            .await
            .get(&client_id)
            .map(|room| room.len())
            .unwrap_or(0)
    }
}
