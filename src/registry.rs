use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::metrics;
use crate::security::ip_reputation::VisibilityMode;
use crate::storage::city_key;

/// Per-socket outbound queue depth. A receiver that falls this far behind
/// is dropped rather than buffered without bound.
const SEND_QUEUE_CAPACITY: usize = 32;

/// One live WebSocket on this instance.
struct ConnectionEntry {
    city: String,
    remote_ip: String,
    tx: mpsc::Sender<String>,
}

/// Per-instance registry of live client sockets.
///
/// Tasks hold only the receiving end of their queue, never a reference back
/// into the registry; the WebSocket task removes its own entry on exit.
/// Sends during fan-out are non-blocking, so the read lock is never held
/// across a suspension point.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a socket subscribed to `city`. Returns the socket id and the
    /// receiving end of its send queue.
    pub async fn register(
        &self,
        city: &str,
        remote_ip: &str,
    ) -> (Uuid, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let id = Uuid::new_v4();

        let mut connections = self.connections.write().await;
        connections.insert(
            id,
            ConnectionEntry {
                city: city_key(city),
                remote_ip: remote_ip.to_string(),
                tx,
            },
        );
        metrics::ACTIVE_WS_CONNECTIONS.set(connections.len() as i64);
        tracing::debug!(socket_id = %id, city = %city, "WebSocket registered");

        (id, rx)
    }

    pub async fn remove(&self, id: Uuid) {
        let mut connections = self.connections.write().await;
        if connections.remove(&id).is_some() {
            metrics::ACTIVE_WS_CONNECTIONS.set(connections.len() as i64);
            tracing::debug!(socket_id = %id, "WebSocket removed");
        }
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Fan a frame out to every socket subscribed to `city`, honoring the
    /// message's visibility mode. Slow or closed sockets are evicted.
    /// Returns the number of sockets the frame was queued for.
    pub async fn fan_out(
        &self,
        city: &str,
        frame: &str,
        visibility: VisibilityMode,
        sender_ip: &str,
    ) -> usize {
        if visibility == VisibilityMode::Hidden {
            return 0;
        }

        let city = city_key(city);
        let mut delivered = 0;
        let mut stale: Vec<Uuid> = Vec::new();

        {
            let connections = self.connections.read().await;
            for (id, entry) in connections.iter() {
                if entry.city != city {
                    continue;
                }
                if visibility == VisibilityMode::Throttled && entry.remote_ip != sender_ip {
                    continue;
                }
                match entry.tx.try_send(frame.to_string()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(socket_id = %id, "Send queue full, dropping slow socket");
                        stale.push(*id);
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => stale.push(*id),
                }
            }
        }

        if !stale.is_empty() {
            metrics::BROADCAST_FAILURES_TOTAL.inc_by(stale.len() as u64);
            let mut connections = self.connections.write().await;
            for id in stale {
                connections.remove(&id);
            }
            metrics::ACTIVE_WS_CONNECTIONS.set(connections.len() as i64);
        }

        delivered
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
