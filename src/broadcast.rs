use futures::StreamExt;
use redis::RedisError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::metrics;
use crate::models::ChatMessage;
use crate::registry::ConnectionRegistry;
use crate::security::ip_reputation::VisibilityMode;
use crate::store::RedisStore;

pub const BROADCAST_CHANNEL: &str = "chat:messages";

/// Envelope carried on the shared pub/sub channel. Every instance receives
/// every envelope and applies the visibility policy against its own sockets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    pub message: ChatMessage,
    pub origin_instance: String,
    pub visibility: VisibilityMode,
    pub sender_ip: String,
}

/// Publishes accepted messages to the shared channel and runs this
/// instance's single subscriber task.
#[derive(Clone)]
pub struct BroadcastBus {
    store: RedisStore,
    instance_id: String,
}

impl BroadcastBus {
    pub fn new(store: RedisStore, instance_id: String) -> Self {
        Self { store, instance_id }
    }

    /// Publish an accepted message.
    ///
    /// Hidden visibility never reaches the channel; shadowbanned senders are
    /// short-circuited before this call. Failures are logged and metered but
    /// never fail the HTTP response - persistence is the source of truth.
    pub async fn publish(
        &self,
        message: &ChatMessage,
        visibility: VisibilityMode,
        sender_ip: &str,
    ) -> Result<(), RedisError> {
        if visibility == VisibilityMode::Hidden {
            return Ok(());
        }

        let envelope = BroadcastEnvelope {
            message: message.clone(),
            origin_instance: self.instance_id.clone(),
            visibility,
            sender_ip: sender_ip.to_string(),
        };

        let payload = match serde_json::to_string(&envelope) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize broadcast envelope");
                metrics::BROADCAST_FAILURES_TOTAL.inc();
                return Ok(());
            }
        };

        self.store.publish(BROADCAST_CHANNEL, &payload).await
    }

    /// Spawn the single subscriber task for this instance.
    ///
    /// The task owns a dedicated pub/sub connection, deserializes envelopes
    /// and hands them to the local registry. It reconnects with backoff if
    /// the connection drops; fan-out uses non-blocking sends only.
    pub fn spawn_subscriber(&self, registry: Arc<ConnectionRegistry>) {
        let client = self.store.pubsub_client();
        let instance_id = self.instance_id.clone();

        tokio::spawn(async move {
            loop {
                let mut pubsub = match client.get_async_pubsub().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!(error = %e, "Broadcast subscriber cannot connect, retrying");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        continue;
                    }
                };

                if let Err(e) = pubsub.subscribe(BROADCAST_CHANNEL).await {
                    tracing::error!(error = %e, "Broadcast subscribe failed, retrying");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }

                tracing::info!(
                    instance_id = %instance_id,
                    channel = BROADCAST_CHANNEL,
                    "Broadcast subscriber running"
                );

                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!(error = %e, "Unreadable broadcast payload");
                            continue;
                        }
                    };

                    let envelope: BroadcastEnvelope = match serde_json::from_str(&payload) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            tracing::warn!(error = %e, "Unparsable broadcast envelope");
                            continue;
                        }
                    };

                    let frame = match serde_json::to_string(&envelope.message) {
                        Ok(frame) => frame,
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to serialize feed frame");
                            continue;
                        }
                    };

                    let delivered = registry
                        .fan_out(
                            &envelope.message.location,
                            &frame,
                            envelope.visibility,
                            &envelope.sender_ip,
                        )
                        .await;
                    tracing::debug!(
                        message_id = %envelope.message.id,
                        origin = %envelope.origin_instance,
                        delivered,
                        "Broadcast fanned out"
                    );
                }

                tracing::warn!("Broadcast pub/sub stream ended, reconnecting");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        });
    }
}
