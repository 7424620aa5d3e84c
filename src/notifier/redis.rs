//! Redis pub/sub status notifier.
//!
//! Events are JSON-encoded [`StatusEvent`] payloads on
//! `flashsale:status:{instance}` channels. Redis pub/sub gives exactly the
//! delivery contract the notifier asks for: fire-and-forget fan-out with no
//! persistence.

use super::{status_channel, NotifyError, StatusFeed, StatusNotifier, StatusStream};
use crate::types::{InstanceId, StatusEvent};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

/// Status notifier backed by Redis pub/sub.
#[derive(Clone)]
pub struct RedisStatusNotifier {
    conn: ConnectionManager,
    client: Client,
}

impl RedisStatusNotifier {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the client or connection manager cannot be
    /// created.
    pub async fn connect(redis_url: &str) -> Result<Self, NotifyError> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { conn, client })
    }
}

#[async_trait]
impl StatusNotifier for RedisStatusNotifier {
    async fn publish(&self, event: &StatusEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| NotifyError::Backend(format!("failed to encode status event: {e}")))?;
        let mut conn = self.conn.clone();
        let _: () = conn.publish(status_channel(&event.origin), payload).await?;
        Ok(())
    }
}

#[async_trait]
impl StatusFeed for RedisStatusNotifier {
    async fn subscribe(&self, instance: &InstanceId) -> Result<StatusStream, NotifyError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(status_channel(instance)).await?;
        let stream = pubsub.into_on_message().filter_map(|msg| {
            let event = msg
                .get_payload::<String>()
                .ok()
                .and_then(|payload| match serde_json::from_str(&payload) {
                    Ok(event) => Some(event),
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping undecodable status event");
                        None
                    }
                });
            futures::future::ready(event)
        });
        Ok(Box::pin(stream))
    }
}
