//! In-process status notifier for tests and single-node deployments.

use super::{status_channel, NotifyError, StatusFeed, StatusNotifier, StatusStream};
use crate::types::{InstanceId, StatusEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Per-channel fan-out over unbounded in-process channels. Matches the
/// best-effort contract: events published to a channel nobody subscribed to
/// are dropped.
#[derive(Clone, Default)]
pub struct MemoryStatusNotifier {
    channels: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<StatusEvent>>>>>,
}

impl MemoryStatusNotifier {
    /// Creates an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusNotifier for MemoryStatusNotifier {
    async fn publish(&self, event: &StatusEvent) -> Result<(), NotifyError> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(senders) = channels.get_mut(&status_channel(&event.origin)) {
            senders.retain(|sender| sender.send(event.clone()).is_ok());
        }
        Ok(())
    }
}

#[async_trait]
impl StatusFeed for MemoryStatusNotifier {
    async fn subscribe(&self, instance: &InstanceId) -> Result<StatusStream, NotifyError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
            channels.entry(status_channel(instance)).or_default().push(tx);
        }
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{OrderId, StatusUpdate};
    use futures::StreamExt;

    fn event(origin: &str, order: u64) -> StatusEvent {
        StatusEvent {
            origin: InstanceId::new(origin),
            order_id: OrderId::new(order),
            status: StatusUpdate::Started,
        }
    }

    #[tokio::test]
    async fn events_reach_only_the_addressed_instance() {
        let notifier = MemoryStatusNotifier::new();
        let mut feed_a = notifier.subscribe(&InstanceId::new("a")).await.unwrap();
        let mut feed_b = notifier.subscribe(&InstanceId::new("b")).await.unwrap();

        notifier.publish(&event("a", 1)).await.unwrap();
        notifier.publish(&event("b", 2)).await.unwrap();

        assert_eq!(feed_a.next().await.unwrap().order_id, OrderId::new(1));
        assert_eq!(feed_b.next().await.unwrap().order_id, OrderId::new(2));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_best_effort() {
        let notifier = MemoryStatusNotifier::new();
        notifier.publish(&event("nobody", 1)).await.unwrap();
    }
}
