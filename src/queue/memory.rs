//! In-process reservation queue for tests and single-node deployments.

use super::{QueueError, ReservationQueue, ReservationSource};
use crate::types::ReservationMessage;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Producing side of the in-process queue.
#[derive(Clone)]
pub struct MemoryQueue {
    tx: mpsc::UnboundedSender<ReservationMessage>,
}

/// Consuming side of the in-process queue.
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<ReservationMessage>,
}

impl MemoryQueue {
    /// Creates a connected producer/consumer pair.
    #[must_use]
    pub fn channel() -> (Self, MemorySource) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, MemorySource { rx })
    }
}

#[async_trait]
impl ReservationQueue for MemoryQueue {
    async fn enqueue(&self, message: &ReservationMessage) -> Result<(), QueueError> {
        self.tx
            .send(message.clone())
            .map_err(|_| QueueError::Enqueue("reservation channel closed".to_string()))
    }
}

#[async_trait]
impl ReservationSource for MemorySource {
    async fn recv(&mut self) -> Option<ReservationMessage> {
        self.rx.recv().await
    }
}
