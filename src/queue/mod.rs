//! Reservation queue: the durable, ordered channel carrying successful
//! reservations from the admission gate to the payment workers.
//!
//! The payload is the text-encoded [`ReservationMessage`]. The producing side
//! and the consuming side are separate traits because one instance may run
//! only the gate, only the workers, or both.

mod memory;
mod redpanda;

pub use memory::{MemoryQueue, MemorySource};
pub use redpanda::{RedpandaQueue, RedpandaSource};

use crate::types::ReservationMessage;
use async_trait::async_trait;
use thiserror::Error;

/// Reservation queue failure.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue client could not be created.
    #[error("failed to create queue client: {0}")]
    Connect(String),

    /// The reservation message could not be appended.
    #[error("failed to enqueue reservation: {0}")]
    Enqueue(String),
}

/// Producing side of the reservation queue.
#[async_trait]
pub trait ReservationQueue: Send + Sync {
    /// Appends a reservation message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Enqueue`] if the message was not accepted; the
    /// caller must roll the cache reservation back in that case.
    async fn enqueue(&self, message: &ReservationMessage) -> Result<(), QueueError>;
}

/// Consuming side of the reservation queue.
///
/// Malformed payloads are logged and skipped inside the implementation; the
/// worker loop only ever sees well-formed messages. `None` means the source
/// is closed and the worker should shut down.
#[async_trait]
pub trait ReservationSource: Send {
    /// Waits for the next reservation message.
    async fn recv(&mut self) -> Option<ReservationMessage>;
}
