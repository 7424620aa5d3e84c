//! Status notifier: publish/subscribe fan-out for order-status events.
//!
//! Every service instance holding live client push connections subscribes to
//! a channel scoped to its own instance identifier; workers publish each
//! event only to the instance that originated the purchase, because that is
//! the only instance holding the corresponding open connection. Delivery is
//! best-effort: a dropped event is not retried or persisted.

mod memory;
mod redis;
mod router;

pub use memory::MemoryStatusNotifier;
pub use redis::RedisStatusNotifier;
pub use router::OrderStatusRouter;

use crate::types::{InstanceId, StatusEvent};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

/// Channel carrying status events addressed to one instance.
#[must_use]
pub fn status_channel(instance: &InstanceId) -> String {
    format!("flashsale:status:{instance}")
}

/// Status notifier failure.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The pub/sub backend rejected or dropped the operation.
    #[error("status notifier backend error: {0}")]
    Backend(String),
}

impl From<::redis::RedisError> for NotifyError {
    fn from(err: ::redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Stream of status events addressed to one instance.
pub type StatusStream = Pin<Box<dyn Stream<Item = StatusEvent> + Send>>;

/// Publishing side of the status fan-out.
#[async_trait]
pub trait StatusNotifier: Send + Sync {
    /// Publishes an event on the channel of `event.origin`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the backend rejects the publish. Callers on
    /// the settlement path log and continue; delivery is best-effort.
    async fn publish(&self, event: &StatusEvent) -> Result<(), NotifyError>;
}

/// Subscribing side of the status fan-out.
#[async_trait]
pub trait StatusFeed: Send + Sync {
    /// Subscribes to the channel of one instance.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the subscription cannot be established.
    async fn subscribe(&self, instance: &InstanceId) -> Result<StatusStream, NotifyError>;
}
