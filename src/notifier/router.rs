//! Per-order routing of status events on the connection-holder side.
//!
//! One router runs per service instance. It consumes the instance's status
//! feed and fans each event out to the watcher registered for that order,
//! the callback surface the push-connection layer attaches to. Watchers are
//! dropped after their terminal event; events without a watcher are dropped,
//! since the client can fall back to polling order status.

use super::StatusStream;
use crate::types::{OrderId, StatusUpdate};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;

/// Dispatches instance-scoped status events to per-order watchers.
#[derive(Default)]
pub struct OrderStatusRouter {
    watchers: Mutex<HashMap<OrderId, mpsc::UnboundedSender<StatusUpdate>>>,
}

impl OrderStatusRouter {
    /// Creates a router with no watchers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a watcher for one order and returns its update stream.
    ///
    /// A second registration for the same order replaces the first; the
    /// push-connection layer owns at most one live connection per order.
    pub fn watch(&self, order_id: OrderId) -> mpsc::UnboundedReceiver<StatusUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.insert(order_id, tx);
        rx
    }

    /// Consumes the instance's status feed until it closes.
    pub async fn run(&self, mut feed: StatusStream) {
        while let Some(event) = feed.next().await {
            self.dispatch(event.order_id, event.status);
        }
        tracing::info!("status feed closed, router stopping");
    }

    fn dispatch(&self, order_id: OrderId, status: StatusUpdate) {
        let terminal = status.is_terminal();
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        match watchers.get(&order_id) {
            Some(sender) => {
                if sender.send(status).is_err() || terminal {
                    watchers.remove(&order_id);
                }
            }
            None => {
                tracing::debug!(order_id = %order_id, "no watcher for status event, dropping");
            }
        }
    }
}
