//! Payment worker: asynchronous settlement of reservations.
//!
//! Workers consume reservation messages one at a time, decoupled in time
//! from the admission path. Per message: emit "started", load the records,
//! settle or fail, and on any failure return the reserved unit to the stock
//! cache exactly once. Insufficient credit and unexpected settlement faults
//! are discovered here, after the synchronous response already confirmed the
//! reservation; they are communicated only through the status channel.
//!
//! There is no automatic retry: a settlement fault becomes a terminal
//! `Failed` order with compensation rather than a stuck pending order, and
//! the at-least-once queue is tolerated by skipping messages whose order is
//! already terminal.

use crate::cache::StockCache;
use crate::error::FlashSaleError;
use crate::notifier::StatusNotifier;
use crate::queue::ReservationSource;
use crate::storage::{Storage, StorageError};
use crate::types::{Order, ReservationMessage, StatusEvent, StatusUpdate};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Reason attached to the failed status when credit does not cover the price.
const INSUFFICIENT_CREDIT: &str = "Insufficient credit";

/// Consumes reservation messages and drives each order to a terminal status.
pub struct PaymentWorker {
    storage: Arc<dyn Storage>,
    cache: Arc<dyn StockCache>,
    notifier: Arc<dyn StatusNotifier>,
    settlement_delay: Duration,
}

enum Settlement {
    Confirmed,
    InsufficientCredit,
}

impl PaymentWorker {
    /// Builds a worker.
    ///
    /// `settlement_delay` simulates the external settlement round-trip; pass
    /// [`Duration::ZERO`] to disable it.
    pub fn new(
        storage: Arc<dyn Storage>,
        cache: Arc<dyn StockCache>,
        notifier: Arc<dyn StatusNotifier>,
        settlement_delay: Duration,
    ) -> Self {
        Self {
            storage,
            cache,
            notifier,
            settlement_delay,
        }
    }

    /// Processes messages until the source closes.
    pub async fn run<S: ReservationSource>(&self, mut source: S) {
        info!("payment worker started");
        while let Some(message) = source.recv().await {
            self.process(&message).await;
        }
        info!("reservation source closed, payment worker stopping");
    }

    /// Drives one reservation to a terminal order status.
    pub async fn process(&self, message: &ReservationMessage) {
        match self.storage.order_status(message.order_id).await {
            Ok(Some(status)) if status.is_terminal() => {
                info!(order_id = %message.order_id, status = status.as_str(), "skipping terminal order");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                // Without the guard we cannot tell a redelivery from a fresh
                // message; settling anyway could compensate twice.
                error!(order_id = %message.order_id, error = %err, "cannot check order status, leaving message unprocessed");
                return;
            }
        }

        info!(
            order_id = %message.order_id,
            user_id = %message.user_id,
            voucher_id = %message.voucher_id,
            "processing payment"
        );

        let pending = Order::pending(message.order_id, message.user_id, message.voucher_id);
        if let Err(err) = self.storage.record_pending(&pending).await {
            error!(order_id = %message.order_id, error = %err, "cannot record pending order, leaving message unprocessed");
            return;
        }
        self.emit(message, StatusUpdate::Started).await;

        if !self.settlement_delay.is_zero() {
            tokio::time::sleep(self.settlement_delay).await;
        }

        match self.settle(message).await {
            Ok(Settlement::Confirmed) => {
                info!(order_id = %message.order_id, "payment successful");
                self.emit(message, StatusUpdate::Successful).await;
            }
            Ok(Settlement::InsufficientCredit) => {
                warn!(order_id = %message.order_id, "payment failed: insufficient credit");
                self.fail(message, INSUFFICIENT_CREDIT).await;
            }
            Err(err) => {
                error!(order_id = %message.order_id, error = %err, "settlement fault");
                self.fail(message, "Settlement error").await;
            }
        }
    }

    async fn settle(&self, message: &ReservationMessage) -> Result<Settlement, FlashSaleError> {
        let user = self.storage.load_user(message.user_id).await?;
        let voucher = self.storage.load_voucher(message.voucher_id).await?;

        if user.credit < voucher.price {
            return Ok(Settlement::InsufficientCredit);
        }

        match self
            .storage
            .settle(message.order_id, message.user_id, message.voucher_id, voucher.price)
            .await
        {
            Ok(()) => Ok(Settlement::Confirmed),
            // Credit raced to below the price between the check and the
            // conditional update; same terminal outcome as the pre-check.
            Err(StorageError::Conflict(reason)) if reason.contains("credit") => {
                Ok(Settlement::InsufficientCredit)
            }
            Err(err) => Err(FlashSaleError::SettlementFault(err.to_string())),
        }
    }

    /// Marks the order failed, returns the reserved unit to the cache
    /// exactly once, and emits the terminal failed event.
    ///
    /// The unit goes back only after the order is durably Failed. When that
    /// write fails the order stays pending and the message is left for
    /// redelivery, so a retry cannot compensate a second time.
    async fn fail(&self, message: &ReservationMessage, reason: &str) {
        if let Err(err) = self.storage.finalize_failed(message.order_id).await {
            error!(
                order_id = %message.order_id,
                error = %err,
                "cannot record failed order, leaving message for redelivery"
            );
            return;
        }
        match self.cache.release(message.voucher_id).await {
            Ok(()) => info!(
                order_id = %message.order_id,
                voucher_id = %message.voucher_id,
                "reserved unit returned to stock cache"
            ),
            Err(err) => error!(
                order_id = %message.order_id,
                voucher_id = %message.voucher_id,
                error = %err,
                "compensation failed, unit stays leaked until the next mirror refresh"
            ),
        }
        self.emit(
            message,
            StatusUpdate::Failed {
                reason: reason.to_string(),
            },
        )
        .await;
    }

    /// Best-effort status publish addressed to the message's origin.
    async fn emit(&self, message: &ReservationMessage, status: StatusUpdate) {
        let event = StatusEvent {
            origin: message.origin.clone(),
            order_id: message.order_id,
            status,
        };
        if let Err(err) = self.notifier.publish(&event).await {
            warn!(order_id = %message.order_id, error = %err, "status event dropped");
        }
    }
}
