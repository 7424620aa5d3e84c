//! Admission gate: the atomic reserve-or-reject decision point for stock.
//!
//! The purchase hot path performs exactly one atomic cache operation and one
//! queue enqueue; it never touches durable storage synchronously. The order
//! id is generated here, before the message is sent, so the caller can hand
//! it back to the client immediately for status tracking.

use crate::cache::StockCache;
use crate::error::{FlashSaleError, Result};
use crate::queue::ReservationQueue;
use crate::types::{InstanceId, OrderId, ReservationMessage, ReservationOutcome, UserId, VoucherId};
use std::sync::Arc;
use tracing::{info, warn};

/// Immediate result of a purchase attempt. An admitted reservation is
/// provisional until a terminal status event arrives on the push channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// A unit was reserved and handed to the payment workers.
    Admitted {
        /// Order id to track settlement with.
        order_id: OrderId,
        /// Stock left after this reservation.
        remaining: i64,
    },
    /// The atomic check-and-reserve step rejected the attempt.
    Rejected(ReservationOutcome),
}

/// Executes the atomic check-and-reserve and hands successful reservations
/// to the payment workers.
pub struct AdmissionGate {
    cache: Arc<dyn StockCache>,
    queue: Arc<dyn ReservationQueue>,
    origin: InstanceId,
}

impl AdmissionGate {
    /// Builds a gate publishing reservations on behalf of `origin`.
    pub fn new(
        cache: Arc<dyn StockCache>,
        queue: Arc<dyn ReservationQueue>,
        origin: InstanceId,
    ) -> Self {
        Self {
            cache,
            queue,
            origin,
        }
    }

    /// Attempts to reserve one unit of `voucher` for `user`.
    ///
    /// On success a [`ReservationMessage`] is enqueued for asynchronous
    /// settlement. If the enqueue fails after the cache already granted the
    /// unit, the reservation is rolled back entirely (counter and buyer
    /// mark) so the pool is not leaked and the user keeps the right to
    /// retry.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::Queue`] when the reservation message could
    /// not be appended; cache transport failures surface as
    /// [`FlashSaleError::Cache`].
    pub async fn reserve(&self, voucher: VoucherId, user: UserId) -> Result<Admission> {
        let outcome = self.cache.reserve(voucher, user).await?;
        let ReservationOutcome::Reserved { remaining } = outcome else {
            return Ok(Admission::Rejected(outcome));
        };

        let order_id = OrderId::generate();
        let message = ReservationMessage {
            order_id,
            user_id: user,
            voucher_id: voucher,
            origin: self.origin.clone(),
        };
        if let Err(enqueue_err) = self.queue.enqueue(&message).await {
            if let Err(rollback_err) = self.cache.unreserve(voucher, user).await {
                // The unit stays leaked until the next mirror refresh.
                warn!(
                    voucher_id = %voucher,
                    user_id = %user,
                    error = %rollback_err,
                    "failed to roll back reservation after enqueue failure"
                );
            }
            return Err(FlashSaleError::Queue(enqueue_err));
        }

        info!(
            order_id = %order_id,
            user_id = %user,
            voucher_id = %voucher,
            remaining,
            "reservation admitted"
        );
        Ok(Admission::Admitted { order_id, remaining })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::cache::MemoryStockCache;
    use crate::queue::{MemoryQueue, ReservationSource};
    use crate::types::{Money, Voucher};

    fn voucher(quantity: u32) -> Voucher {
        Voucher {
            id: VoucherId::new(1),
            name: "launch".to_string(),
            description: String::new(),
            price: Money::from_cents(500),
            quantity,
            deleted: false,
        }
    }

    #[tokio::test]
    async fn reserved_outcome_carries_an_order_id_and_enqueues() {
        let cache = Arc::new(MemoryStockCache::new());
        cache.refresh_mirror(&voucher(2)).await.unwrap();
        let (queue, mut source) = MemoryQueue::channel();
        let gate = AdmissionGate::new(cache, Arc::new(queue), InstanceId::new("a"));

        let admission = gate.reserve(VoucherId::new(1), UserId::new(7)).await.unwrap();
        let Admission::Admitted { order_id, remaining } = admission else {
            panic!("expected admission, got {admission:?}");
        };
        assert_eq!(remaining, 1);

        let message = source.recv().await.unwrap();
        assert_eq!(message.order_id, order_id);
        assert_eq!(message.user_id, UserId::new(7));
        assert_eq!(message.voucher_id, VoucherId::new(1));
        assert_eq!(message.origin, InstanceId::new("a"));
    }

    #[tokio::test]
    async fn rejections_carry_no_order_id_and_enqueue_nothing() {
        let cache = Arc::new(MemoryStockCache::new());
        cache.refresh_mirror(&voucher(0)).await.unwrap();
        let (queue, mut source) = MemoryQueue::channel();
        let gate = AdmissionGate::new(cache, Arc::new(queue), InstanceId::new("a"));

        let admission = gate.reserve(VoucherId::new(1), UserId::new(7)).await.unwrap();
        assert_eq!(
            admission,
            Admission::Rejected(ReservationOutcome::OutOfStock)
        );

        // Nothing was enqueued.
        drop(gate);
        assert!(source.recv().await.is_none());
    }

    #[tokio::test]
    async fn enqueue_failure_rolls_the_reservation_back() {
        let cache = Arc::new(MemoryStockCache::new());
        cache.refresh_mirror(&voucher(1)).await.unwrap();
        let (queue, source) = MemoryQueue::channel();
        drop(source); // every enqueue now fails
        let gate = AdmissionGate::new(
            Arc::clone(&cache) as Arc<dyn StockCache>,
            Arc::new(queue),
            InstanceId::new("a"),
        );

        let result = gate.reserve(VoucherId::new(1), UserId::new(7)).await;
        assert!(matches!(result, Err(FlashSaleError::Queue(_))));

        // Unit returned and buyer mark cleared; the user may retry.
        assert_eq!(cache.remaining(VoucherId::new(1)).await.unwrap(), Some(1));
        assert_eq!(cache.buyer_count(VoucherId::new(1)), 0);
    }
}
