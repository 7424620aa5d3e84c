//! Purchase facade exposed to the inbound request layer.
//!
//! The request layer supplies an authenticated user id; the facade turns the
//! admission outcome into the error taxonomy callers work with. A returned
//! order id means "reserved, settlement pending": the caller must treat it
//! as provisional until a terminal status event (or its own polling
//! fallback) says otherwise.

use crate::admission::{Admission, AdmissionGate};
use crate::error::{FlashSaleError, Result};
use crate::types::{OrderId, ReservationOutcome, UserId, VoucherId};
use tracing::info;

/// Accepted purchase: a provisional reservation with its tracking id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Purchase {
    /// Order id for status tracking.
    pub order_id: OrderId,
    /// Stock left after this reservation, as seen by the cache.
    pub remaining: i64,
}

/// Entry point for purchase requests.
pub struct FlashSale {
    gate: AdmissionGate,
}

impl FlashSale {
    /// Wraps an admission gate.
    #[must_use]
    pub const fn new(gate: AdmissionGate) -> Self {
        Self { gate }
    }

    /// Attempts to buy one unit of `voucher` for `user`.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::OutOfStock`] and
    ///   [`FlashSaleError::DuplicatePurchase`] are definitive rejections.
    /// - [`FlashSaleError::CacheInconsistency`] is a server fault: the
    ///   voucher has no usable quantity mirror.
    /// - Transport failures ([`FlashSaleError::Cache`],
    ///   [`FlashSaleError::Queue`]) left no reservation behind.
    pub async fn purchase(&self, voucher: VoucherId, user: UserId) -> Result<Purchase> {
        match self.gate.reserve(voucher, user).await? {
            Admission::Admitted {
                order_id,
                remaining,
            } => {
                info!(order_id = %order_id, voucher_id = %voucher, user_id = %user, "order placed");
                Ok(Purchase {
                    order_id,
                    remaining,
                })
            }
            Admission::Rejected(ReservationOutcome::OutOfStock) => Err(FlashSaleError::OutOfStock),
            Admission::Rejected(ReservationOutcome::DuplicatePurchase) => {
                Err(FlashSaleError::DuplicatePurchase)
            }
            Admission::Rejected(_) => Err(FlashSaleError::CacheInconsistency(format!(
                "no usable quantity mirror for voucher {voucher}"
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStockCache, StockCache};
    use crate::queue::MemoryQueue;
    use crate::types::{InstanceId, Money, Voucher};
    use std::sync::Arc;

    async fn flash_sale(quantity: u32) -> FlashSale {
        let cache = Arc::new(MemoryStockCache::new());
        cache
            .refresh_mirror(&Voucher {
                id: VoucherId::new(1),
                name: "launch".to_string(),
                description: String::new(),
                price: Money::from_cents(500),
                quantity,
                deleted: false,
            })
            .await
            .unwrap();
        let (queue, source) = MemoryQueue::channel();
        // Keep the consumer alive for the duration of the test.
        tokio::spawn(async move {
            let mut source = source;
            use crate::queue::ReservationSource;
            while source.recv().await.is_some() {}
        });
        FlashSale::new(AdmissionGate::new(
            cache,
            Arc::new(queue),
            InstanceId::new("a"),
        ))
    }

    #[tokio::test]
    async fn purchase_returns_tracking_id() {
        let sale = flash_sale(3).await;
        let purchase = sale.purchase(VoucherId::new(1), UserId::new(7)).await.unwrap();
        assert_eq!(purchase.remaining, 2);
    }

    #[tokio::test]
    async fn rejections_map_to_the_error_taxonomy() {
        let sale = flash_sale(1).await;
        sale.purchase(VoucherId::new(1), UserId::new(7)).await.unwrap();

        let duplicate = sale.purchase(VoucherId::new(1), UserId::new(7)).await;
        assert!(matches!(duplicate, Err(FlashSaleError::DuplicatePurchase)));

        let sold_out = sale.purchase(VoucherId::new(1), UserId::new(8)).await;
        assert!(matches!(sold_out, Err(FlashSaleError::OutOfStock)));

        let unknown = sale.purchase(VoucherId::new(42), UserId::new(9)).await;
        assert!(matches!(unknown, Err(FlashSaleError::CacheInconsistency(_))));
    }
}
