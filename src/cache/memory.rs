//! In-process stock cache.
//!
//! A single mutex guards both the counter and the buyer set, which gives the
//! same no-interleaving guarantee as the server-side script when the cache is
//! co-located with one process. Used by tests and single-node deployments.

use super::{CacheError, StockCache};
use crate::types::{ReservationOutcome, UserId, Voucher, VoucherId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

/// Per-voucher cache state. The counter is stored as a raw string to model
/// the cache backend faithfully: a missing or malformed counter must surface
/// as a cache inconsistency, not as zero stock.
#[derive(Debug, Default)]
struct Slot {
    counter: Option<String>,
    buyers: HashSet<UserId>,
}

/// Mutex-guarded stock cache for tests and co-located deployments.
#[derive(Debug, Default)]
pub struct MemoryStockCache {
    slots: Mutex<HashMap<VoucherId, Slot>>,
}

impl MemoryStockCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the raw counter value for a voucher. Test support for
    /// exercising the malformed-counter path.
    pub fn set_raw_counter(&self, voucher: VoucherId, raw: &str) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(voucher).or_default().counter = Some(raw.to_string());
    }

    /// Number of users currently marked as buyers of a voucher.
    #[must_use]
    pub fn buyer_count(&self, voucher: VoucherId) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(&voucher).map_or(0, |slot| slot.buyers.len())
    }
}

fn parse_counter(raw: &str) -> Result<i64, CacheError> {
    raw.parse()
        .map_err(|_| CacheError::Backend(format!("counter value '{raw}' is not an integer")))
}

#[async_trait]
impl StockCache for MemoryStockCache {
    async fn reserve(
        &self,
        voucher: VoucherId,
        user: UserId,
    ) -> Result<ReservationOutcome, CacheError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(voucher).or_default();
        if slot.buyers.contains(&user) {
            return Ok(ReservationOutcome::DuplicatePurchase);
        }
        let Some(raw) = slot.counter.as_deref() else {
            return Ok(ReservationOutcome::CacheInconsistency);
        };
        let Ok(remaining) = raw.parse::<i64>() else {
            return Ok(ReservationOutcome::CacheInconsistency);
        };
        if remaining <= 0 {
            return Ok(ReservationOutcome::OutOfStock);
        }
        slot.counter = Some((remaining - 1).to_string());
        slot.buyers.insert(user);
        Ok(ReservationOutcome::Reserved {
            remaining: remaining - 1,
        })
    }

    async fn release(&self, voucher: VoucherId) -> Result<(), CacheError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(voucher).or_default();
        // An evicted mirror stays evicted; the increment applies only to a
        // live counter.
        if let Some(raw) = slot.counter.as_deref() {
            slot.counter = Some((parse_counter(raw)? + 1).to_string());
        }
        Ok(())
    }

    async fn unreserve(&self, voucher: VoucherId, user: UserId) -> Result<(), CacheError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(voucher).or_default();
        if let Some(raw) = slot.counter.as_deref() {
            slot.counter = Some((parse_counter(raw)? + 1).to_string());
        }
        slot.buyers.remove(&user);
        Ok(())
    }

    async fn refresh_mirror(&self, voucher: &Voucher) -> Result<(), CacheError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(voucher.id).or_default();
        if voucher.deleted {
            slot.counter = None;
        } else {
            slot.counter = Some(voucher.quantity.to_string());
        }
        Ok(())
    }

    async fn remaining(&self, voucher: VoucherId) -> Result<Option<i64>, CacheError> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slots
            .get(&voucher)
            .and_then(|slot| slot.counter.as_deref())
            .and_then(|raw| raw.parse().ok()))
    }
}
