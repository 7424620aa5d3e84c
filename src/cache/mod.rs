//! Stock cache: per-voucher remaining quantity and the set of users who
//! already reserved it.
//!
//! The cache is the unit of truth for admission decisions. Two keys exist per
//! voucher:
//!
//! - `flashsale:voucher:{id}:quantity`: string counter, the denormalized
//!   mirror of the durable quantity
//! - `flashsale:voucher:{id}:buyers`: set of user ids holding a reservation
//!
//! [`StockCache::reserve`] is the single correctness-critical primitive of
//! the whole pipeline: check duplicate, check stock, decrement and record the
//! buyer, with no interleaving possible from any other concurrent caller.
//! [`RedisStockCache`] gets that atomicity from a server-side Lua script;
//! [`MemoryStockCache`] from a process-local mutex guarding both maps, which
//! is equivalent when the cache is co-located with a single process.

mod memory;
mod redis;

pub use memory::MemoryStockCache;
pub use redis::RedisStockCache;

use crate::types::{ReservationOutcome, UserId, Voucher, VoucherId};
use async_trait::async_trait;
use thiserror::Error;

/// Key of the string counter mirroring a voucher's remaining quantity.
#[must_use]
pub fn quantity_key(voucher: VoucherId) -> String {
    format!("flashsale:voucher:{voucher}:quantity")
}

/// Key of the set of users holding a reservation for a voucher.
#[must_use]
pub fn buyers_key(voucher: VoucherId) -> String {
    format!("flashsale:voucher:{voucher}:buyers")
}

/// Stock cache transport failure. Outcome-level conditions (out of stock,
/// duplicate, inconsistent mirror) are *not* errors; they travel in
/// [`ReservationOutcome`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache backend rejected or dropped the operation.
    #[error("stock cache backend error: {0}")]
    Backend(String),
}

impl From<::redis::RedisError> for CacheError {
    fn from(err: ::redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Atomic admission operations over the per-voucher stock keys.
#[async_trait]
pub trait StockCache: Send + Sync {
    /// Atomically checks and reserves one unit for `user`.
    ///
    /// Executes, with no interleaving from other callers:
    /// 1. buyer set contains `user` → [`ReservationOutcome::DuplicatePurchase`]
    /// 2. counter missing/malformed → [`ReservationOutcome::CacheInconsistency`]
    /// 3. counter <= 0 → [`ReservationOutcome::OutOfStock`]
    /// 4. else decrement, add `user`, return [`ReservationOutcome::Reserved`]
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] only for transport failures; every admission
    /// decision is an outcome, never an error.
    async fn reserve(
        &self,
        voucher: VoucherId,
        user: UserId,
    ) -> Result<ReservationOutcome, CacheError>;

    /// Returns one reserved unit to the pool after a failed settlement.
    ///
    /// The compensation increment commutes with the reservation decrement:
    /// only counter arithmetic is involved, the buyer set is left untouched
    /// so the failed buyer cannot re-enter. A mirror evicted since the
    /// reservation stays evicted; the increment is silently skipped rather
    /// than reopening admission to a deleted voucher.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the increment cannot be applied.
    async fn release(&self, voucher: VoucherId) -> Result<(), CacheError>;

    /// Rolls a reservation back entirely: returns the unit *and* removes the
    /// buyer mark. Used when the reservation message could not be enqueued,
    /// so the buyer keeps the right to retry. Like [`StockCache::release`],
    /// an evicted mirror is not recreated.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the rollback cannot be applied.
    async fn unreserve(&self, voucher: VoucherId, user: UserId) -> Result<(), CacheError>;

    /// Re-synchronizes the quantity mirror from the durable voucher row.
    /// Deleted vouchers are evicted instead.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the mirror cannot be written.
    async fn refresh_mirror(&self, voucher: &Voucher) -> Result<(), CacheError>;

    /// Current counter value, if the mirror exists and parses.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] on transport failure.
    async fn remaining(&self, voucher: VoucherId) -> Result<Option<i64>, CacheError>;
}
