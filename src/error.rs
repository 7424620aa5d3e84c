//! Error taxonomy for the flash-sale pipeline.
//!
//! Admission-time errors (`OutOfStock`, `DuplicatePurchase`) are returned
//! synchronously to the caller as definitive, non-retryable outcomes.
//! `SettlementFault` is only ever discovered in the payment worker, after
//! the synchronous response has confirmed a reservation; like insufficient
//! credit, it is resolved by compensation and surfaced through the status
//! channel rather than a return value. `LockBusy` belongs to the
//! administration path and is retryable by the caller.

use crate::cache::CacheError;
use crate::lock::LockError;
use crate::queue::QueueError;
use crate::storage::StorageError;
use thiserror::Error;

/// Top-level error type of the pipeline.
#[derive(Debug, Error)]
pub enum FlashSaleError {
    /// The stock counter was already at zero. Definitive, not retryable.
    #[error("voucher out of stock")]
    OutOfStock,

    /// The user already holds a reservation for this voucher. Definitive.
    #[error("user already purchased this voucher")]
    DuplicatePurchase,

    /// The cache mirror is missing or corrupt. A server fault, not a user
    /// error; the administration path must re-synchronize the mirror.
    #[error("stock cache inconsistency: {0}")]
    CacheInconsistency(String),

    /// Another writer holds the voucher update lock. Retryable by the caller.
    #[error("another process is updating {0}, try again later")]
    LockBusy(String),

    /// Unexpected fault while settling a reservation. Worker-side only.
    #[error("settlement fault: {0}")]
    SettlementFault(String),

    /// Stock cache transport failure.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Reservation queue failure.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Update lock backend failure.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Durable storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = FlashSaleError> = std::result::Result<T, E>;
