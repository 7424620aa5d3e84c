//! Durable storage for users, vouchers and orders.
//!
//! The durable rows are the source of record for final sales accounting; the
//! stock cache is trusted for admission decisions and reconciles lazily. The
//! settlement write path is a single transaction so multiple worker
//! instances stay correct without any process-local locking.

mod memory;
mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;

use crate::types::{Money, Order, OrderId, OrderStatus, User, UserId, Voucher, VoucherId};
use async_trait::async_trait;
use thiserror::Error;

/// Durable storage failure.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A referenced row does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Row kind ("user", "voucher", "order").
        kind: &'static str,
        /// The missing identifier.
        id: u64,
    },

    /// A conditional settlement update matched no row (credit exhausted,
    /// durable stock exhausted, or the order vanished).
    #[error("settlement conflict: {0}")]
    Conflict(String),

    /// The database rejected or dropped the operation.
    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Load/save operations the core pipeline needs from durable storage.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Loads a user row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the user does not exist.
    async fn load_user(&self, id: UserId) -> Result<User, StorageError>;

    /// Loads a voucher row, deleted or not.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotFound`] if the voucher does not exist.
    async fn load_voucher(&self, id: VoucherId) -> Result<Voucher, StorageError>;

    /// Inserts or replaces a voucher row. Administration path only, always
    /// called under the update lock.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    async fn upsert_voucher(&self, voucher: &Voucher) -> Result<(), StorageError>;

    /// Current status of an order, if the row exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on database failure.
    async fn order_status(&self, id: OrderId) -> Result<Option<OrderStatus>, StorageError>;

    /// Records the pending order created when a reservation message is picked
    /// up. Idempotent: an existing row is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    async fn record_pending(&self, order: &Order) -> Result<(), StorageError>;

    /// Marks an order failed. `payment_success` stays false.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the write fails.
    async fn finalize_failed(&self, id: OrderId) -> Result<(), StorageError>;

    /// Confirms an order in one transaction: deducts `price` from the user's
    /// credit, decrements the durable voucher quantity, and marks the order
    /// confirmed with `payment_success = true`. Every update is conditional
    /// so concurrent workers cannot drive credit or stock negative.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] if any conditional update matches
    /// no row; the transaction is rolled back as a whole.
    async fn settle(
        &self,
        id: OrderId,
        user: UserId,
        voucher: VoucherId,
        price: Money,
    ) -> Result<(), StorageError>;

    /// All orders referencing a voucher. Used by reconciliation and the
    /// conservation checks in tests.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on database failure.
    async fn orders_for_voucher(&self, voucher: VoucherId) -> Result<Vec<Order>, StorageError>;
}
