//! Flash-sale admission and fulfillment pipeline.
//!
//! Grants a strictly limited number of discount vouchers to a large,
//! concurrently arriving pool of buyers without overselling, confirms
//! payment asynchronously, and pushes live order status to clients across a
//! horizontally scaled deployment.
//!
//! # Architecture
//!
//! ```text
//! client request
//!       │
//!       ▼
//! ┌───────────────┐   atomic check-and-reserve   ┌──────────────┐
//! │ Admission     │─────────────────────────────►│ Stock Cache  │
//! │ Gate          │   (Lua script / one mutex)   │ (Redis)      │
//! └──────┬────────┘                              └──────▲───────┘
//!        │ ReservationMessage                          │ compensation
//!        ▼                                             │ (failed orders)
//! ┌───────────────┐                              ┌─────┴────────┐
//! │ Reservation   │─────────────────────────────►│ Payment      │
//! │ Queue         │   at-least-once delivery     │ Worker       │
//! │ (Redpanda)    │                              └─────┬────────┘
//! └───────────────┘                                    │ settle (one tx)
//!                                                      ▼
//!                   status events               ┌──────────────┐
//!        ┌──────────────────────────────────────│ Durable      │
//!        ▼                                      │ Storage      │
//! ┌───────────────┐   per-instance channel      │ (Postgres)   │
//! │ Status        │   flashsale:status:{id}     └──────────────┘
//! │ Notifier      │
//! └──────┬────────┘
//!        ▼
//!  origin instance's push connections
//! ```
//!
//! # Correctness model
//!
//! - The cache is the unit of truth for admission: one atomic operation
//!   checks the duplicate-purchase set and the stock counter and performs
//!   the decrement, so the counter never goes negative and no user reserves
//!   twice, regardless of concurrency.
//! - Durable storage is the unit of truth for final sales accounting; its
//!   voucher quantity reconciles lazily with the cache mirror.
//! - Every reservation reaches exactly one terminal order status. A failed
//!   settlement returns the reserved unit to the cache exactly once; the
//!   compensation increment commutes with concurrent reservation
//!   decrements.
//! - Voucher metadata writes take a try-only update lock around
//!   "persist row, refresh mirror" so the two cannot diverge mid-write.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admission;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod lock;
pub mod notifier;
pub mod queue;
pub mod service;
pub mod storage;
pub mod types;
pub mod worker;

pub use admission::{Admission, AdmissionGate};
pub use cache::{MemoryStockCache, RedisStockCache, StockCache};
pub use catalog::Catalog;
pub use config::Config;
pub use error::{FlashSaleError, Result};
pub use lock::{MemoryUpdateLock, RedisUpdateLock, UpdateGuard, UpdateLock};
pub use notifier::{
    MemoryStatusNotifier, OrderStatusRouter, RedisStatusNotifier, StatusFeed, StatusNotifier,
};
pub use queue::{
    MemoryQueue, MemorySource, RedpandaQueue, RedpandaSource, ReservationQueue, ReservationSource,
};
pub use service::{FlashSale, Purchase};
pub use storage::{MemoryStorage, PostgresStorage, Storage};
pub use types::*;
pub use worker::PaymentWorker;
