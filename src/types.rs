//! Domain types for the flash-sale pipeline.
//!
//! Value objects, entities, and the wire contracts shared by the admission
//! gate, the payment worker, and the status notifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a voucher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VoucherId(u64);

impl VoucherId {
    /// Wraps a raw voucher id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for VoucherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(u64);

impl UserId {
    /// Wraps a raw user id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an order.
///
/// Generated by the admission gate at reservation time so the caller can hand
/// it back to the client immediately for status tracking. Time-based and
/// strictly monotonic within a process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(u64);

/// Last order id handed out by [`OrderId::generate`].
static LAST_ORDER_ID: AtomicU64 = AtomicU64::new(0);

impl OrderId {
    /// Wraps a raw order id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Generates a time-based order id.
    ///
    /// Uses the current wall clock in milliseconds, bumped past the previous
    /// id when two calls land in the same millisecond, so ids are unique and
    /// strictly increasing within a process.
    #[must_use]
    pub fn generate() -> Self {
        let now = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0);
        let mut last = LAST_ORDER_ID.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(last + 1);
            match LAST_ORDER_ID.compare_exchange_weak(
                last,
                candidate,
                Ordering::SeqCst,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(candidate),
                Err(actual) => last = actual,
            }
        }
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a service instance.
///
/// Status events are routed to the instance that accepted the purchase
/// request, because that instance holds the client's live push connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(String);

impl InstanceId {
    /// Wraps an instance identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random instance identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("instance-{}", uuid::Uuid::new_v4()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents.
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from whole currency units with overflow checking.
    #[must_use]
    pub const fn checked_from_units(units: u64) -> Option<Self> {
        match units.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Returns the amount in cents.
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Subtracts `other`, returning `None` on underflow.
    #[must_use]
    pub const fn checked_sub(&self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A discount voucher. The durable row is the source of record; the stock
/// cache holds a denormalized mirror of `quantity` used only for admission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    /// Voucher identifier.
    pub id: VoucherId,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Unit price.
    pub price: Money,
    /// Remaining quantity in durable storage.
    pub quantity: u32,
    /// Soft-deleted flag. Deleted vouchers are evicted from the cache.
    pub deleted: bool,
}

/// A buyer account with prepaid credit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User identifier.
    pub id: UserId,
    /// Login name.
    pub username: String,
    /// Remaining credit.
    pub credit: Money,
}

/// A provisional claim on one unit of stock, created the instant the
/// admission gate succeeds. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Order identifier generated by the admission gate.
    pub order_id: OrderId,
    /// The reserving user.
    pub user_id: UserId,
    /// The reserved voucher.
    pub voucher_id: VoucherId,
    /// Reservation time.
    pub created_at: DateTime<Utc>,
}

/// Terminal-or-pending record of a reservation's settlement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier.
    pub order_id: OrderId,
    /// The buying user.
    pub user_id: UserId,
    /// The bought voucher.
    pub voucher_id: VoucherId,
    /// Settlement state.
    pub status: OrderStatus,
    /// Whether credit was actually deducted.
    pub payment_success: bool,
}

impl Order {
    /// Creates the pending order recorded when the payment worker picks up a
    /// reservation message.
    #[must_use]
    pub const fn pending(order_id: OrderId, user_id: UserId, voucher_id: VoucherId) -> Self {
        Self {
            order_id,
            user_id,
            voucher_id,
            status: OrderStatus::Pending,
            payment_success: false,
        }
    }
}

/// Settlement state of an order. `Confirmed` and `Failed` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Picked up by the payment worker, not yet settled.
    Pending,
    /// Credit deducted and durable stock decremented.
    Confirmed,
    /// Settlement declined or faulted; the reserved unit was returned.
    Failed,
}

impl OrderStatus {
    /// Returns true for `Confirmed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    /// Stable lowercase name, used for the storage row.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

// ============================================================================
// Admission outcome
// ============================================================================

/// Result of the atomic check-and-reserve step.
///
/// Mirrors the integer contract of the cache script: `Reserved` maps to the
/// remaining count after decrement (>= 0), `OutOfStock` to -1,
/// `DuplicatePurchase` to -2 and `CacheInconsistency` to -3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// A unit was reserved; `remaining` is the counter value after decrement.
    Reserved {
        /// Stock left after this reservation.
        remaining: i64,
    },
    /// The stock counter was already at zero.
    OutOfStock,
    /// The user already holds a reservation for this voucher.
    DuplicatePurchase,
    /// The stock counter is missing or malformed. A server fault, never a
    /// user error.
    CacheInconsistency,
}

impl ReservationOutcome {
    /// Decodes the script result code.
    #[must_use]
    pub const fn from_code(code: i64) -> Self {
        match code {
            remaining if remaining >= 0 => Self::Reserved { remaining },
            -1 => Self::OutOfStock,
            -2 => Self::DuplicatePurchase,
            _ => Self::CacheInconsistency,
        }
    }

    /// Encodes the outcome back into the script's integer contract.
    #[must_use]
    pub const fn code(&self) -> i64 {
        match self {
            Self::Reserved { remaining } => *remaining,
            Self::OutOfStock => -1,
            Self::DuplicatePurchase => -2,
            Self::CacheInconsistency => -3,
        }
    }
}

// ============================================================================
// Wire contracts
// ============================================================================

/// Queue payload carrying a successful reservation to the payment worker.
///
/// Text-encoded as `orderId,userId,voucherId,originInstanceId`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservationMessage {
    /// Order identifier generated at admission time.
    pub order_id: OrderId,
    /// The reserving user.
    pub user_id: UserId,
    /// The reserved voucher.
    pub voucher_id: VoucherId,
    /// The instance holding the client's push connection.
    pub origin: InstanceId,
}

impl ReservationMessage {
    /// Encodes the message into its comma-delimited wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        format!(
            "{},{},{},{}",
            self.order_id, self.user_id, self.voucher_id, self.origin
        )
    }

    /// Decodes a comma-delimited payload.
    ///
    /// # Errors
    ///
    /// Returns [`MessageDecodeError`] if the payload does not have exactly
    /// four fields or a numeric field fails to parse.
    pub fn decode(payload: &str) -> Result<Self, MessageDecodeError> {
        let mut fields = payload.split(',');
        let order_id = next_numeric(&mut fields, payload, "orderId")?;
        let user_id = next_numeric(&mut fields, payload, "userId")?;
        let voucher_id = next_numeric(&mut fields, payload, "voucherId")?;
        let origin = fields
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MessageDecodeError::missing(payload, "originInstanceId"))?;
        if fields.next().is_some() {
            return Err(MessageDecodeError::TrailingFields {
                payload: payload.to_string(),
            });
        }
        Ok(Self {
            order_id: OrderId::new(order_id),
            user_id: UserId::new(user_id),
            voucher_id: VoucherId::new(voucher_id),
            origin: InstanceId::new(origin),
        })
    }
}

fn next_numeric<'a>(
    fields: &mut impl Iterator<Item = &'a str>,
    payload: &str,
    field: &'static str,
) -> Result<u64, MessageDecodeError> {
    let raw = fields
        .next()
        .ok_or_else(|| MessageDecodeError::missing(payload, field))?;
    raw.parse()
        .map_err(|_| MessageDecodeError::NotNumeric {
            payload: payload.to_string(),
            field,
        })
}

/// A reservation message payload that could not be decoded.
#[derive(Debug, Error)]
pub enum MessageDecodeError {
    /// A required field is absent.
    #[error("reservation message '{payload}' is missing field {field}")]
    MissingField {
        /// The offending payload.
        payload: String,
        /// Name of the absent field.
        field: &'static str,
    },
    /// A numeric field failed to parse.
    #[error("reservation message '{payload}' has non-numeric field {field}")]
    NotNumeric {
        /// The offending payload.
        payload: String,
        /// Name of the malformed field.
        field: &'static str,
    },
    /// The payload has more than four fields.
    #[error("reservation message '{payload}' has trailing fields")]
    TrailingFields {
        /// The offending payload.
        payload: String,
    },
}

impl MessageDecodeError {
    fn missing(payload: &str, field: &'static str) -> Self {
        Self::MissingField {
            payload: payload.to_string(),
            field,
        }
    }
}

/// Order-status event routed to the origin instance over pub/sub.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Instance the event is addressed to.
    pub origin: InstanceId,
    /// The order the event is about.
    pub order_id: OrderId,
    /// The update itself.
    pub status: StatusUpdate,
}

/// Progress of an order through settlement, as shown to the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusUpdate {
    /// The payment worker picked up the reservation.
    Started,
    /// Credit was deducted and the order confirmed.
    Successful,
    /// Settlement declined or faulted; the reservation was compensated.
    Failed {
        /// Human-readable failure reason.
        reason: String,
    },
}

impl StatusUpdate {
    /// Returns true for `Successful` and `Failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "Payment processing started..."),
            Self::Successful => write!(f, "Payment successful!"),
            Self::Failed { reason } => write!(f, "Payment failed: {reason}."),
        }
    }
}
