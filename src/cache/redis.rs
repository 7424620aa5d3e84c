//! Redis-backed stock cache.
//!
//! The check-and-reserve step runs as a server-side Lua script, so the
//! duplicate check, the stock check and the decrement execute as one unit
//! regardless of how many service instances share the cache.

use super::{buyers_key, quantity_key, CacheError, StockCache};
use crate::types::{ReservationOutcome, UserId, Voucher, VoucherId};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::sync::Arc;

/// Atomic check-and-reserve, evaluated server-side.
///
/// KEYS[1] = quantity counter, KEYS[2] = buyer set, ARGV[1] = user id.
/// Returns the remaining count after decrement (>= 0), or -1 (out of stock),
/// -2 (duplicate purchase), -3 (counter missing or malformed).
const RESERVE_SCRIPT: &str = r"
if redis.call('SISMEMBER', KEYS[2], ARGV[1]) == 1 then
  return -2
end
local quantity = redis.call('GET', KEYS[1])
if not quantity then
  return -3
end
local remaining = tonumber(quantity)
if remaining == nil then
  return -3
end
if remaining <= 0 then
  return -1
end
redis.call('DECR', KEYS[1])
redis.call('SADD', KEYS[2], ARGV[1])
return remaining - 1
";

/// Compensation increment, guarded so it never recreates an evicted mirror.
///
/// KEYS[1] = quantity counter. Returns the counter after increment, or -1
/// when the key does not exist (voucher deleted since the reservation).
const RELEASE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 0 then
  return -1
end
return redis.call('INCR', KEYS[1])
";

/// Full reservation rollback: counter back (if the mirror still exists) and
/// buyer mark removed.
///
/// KEYS[1] = quantity counter, KEYS[2] = buyer set, ARGV[1] = user id.
const UNRESERVE_SCRIPT: &str = r"
if redis.call('EXISTS', KEYS[1]) == 1 then
  redis.call('INCR', KEYS[1])
end
return redis.call('SREM', KEYS[2], ARGV[1])
";

/// Stock cache backed by a shared Redis instance.
///
/// Cloning is cheap; all clones share one multiplexed connection.
#[derive(Clone)]
pub struct RedisStockCache {
    conn: ConnectionManager,
    reserve_script: Arc<Script>,
    release_script: Arc<Script>,
    unreserve_script: Arc<Script>,
}

impl RedisStockCache {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the client cannot be created or the
    /// connection manager fails to establish a connection.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn))
    }

    /// Wraps an existing connection manager.
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            reserve_script: Arc::new(Script::new(RESERVE_SCRIPT)),
            release_script: Arc::new(Script::new(RELEASE_SCRIPT)),
            unreserve_script: Arc::new(Script::new(UNRESERVE_SCRIPT)),
        }
    }
}

#[async_trait]
impl StockCache for RedisStockCache {
    async fn reserve(
        &self,
        voucher: VoucherId,
        user: UserId,
    ) -> Result<ReservationOutcome, CacheError> {
        let mut conn = self.conn.clone();
        let code: i64 = self
            .reserve_script
            .key(quantity_key(voucher))
            .key(buyers_key(voucher))
            .arg(user.value())
            .invoke_async(&mut conn)
            .await?;
        Ok(ReservationOutcome::from_code(code))
    }

    async fn release(&self, voucher: VoucherId) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let counter: i64 = self
            .release_script
            .key(quantity_key(voucher))
            .invoke_async(&mut conn)
            .await?;
        if counter < 0 {
            tracing::warn!(voucher = %voucher, "mirror evicted since reservation, compensation increment skipped");
        } else {
            tracing::debug!(voucher = %voucher, counter, "returned one unit to the stock cache");
        }
        Ok(())
    }

    async fn unreserve(&self, voucher: VoucherId, user: UserId) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: i64 = self
            .unreserve_script
            .key(quantity_key(voucher))
            .key(buyers_key(voucher))
            .arg(user.value())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn refresh_mirror(&self, voucher: &Voucher) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let key = quantity_key(voucher.id);
        if voucher.deleted {
            let _: () = conn.del(&key).await?;
            tracing::info!(voucher = %voucher.id, "evicted voucher mirror from cache");
        } else {
            let _: () = conn.set(&key, voucher.quantity).await?;
            tracing::info!(
                voucher = %voucher.id,
                quantity = voucher.quantity,
                "refreshed voucher mirror in cache"
            );
        }
        Ok(())
    }

    async fn remaining(&self, voucher: VoucherId) -> Result<Option<i64>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(quantity_key(voucher)).await?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }
}
