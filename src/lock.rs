//! Try-only update lock for the voucher administration path.
//!
//! Protects the sequence "write voucher to durable storage, then refresh its
//! cache mirror" from concurrent double-writes. The lock never blocks: a
//! caller that finds it held is told so immediately and surfaces a retryable
//! busy response. The guard releases on every exit path, including panics
//! and early returns, via `Drop`; a TTL bounds the damage of a crashed
//! holder.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Redis key holding the lock token for a resource.
#[must_use]
pub fn lock_key(resource: &str) -> String {
    format!("flashsale:lock:{resource}")
}

/// Resource name guarding all voucher metadata writes.
pub const VOUCHER_UPDATE_RESOURCE: &str = "voucher-update";

/// Compare-token delete, so a holder whose lock already expired and was
/// re-acquired by someone else cannot release the new holder's lock.
const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
";

/// Update lock failure.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock backend rejected or dropped the operation.
    #[error("update lock backend error: {0}")]
    Backend(String),
}

impl From<redis::RedisError> for LockError {
    fn from(err: redis::RedisError) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Scoped possession of an update lock. Dropping the guard releases the
/// lock; [`UpdateGuard::release`] does the same explicitly.
pub struct UpdateGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl UpdateGuard {
    fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Releases the lock now.
    pub fn release(mut self) {
        self.trigger();
    }

    fn trigger(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        self.trigger();
    }
}

/// Non-blocking mutual exclusion over named resources.
#[async_trait]
pub trait UpdateLock: Send + Sync {
    /// Attempts to take the lock for `resource`. Returns `None` immediately
    /// when another writer holds it; never waits.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] only for backend failures, never for contention.
    async fn try_acquire(&self, resource: &str) -> Result<Option<UpdateGuard>, LockError>;
}

/// Distributed update lock backed by Redis `SET NX PX`.
#[derive(Clone)]
pub struct RedisUpdateLock {
    conn: ConnectionManager,
    ttl: Duration,
}

impl RedisUpdateLock {
    /// Wraps an existing connection manager.
    #[must_use]
    pub const fn new(conn: ConnectionManager, ttl: Duration) -> Self {
        Self { conn, ttl }
    }
}

#[async_trait]
impl UpdateLock for RedisUpdateLock {
    async fn try_acquire(&self, resource: &str) -> Result<Option<UpdateGuard>, LockError> {
        let key = lock_key(resource);
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX))
            .query_async(&mut conn)
            .await?;
        if acquired.is_none() {
            return Ok(None);
        }

        let release_conn = self.conn.clone();
        Ok(Some(UpdateGuard::new(move || {
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                // No runtime to release on; the TTL reclaims the lock.
                tracing::warn!(key = %key, "update lock released by TTL only");
                return;
            };
            handle.spawn(async move {
                let mut conn = release_conn;
                let released: Result<i64, redis::RedisError> = Script::new(RELEASE_SCRIPT)
                    .key(&key)
                    .arg(&token)
                    .invoke_async(&mut conn)
                    .await;
                match released {
                    Ok(1) => tracing::debug!(key = %key, "update lock released"),
                    Ok(_) => tracing::warn!(key = %key, "update lock already expired"),
                    Err(err) => tracing::error!(key = %key, error = %err, "update lock release failed"),
                }
            });
        })))
    }
}

/// In-process update lock for tests and single-node deployments.
#[derive(Clone, Default)]
pub struct MemoryUpdateLock {
    held: Arc<Mutex<HashSet<String>>>,
}

impl MemoryUpdateLock {
    /// Creates a lock with no holders.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UpdateLock for MemoryUpdateLock {
    async fn try_acquire(&self, resource: &str) -> Result<Option<UpdateGuard>, LockError> {
        let resource = resource.to_string();
        {
            let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
            if !held.insert(resource.clone()) {
                return Ok(None);
            }
        }
        let held = Arc::clone(&self.held);
        Ok(Some(UpdateGuard::new(move || {
            held.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&resource);
        })))
    }
}
