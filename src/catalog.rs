//! Voucher catalog writer: the administration-path sequence the update lock
//! protects.
//!
//! Every metadata mutation persists the voucher to durable storage and then
//! re-synchronizes the cache mirror, under the try-only update lock so the
//! cache and the source of record cannot diverge mid-write. The purchase hot
//! path never comes through here.

use crate::cache::StockCache;
use crate::error::{FlashSaleError, Result};
use crate::lock::{UpdateLock, VOUCHER_UPDATE_RESOURCE};
use crate::storage::Storage;
use crate::types::{Voucher, VoucherId};
use std::sync::Arc;
use tracing::info;

/// Writes voucher metadata and keeps the cache mirror in sync.
pub struct Catalog {
    storage: Arc<dyn Storage>,
    cache: Arc<dyn StockCache>,
    lock: Arc<dyn UpdateLock>,
}

impl Catalog {
    /// Builds a catalog writer.
    pub fn new(
        storage: Arc<dyn Storage>,
        cache: Arc<dyn StockCache>,
        lock: Arc<dyn UpdateLock>,
    ) -> Self {
        Self {
            storage,
            cache,
            lock,
        }
    }

    /// Creates or updates a voucher and refreshes its cache mirror.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::LockBusy`] when another writer holds the
    /// update lock; the caller should retry later. Storage and cache
    /// failures propagate; the lock is released on every exit path.
    pub async fn upsert_voucher(&self, voucher: &Voucher) -> Result<()> {
        let Some(guard) = self.lock.try_acquire(VOUCHER_UPDATE_RESOURCE).await? else {
            return Err(FlashSaleError::LockBusy("vouchers".to_string()));
        };

        self.storage.upsert_voucher(voucher).await?;
        self.cache.refresh_mirror(voucher).await?;
        info!(voucher_id = %voucher.id, deleted = voucher.deleted, "voucher written and mirror refreshed");

        guard.release();
        Ok(())
    }

    /// Soft-deletes a voucher and evicts its cache mirror.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::LockBusy`] on contention,
    /// [`FlashSaleError::Storage`] if the voucher does not exist or the
    /// write fails.
    pub async fn delete_voucher(&self, id: VoucherId) -> Result<()> {
        let Some(guard) = self.lock.try_acquire(VOUCHER_UPDATE_RESOURCE).await? else {
            return Err(FlashSaleError::LockBusy("vouchers".to_string()));
        };

        let mut voucher = self.storage.load_voucher(id).await?;
        voucher.deleted = true;
        self.storage.upsert_voucher(&voucher).await?;
        self.cache.refresh_mirror(&voucher).await?;
        info!(voucher_id = %id, "voucher soft-deleted and mirror evicted");

        guard.release();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::cache::MemoryStockCache;
    use crate::lock::MemoryUpdateLock;
    use crate::storage::MemoryStorage;
    use crate::types::Money;

    fn voucher(quantity: u32) -> Voucher {
        Voucher {
            id: VoucherId::new(3),
            name: "spring".to_string(),
            description: "spring sale".to_string(),
            price: Money::from_cents(250),
            quantity,
            deleted: false,
        }
    }

    fn catalog() -> (Catalog, Arc<MemoryStorage>, Arc<MemoryStockCache>, Arc<MemoryUpdateLock>) {
        let storage = Arc::new(MemoryStorage::new());
        let cache = Arc::new(MemoryStockCache::new());
        let lock = Arc::new(MemoryUpdateLock::new());
        let catalog = Catalog::new(
            Arc::clone(&storage) as Arc<dyn Storage>,
            Arc::clone(&cache) as Arc<dyn StockCache>,
            Arc::clone(&lock) as Arc<dyn UpdateLock>,
        );
        (catalog, storage, cache, lock)
    }

    #[tokio::test]
    async fn upsert_writes_storage_then_mirror() {
        let (catalog, storage, cache, _lock) = catalog();
        catalog.upsert_voucher(&voucher(10)).await.unwrap();

        assert_eq!(storage.voucher(VoucherId::new(3)).unwrap().quantity, 10);
        assert_eq!(cache.remaining(VoucherId::new(3)).await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn delete_evicts_the_mirror() {
        let (catalog, storage, cache, _lock) = catalog();
        catalog.upsert_voucher(&voucher(10)).await.unwrap();
        catalog.delete_voucher(VoucherId::new(3)).await.unwrap();

        assert!(storage.voucher(VoucherId::new(3)).unwrap().deleted);
        assert_eq!(cache.remaining(VoucherId::new(3)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn contended_lock_surfaces_busy_without_writing() {
        let (catalog, storage, _cache, lock) = catalog();
        let _held = lock
            .try_acquire(VOUCHER_UPDATE_RESOURCE)
            .await
            .unwrap()
            .unwrap();

        let result = catalog.upsert_voucher(&voucher(10)).await;
        assert!(matches!(result, Err(FlashSaleError::LockBusy(_))));
        assert!(storage.voucher(VoucherId::new(3)).is_none());
    }

    #[tokio::test]
    async fn lock_is_released_after_a_failed_write() {
        let (catalog, _storage, _cache, lock) = catalog();
        // Deleting a voucher that does not exist fails inside the guarded
        // section.
        let result = catalog.delete_voucher(VoucherId::new(3)).await;
        assert!(matches!(result, Err(FlashSaleError::Storage(_))));

        // The guard dropped on the error path, so the lock is free again.
        assert!(lock
            .try_acquire(VOUCHER_UPDATE_RESOURCE)
            .await
            .unwrap()
            .is_some());
    }
}
