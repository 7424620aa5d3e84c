//! In-process storage for tests and single-node deployments.

use super::{Storage, StorageError};
use crate::types::{Money, Order, OrderId, OrderStatus, User, UserId, Voucher, VoucherId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<UserId, User>,
    vouchers: HashMap<VoucherId, Voucher>,
    orders: HashMap<OrderId, Order>,
}

/// Mutex-guarded storage with the same conditional-update semantics as the
/// `PostgreSQL` implementation.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a user row.
    pub fn insert_user(&self, user: User) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.users.insert(user.id, user);
    }

    /// Seeds a voucher row.
    pub fn insert_voucher(&self, voucher: Voucher) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.vouchers.insert(voucher.id, voucher);
    }

    /// Current user row, if any. Test inspection.
    #[must_use]
    pub fn user(&self, id: UserId) -> Option<User> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.users.get(&id).cloned()
    }

    /// Current voucher row, if any. Test inspection.
    #[must_use]
    pub fn voucher(&self, id: VoucherId) -> Option<Voucher> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.vouchers.get(&id).cloned()
    }

    /// Current order row, if any. Test inspection.
    #[must_use]
    pub fn order(&self, id: OrderId) -> Option<Order> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.orders.get(&id).cloned()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn load_user(&self, id: UserId) -> Result<User, StorageError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .users
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound {
                kind: "user",
                id: id.value(),
            })
    }

    async fn load_voucher(&self, id: VoucherId) -> Result<Voucher, StorageError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .vouchers
            .get(&id)
            .cloned()
            .ok_or(StorageError::NotFound {
                kind: "voucher",
                id: id.value(),
            })
    }

    async fn upsert_voucher(&self, voucher: &Voucher) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.vouchers.insert(voucher.id, voucher.clone());
        Ok(())
    }

    async fn order_status(&self, id: OrderId) -> Result<Option<OrderStatus>, StorageError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.orders.get(&id).map(|order| order.status))
    }

    async fn record_pending(&self, order: &Order) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.orders.entry(order.order_id).or_insert_with(|| order.clone());
        Ok(())
    }

    async fn finalize_failed(&self, id: OrderId) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(order) = inner.orders.get_mut(&id) {
            order.status = OrderStatus::Failed;
            order.payment_success = false;
        }
        Ok(())
    }

    async fn settle(
        &self,
        id: OrderId,
        user: UserId,
        voucher: VoucherId,
        price: Money,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);

        let remaining_credit = inner
            .users
            .get(&user)
            .and_then(|u| u.credit.checked_sub(price))
            .ok_or_else(|| {
                StorageError::Conflict(format!("user {user} has insufficient credit"))
            })?;
        let remaining_stock = inner
            .vouchers
            .get(&voucher)
            .filter(|v| v.quantity > 0)
            .map(|v| v.quantity - 1)
            .ok_or_else(|| {
                StorageError::Conflict(format!("voucher {voucher} has no durable stock left"))
            })?;
        if inner
            .orders
            .get(&id)
            .is_none_or(|order| order.status != OrderStatus::Pending)
        {
            return Err(StorageError::Conflict(format!(
                "order {id} is missing or no longer pending"
            )));
        }

        // All conditions hold; apply the whole transaction.
        if let Some(u) = inner.users.get_mut(&user) {
            u.credit = remaining_credit;
        }
        if let Some(v) = inner.vouchers.get_mut(&voucher) {
            v.quantity = remaining_stock;
        }
        if let Some(order) = inner.orders.get_mut(&id) {
            order.status = OrderStatus::Confirmed;
            order.payment_success = true;
        }
        Ok(())
    }

    async fn orders_for_voucher(&self, voucher: VoucherId) -> Result<Vec<Order>, StorageError> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .orders
            .values()
            .filter(|order| order.voucher_id == voucher)
            .cloned()
            .collect())
    }
}
