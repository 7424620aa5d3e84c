//! `PostgreSQL` storage implementation.
//!
//! Expected schema (managed outside this crate):
//!
//! ```sql
//! users    (id BIGINT PRIMARY KEY, username TEXT, credit_cents BIGINT)
//! vouchers (id BIGINT PRIMARY KEY, name TEXT, description TEXT,
//!           price_cents BIGINT, quantity INT, deleted BOOLEAN)
//! orders   (order_id BIGINT PRIMARY KEY, user_id BIGINT, voucher_id BIGINT,
//!           status TEXT, payment_success BOOLEAN)
//! ```

use super::{Storage, StorageError};
use crate::types::{Money, Order, OrderId, OrderStatus, User, UserId, Voucher, VoucherId};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

/// Storage backed by a `PostgreSQL` pool.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Connects to the database.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the pool cannot be created.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(connect_timeout)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn cents(value: i64) -> Money {
    Money::from_cents(u64::try_from(value).unwrap_or(0))
}

fn bind_cents(money: Money) -> i64 {
    i64::try_from(money.cents()).unwrap_or(i64::MAX)
}

fn bind_id(id: u64) -> i64 {
    i64::try_from(id).unwrap_or(i64::MAX)
}

fn read_id(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn load_user(&self, id: UserId) -> Result<User, StorageError> {
        let row = sqlx::query("SELECT id, username, credit_cents FROM users WHERE id = $1")
            .bind(bind_id(id.value()))
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StorageError::NotFound {
                kind: "user",
                id: id.value(),
            })?;
        Ok(User {
            id: UserId::new(read_id(row.try_get("id")?)),
            username: row.try_get("username")?,
            credit: cents(row.try_get("credit_cents")?),
        })
    }

    async fn load_voucher(&self, id: VoucherId) -> Result<Voucher, StorageError> {
        let row = sqlx::query(
            "SELECT id, name, description, price_cents, quantity, deleted \
             FROM vouchers WHERE id = $1",
        )
        .bind(bind_id(id.value()))
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StorageError::NotFound {
            kind: "voucher",
            id: id.value(),
        })?;
        let quantity: i32 = row.try_get("quantity")?;
        Ok(Voucher {
            id: VoucherId::new(read_id(row.try_get("id")?)),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            price: cents(row.try_get("price_cents")?),
            quantity: u32::try_from(quantity).unwrap_or(0),
            deleted: row.try_get("deleted")?,
        })
    }

    async fn upsert_voucher(&self, voucher: &Voucher) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO vouchers (id, name, description, price_cents, quantity, deleted) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (id) DO UPDATE SET \
               name = EXCLUDED.name, description = EXCLUDED.description, \
               price_cents = EXCLUDED.price_cents, quantity = EXCLUDED.quantity, \
               deleted = EXCLUDED.deleted",
        )
        .bind(bind_id(voucher.id.value()))
        .bind(&voucher.name)
        .bind(&voucher.description)
        .bind(bind_cents(voucher.price))
        .bind(i32::try_from(voucher.quantity).unwrap_or(i32::MAX))
        .bind(voucher.deleted)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn order_status(&self, id: OrderId) -> Result<Option<OrderStatus>, StorageError> {
        let row = sqlx::query("SELECT status FROM orders WHERE order_id = $1")
            .bind(bind_id(id.value()))
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let status: String = row.try_get("status")?;
                status
                    .parse()
                    .map(Some)
                    .map_err(StorageError::Database)
            }
        }
    }

    async fn record_pending(&self, order: &Order) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO orders (order_id, user_id, voucher_id, status, payment_success) \
             VALUES ($1, $2, $3, $4, false) \
             ON CONFLICT (order_id) DO NOTHING",
        )
        .bind(bind_id(order.order_id.value()))
        .bind(bind_id(order.user_id.value()))
        .bind(bind_id(order.voucher_id.value()))
        .bind(OrderStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finalize_failed(&self, id: OrderId) -> Result<(), StorageError> {
        sqlx::query("UPDATE orders SET status = $1 WHERE order_id = $2")
            .bind(OrderStatus::Failed.as_str())
            .bind(bind_id(id.value()))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn settle(
        &self,
        id: OrderId,
        user: UserId,
        voucher: VoucherId,
        price: Money,
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        let debited = sqlx::query(
            "UPDATE users SET credit_cents = credit_cents - $1 \
             WHERE id = $2 AND credit_cents >= $1",
        )
        .bind(bind_cents(price))
        .bind(bind_id(user.value()))
        .execute(&mut *tx)
        .await?;
        if debited.rows_affected() != 1 {
            return Err(StorageError::Conflict(format!(
                "user {user} has insufficient credit"
            )));
        }

        // Store-level conditional decrement: safe under any number of worker
        // instances, unlike a process-local lock.
        let decremented = sqlx::query(
            "UPDATE vouchers SET quantity = quantity - 1 WHERE id = $1 AND quantity > 0",
        )
        .bind(bind_id(voucher.value()))
        .execute(&mut *tx)
        .await?;
        if decremented.rows_affected() != 1 {
            return Err(StorageError::Conflict(format!(
                "voucher {voucher} has no durable stock left"
            )));
        }

        let confirmed = sqlx::query(
            "UPDATE orders SET status = $1, payment_success = true \
             WHERE order_id = $2 AND status = $3",
        )
        .bind(OrderStatus::Confirmed.as_str())
        .bind(bind_id(id.value()))
        .bind(OrderStatus::Pending.as_str())
        .execute(&mut *tx)
        .await?;
        if confirmed.rows_affected() != 1 {
            return Err(StorageError::Conflict(format!(
                "order {id} is missing or no longer pending"
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn orders_for_voucher(&self, voucher: VoucherId) -> Result<Vec<Order>, StorageError> {
        let rows = sqlx::query(
            "SELECT order_id, user_id, voucher_id, status, payment_success \
             FROM orders WHERE voucher_id = $1",
        )
        .bind(bind_id(voucher.value()))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                let status: String = row.try_get("status")?;
                Ok(Order {
                    order_id: OrderId::new(read_id(row.try_get("order_id")?)),
                    user_id: UserId::new(read_id(row.try_get("user_id")?)),
                    voucher_id: VoucherId::new(read_id(row.try_get("voucher_id")?)),
                    status: status.parse().map_err(StorageError::Database)?,
                    payment_success: row.try_get("payment_success")?,
                })
            })
            .collect()
    }
}
