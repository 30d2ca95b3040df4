//! The durable history projection: one sqlite file holding `orders`,
//! `ordersInfo`, `addressPortfolio`, and `pairAddressIndex`.
//!
//! sqlite keeps this local and single-writer in the same spirit as the
//! per-pair event logs — there is exactly one writer (`OrderHistoryService`)
//! and no cross-process sharing.

use crate::domain::{AssetId, AssetPair, LimitOrder, Order, OrderId, OrderInfo};
use crate::signing::Address;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePoolOptions::new().max_connections(1).connect(&url).await?;
        let store = HistoryStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = HistoryStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                order_id    TEXT PRIMARY KEY,
                payload     TEXT NOT NULL,
                pair_key    TEXT NOT NULL,
                sender      TEXT NOT NULL,
                timestamp   INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders_info (
                order_id TEXT PRIMARY KEY,
                amount   INTEGER NOT NULL,
                filled   INTEGER NOT NULL,
                canceled INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS address_portfolio (
                address TEXT NOT NULL,
                asset   TEXT NOT NULL,
                reserved INTEGER NOT NULL,
                PRIMARY KEY (address, asset)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pair_address_index (
                pair_key    TEXT NOT NULL,
                address     TEXT NOT NULL,
                order_id    TEXT NOT NULL,
                position    INTEGER NOT NULL,
                PRIMARY KEY (pair_key, address, order_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn insert_order_if_absent(&self, order: &Order) -> Result<(), StoreError> {
        let payload = serde_json::to_string(order).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let pair_key = pair_key(&order.pair);
        sqlx::query(
            "INSERT OR IGNORE INTO orders (order_id, payload, pair_key, sender, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(order.id.to_string())
        .bind(payload)
        .bind(pair_key)
        .bind(order.sender.to_string())
        .bind(order.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query("SELECT payload FROM orders WHERE order_id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => {
                let payload: String = row.try_get("payload")?;
                let order = serde_json::from_str(&payload).map_err(|e| StoreError::Corrupt(e.to_string()))?;
                Ok(Some(order))
            }
        }
    }

    pub async fn load_order_info(&self, id: OrderId) -> Result<Option<OrderInfo>, StoreError> {
        let row = sqlx::query("SELECT amount, filled, canceled FROM orders_info WHERE order_id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Ok(None),
            Some(row) => Ok(Some(OrderInfo {
                amount: row.try_get::<i64, _>("amount")? as u64,
                filled: row.try_get::<i64, _>("filled")? as u64,
                canceled: row.try_get::<i64, _>("canceled")? != 0,
            })),
        }
    }

    /// Combines `delta` into the stored `OrderInfo` for `id`, inserting a
    /// fresh row if absent. The combine law makes this safe to call
    /// more than once with the same delta only if the caller guarantees
    /// at-most-once application per event — recovery relies on that, not on
    /// this call being itself idempotent.
    pub async fn combine_order_info(&self, id: OrderId, delta: OrderInfo) -> Result<(), StoreError> {
        let existing = self.load_order_info(id).await?.unwrap_or(OrderInfo {
            amount: 0,
            filled: 0,
            canceled: false,
        });
        let combined = existing.combine(delta);
        sqlx::query(
            "INSERT INTO orders_info (order_id, amount, filled, canceled) VALUES (?, ?, ?, ?)
             ON CONFLICT(order_id) DO UPDATE SET amount = excluded.amount, filled = excluded.filled, canceled = excluded.canceled",
        )
        .bind(id.to_string())
        .bind(combined.amount as i64)
        .bind(combined.filled as i64)
        .bind(combined.canceled as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn reserved(&self, address: Address, asset: AssetId) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT reserved FROM address_portfolio WHERE address = ? AND asset = ?")
            .bind(address.to_string())
            .bind(asset.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get::<i64, _>("reserved")).transpose()?.unwrap_or(0))
    }

    pub async fn combine_portfolio_delta(
        &self,
        address: Address,
        asset: AssetId,
        delta: i64,
    ) -> Result<(), StoreError> {
        if delta == 0 {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO address_portfolio (address, asset, reserved) VALUES (?, ?, ?)
             ON CONFLICT(address, asset) DO UPDATE SET reserved = reserved + excluded.reserved",
        )
        .bind(address.to_string())
        .bind(asset.to_string())
        .bind(delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Appends `order_id` to `(pair, address)`'s index, applying the bounded
    /// ring-eviction rule: if full, evict the oldest terminal order
    /// first; if none is terminal, evict the oldest regardless.
    pub async fn append_to_index(
        &self,
        pair: &AssetPair,
        address: Address,
        order_id: OrderId,
        max_per_address: u32,
    ) -> Result<(), StoreError> {
        let pair_key = pair_key(pair);
        let address_s = address.to_string();

        let count: i64 = sqlx::query(
            "SELECT COUNT(*) as c FROM pair_address_index WHERE pair_key = ? AND address = ?",
        )
        .bind(&pair_key)
        .bind(&address_s)
        .fetch_one(&self.pool)
        .await?
        .try_get("c")?;

        if count as u32 >= max_per_address {
            self.evict_one(&pair_key, &address_s).await?;
        }

        let next_position: i64 = sqlx::query(
            "SELECT COALESCE(MAX(position), -1) + 1 as p FROM pair_address_index WHERE pair_key = ? AND address = ?",
        )
        .bind(&pair_key)
        .bind(&address_s)
        .fetch_one(&self.pool)
        .await?
        .try_get("p")?;

        sqlx::query(
            "INSERT OR IGNORE INTO pair_address_index (pair_key, address, order_id, position) VALUES (?, ?, ?, ?)",
        )
        .bind(&pair_key)
        .bind(&address_s)
        .bind(order_id.to_string())
        .bind(next_position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Removes a single order from its `(pair, address)` index, used by
    /// `OrderHistoryService::delete_order` ("Delete order from
    /// history") — distinct from the ring-eviction `evict_one`, which picks
    /// its own victim rather than taking one by id.
    pub async fn remove_from_index(
        &self,
        pair: &AssetPair,
        address: Address,
        order_id: OrderId,
    ) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pair_address_index WHERE pair_key = ? AND address = ? AND order_id = ?")
            .bind(pair_key(pair))
            .bind(address.to_string())
            .bind(order_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn evict_one(&self, pair_key: &str, address: &str) -> Result<(), StoreError> {
        let rows = sqlx::query(
            "SELECT i.order_id as order_id, i.position as position,
                    COALESCE(info.canceled, 0) as canceled,
                    COALESCE(info.filled, 0) as filled,
                    COALESCE(info.amount, -1) as amount
             FROM pair_address_index i
             LEFT JOIN orders_info info ON info.order_id = i.order_id
             WHERE i.pair_key = ? AND i.address = ?
             ORDER BY i.position ASC",
        )
        .bind(pair_key)
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        let mut victim: Option<String> = None;
        for row in &rows {
            let canceled: i64 = row.try_get("canceled")?;
            let filled: i64 = row.try_get("filled")?;
            let amount: i64 = row.try_get("amount")?;
            let terminal = canceled != 0 || (amount >= 0 && filled == amount);
            if terminal {
                victim = Some(row.try_get("order_id")?);
                break;
            }
        }
        let victim = match victim {
            Some(v) => v,
            None => match rows.first() {
                Some(row) => row.try_get("order_id")?,
                None => return Ok(()),
            },
        };

        sqlx::query("DELETE FROM pair_address_index WHERE pair_key = ? AND address = ? AND order_id = ?")
            .bind(pair_key)
            .bind(address)
            .bind(victim)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Order ids for `(pair, address)` in insertion order.
    pub async fn index_for(&self, pair: &AssetPair, address: Address) -> Result<Vec<OrderId>, StoreError> {
        let rows = sqlx::query(
            "SELECT order_id FROM pair_address_index WHERE pair_key = ? AND address = ? ORDER BY position ASC",
        )
        .bind(pair_key(pair))
        .bind(address.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| parse_order_id(&row.try_get::<String, _>("order_id")?))
            .collect()
    }

    /// All order ids for `address` across every pair, in insertion order per pair.
    pub async fn all_index_for(&self, address: Address) -> Result<Vec<OrderId>, StoreError> {
        let rows = sqlx::query(
            "SELECT order_id FROM pair_address_index WHERE address = ? ORDER BY pair_key ASC, position ASC",
        )
        .bind(address.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| parse_order_id(&row.try_get::<String, _>("order_id")?))
            .collect()
    }
}

fn pair_key(pair: &AssetPair) -> String {
    format!("{}/{}", pair.amount_asset, pair.price_asset)
}

fn parse_order_id(hex_str: &str) -> Result<OrderId, StoreError> {
    let bytes = hex::decode(hex_str).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(StoreError::Corrupt(format!("expected 32-byte order id, got {}", bytes.len())));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(OrderId(out))
}

/// Convenience helper used by the service layer to derive a projectable
/// `LimitOrder` straight from a stored `Order` plus `OrderInfo` for reads
/// that need remaining-amount (history listings do not need this; recovery
/// synthesis works from the live book, not from the store).
pub fn as_limit_order(order: Order, info: OrderInfo) -> LimitOrder {
    let mut lo = LimitOrder::new(order);
    lo.remaining_amount = lo.order.amount.saturating_sub(info.filled);
    lo
}
