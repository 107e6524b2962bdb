//! PostgreSQL record store.
//!
//! Items and orders live in `flash_sale_items` and `flash_sale_orders`
//! (see `migrations/`). `order_no` carries a unique constraint, so a
//! replayed finalize fails instead of creating a second row.
//!
//! # Example
//!
//! ```no_run
//! use flash_sale_engine::stores::PostgresRecordStore;
//! use sqlx::PgPool;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PgPool::connect("postgresql://localhost/flash_sale").await?;
//! let store = PostgresRecordStore::new(pool);
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

use crate::providers::RecordStore;
use chrono::{DateTime, Utc};
use flash_sale_core::types::{
    Identity, Item, ItemId, NewItem, OrderNo, OrderRecord, OrderStatus, SaleWindow,
};
use flash_sale_core::{FlashSaleError, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// `PostgreSQL` record store.
#[derive(Clone)]
pub struct PostgresRecordStore {
    /// `PostgreSQL` connection pool.
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run database migrations.
    ///
    /// # Errors
    ///
    /// Returns error if migrations fail.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| FlashSaleError::RecordStore(format!("Migration failed: {e}")))?;
        Ok(())
    }

    fn row_to_item(row: &PgRow) -> Result<Item> {
        let id: i64 = row.try_get("id").map_err(db_err)?;
        Ok(Item {
            id: ItemId::new(to_u64(id)?),
            name: row.try_get("name").map_err(db_err)?,
            price_cents: row.try_get("price_cents").map_err(db_err)?,
            stock: row.try_get("stock").map_err(db_err)?,
            sale_stock: row.try_get("sale_stock").map_err(db_err)?,
            window: SaleWindow {
                start: row.try_get("sale_start").map_err(db_err)?,
                end: row.try_get("sale_end").map_err(db_err)?,
            },
            created_at: row.try_get("created_at").map_err(db_err)?,
        })
    }

    fn row_to_order(row: &PgRow) -> Result<OrderRecord> {
        let id: i64 = row.try_get("id").map_err(db_err)?;
        let item_id: i64 = row.try_get("item_id").map_err(db_err)?;
        let status: String = row.try_get("status").map_err(db_err)?;
        let order_no: String = row.try_get("order_no").map_err(db_err)?;
        let identity: String = row.try_get("identity").map_err(db_err)?;

        Ok(OrderRecord {
            id: to_u64(id)?,
            order_no: OrderNo::new(order_no),
            identity: Identity::new(identity),
            item_id: ItemId::new(to_u64(item_id)?),
            item_name: row.try_get("item_name").map_err(db_err)?,
            price_cents: row.try_get("price_cents").map_err(db_err)?,
            status: OrderStatus::parse(&status)
                .map_err(|e| FlashSaleError::RecordStore(e.to_string()))?,
            created_at: row.try_get("created_at").map_err(db_err)?,
            updated_at: row.try_get("updated_at").map_err(db_err)?,
        })
    }
}

#[allow(clippy::needless_pass_by_value)]
fn db_err(e: sqlx::Error) -> FlashSaleError {
    FlashSaleError::RecordStore(e.to_string())
}

fn to_u64(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| FlashSaleError::RecordStore(format!("negative id: {value}")))
}

fn to_i64(id: ItemId) -> Result<i64> {
    i64::try_from(id.get()).map_err(|_| FlashSaleError::InvalidInput(format!("item id out of range: {id}")))
}

impl RecordStore for PostgresRecordStore {
    async fn create_order(&self, order: &OrderRecord) -> Result<u64> {
        let row = sqlx::query(
            r"
            INSERT INTO flash_sale_orders
                (order_no, identity, item_id, item_name, price_cents, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            ",
        )
        .bind(order.order_no.as_str())
        .bind(order.identity.as_str())
        .bind(to_i64(order.item_id)?)
        .bind(&order.item_name)
        .bind(order.price_cents)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| FlashSaleError::RecordStore(format!("Failed to create order: {e}")))?;

        let id: i64 = row.try_get("id").map_err(db_err)?;

        tracing::info!(
            order_no = %order.order_no,
            identity = %order.identity,
            item_id = %order.item_id,
            "Order persisted"
        );

        to_u64(id)
    }

    async fn find_order_by_number(&self, order_no: &OrderNo) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(
            r"
            SELECT id, order_no, identity, item_id, item_name, price_cents, status,
                   created_at, updated_at
            FROM flash_sale_orders
            WHERE order_no = $1
            ",
        )
        .bind(order_no.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlashSaleError::RecordStore(format!("Failed to load order: {e}")))?;

        row.as_ref().map(Self::row_to_order).transpose()
    }

    async fn count_orders(
        &self,
        identity: &Identity,
        item: ItemId,
        exclude: OrderStatus,
    ) -> Result<u64> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS order_count
            FROM flash_sale_orders
            WHERE identity = $1 AND item_id = $2 AND status <> $3
            ",
        )
        .bind(identity.as_str())
        .bind(to_i64(item)?)
        .bind(exclude.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| FlashSaleError::RecordStore(format!("Failed to count orders: {e}")))?;

        let count: i64 = row.try_get("order_count").map_err(db_err)?;
        to_u64(count)
    }

    async fn update_order_status(
        &self,
        order_no: &OrderNo,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE flash_sale_orders
            SET status = $1, updated_at = $2
            WHERE order_no = $3
            ",
        )
        .bind(status.as_str())
        .bind(at)
        .bind(order_no.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| FlashSaleError::RecordStore(format!("Failed to update order: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_item(&self, id: ItemId) -> Result<Option<Item>> {
        let row = sqlx::query(
            r"
            SELECT id, name, price_cents, stock, sale_stock, sale_start, sale_end, created_at
            FROM flash_sale_items
            WHERE id = $1
            ",
        )
        .bind(to_i64(id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FlashSaleError::RecordStore(format!("Failed to load item: {e}")))?;

        row.as_ref().map(Self::row_to_item).transpose()
    }

    async fn create_item(&self, item: &NewItem, at: DateTime<Utc>) -> Result<ItemId> {
        let row = sqlx::query(
            r"
            INSERT INTO flash_sale_items
                (name, price_cents, stock, sale_stock, sale_start, sale_end, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(&item.name)
        .bind(item.price_cents)
        .bind(item.stock)
        .bind(item.sale_stock)
        .bind(item.window.start)
        .bind(item.window.end)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| FlashSaleError::RecordStore(format!("Failed to create item: {e}")))?;

        let id: i64 = row.try_get("id").map_err(db_err)?;
        Ok(ItemId::new(to_u64(id)?))
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r"
            SELECT id, name, price_cents, stock, sale_stock, sale_start, sale_end, created_at
            FROM flash_sale_items
            ORDER BY id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FlashSaleError::RecordStore(format!("Failed to list items: {e}")))?;

        rows.iter().map(Self::row_to_item).collect()
    }
}
