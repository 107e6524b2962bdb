//! Durable record store trait.

use chrono::{DateTime, Utc};
use flash_sale_core::Result;
use flash_sale_core::types::{Identity, Item, ItemId, NewItem, OrderNo, OrderRecord, OrderStatus};

/// Transactional store of catalog items and orders.
///
/// Orders are created once and afterwards only change status; they are
/// never deleted. `order_no` is unique.
pub trait RecordStore: Send + Sync {
    /// Insert an order. Returns the assigned row id.
    ///
    /// # Errors
    ///
    /// Returns [`flash_sale_core::FlashSaleError::RecordStore`] if the write
    /// fails, including a duplicate `order_no`.
    fn create_order(
        &self,
        order: &OrderRecord,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// Look up an order by number.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn find_order_by_number(
        &self,
        order_no: &OrderNo,
    ) -> impl std::future::Future<Output = Result<Option<OrderRecord>>> + Send;

    /// Count orders of `identity` for `item` whose status is not `exclude`.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn count_orders(
        &self,
        identity: &Identity,
        item: ItemId,
        exclude: OrderStatus,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;

    /// Set an order's status. Returns `false` if no such order exists.
    ///
    /// Transition rules are enforced by the caller.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn update_order_status(
        &self,
        order_no: &OrderNo,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Look up an item.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn find_item(&self, id: ItemId) -> impl std::future::Future<Output = Result<Option<Item>>> + Send;

    /// Insert an item. Returns the assigned id.
    ///
    /// # Errors
    ///
    /// Returns error if the write fails.
    fn create_item(
        &self,
        item: &NewItem,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<ItemId>> + Send;

    /// All items, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    fn list_items(&self) -> impl std::future::Future<Output = Result<Vec<Item>>> + Send;
}
