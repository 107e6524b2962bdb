//! In-memory record store for testing.

use crate::providers::RecordStore;
use chrono::{DateTime, Utc};
use flash_sale_core::types::{Identity, Item, ItemId, NewItem, OrderNo, OrderRecord, OrderStatus};
use flash_sale_core::{FlashSaleError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    items: BTreeMap<ItemId, Item>,
    orders: Vec<OrderRecord>,
    next_item_id: u64,
    fail_create_order: Option<String>,
    fail_reads: bool,
}

/// In-memory record store.
///
/// Enforces the unique `order_no` constraint like the real schema.
/// [`fail_next_create_order`](Self::fail_next_create_order) makes the next
/// order insert fail, which is how tests drive the compensation path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryRecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| FlashSaleError::RecordStore("Mutex lock failed".into()))
    }

    /// Make the next `create_order` call fail with `reason`.
    pub fn fail_next_create_order(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.lock() {
            state.fail_create_order = Some(reason.into());
        }
    }

    /// Make every read fail until called again with `false`.
    pub fn set_reads_failing(&self, failing: bool) {
        if let Ok(mut state) = self.lock() {
            state.fail_reads = failing;
        }
    }

    /// Snapshot of all orders (for testing).
    #[must_use]
    pub fn orders(&self) -> Vec<OrderRecord> {
        self.lock().map(|s| s.orders.clone()).unwrap_or_default()
    }

    fn check_reads(state: &State) -> Result<()> {
        if state.fail_reads {
            return Err(FlashSaleError::RecordStore("injected read failure".into()));
        }
        Ok(())
    }
}

impl RecordStore for InMemoryRecordStore {
    async fn create_order(&self, order: &OrderRecord) -> Result<u64> {
        let mut state = self.lock()?;

        if let Some(reason) = state.fail_create_order.take() {
            return Err(FlashSaleError::RecordStore(reason));
        }

        if state.orders.iter().any(|o| o.order_no == order.order_no) {
            return Err(FlashSaleError::RecordStore(format!(
                "duplicate order_no {}",
                order.order_no
            )));
        }

        let mut stored = order.clone();
        stored.id = state.orders.len() as u64 + 1;
        let id = stored.id;
        state.orders.push(stored);
        Ok(id)
    }

    async fn find_order_by_number(&self, order_no: &OrderNo) -> Result<Option<OrderRecord>> {
        let state = self.lock()?;
        Self::check_reads(&state)?;
        Ok(state.orders.iter().find(|o| &o.order_no == order_no).cloned())
    }

    async fn count_orders(
        &self,
        identity: &Identity,
        item: ItemId,
        exclude: OrderStatus,
    ) -> Result<u64> {
        let state = self.lock()?;
        Self::check_reads(&state)?;
        let count = state
            .orders
            .iter()
            .filter(|o| &o.identity == identity && o.item_id == item && o.status != exclude)
            .count();
        Ok(count as u64)
    }

    async fn update_order_status(
        &self,
        order_no: &OrderNo,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        let Some(order) = state.orders.iter_mut().find(|o| &o.order_no == order_no) else {
            return Ok(false);
        };
        order.status = status;
        order.updated_at = at;
        Ok(true)
    }

    async fn find_item(&self, id: ItemId) -> Result<Option<Item>> {
        let state = self.lock()?;
        Self::check_reads(&state)?;
        Ok(state.items.get(&id).cloned())
    }

    async fn create_item(&self, item: &NewItem, at: DateTime<Utc>) -> Result<ItemId> {
        let mut state = self.lock()?;
        state.next_item_id += 1;
        let id = ItemId::new(state.next_item_id);
        state.items.insert(
            id,
            Item {
                id,
                name: item.name.clone(),
                price_cents: item.price_cents,
                stock: item.stock,
                sale_stock: item.sale_stock,
                window: item.window,
                created_at: at,
            },
        );
        Ok(id)
    }

    async fn list_items(&self) -> Result<Vec<Item>> {
        let state = self.lock()?;
        Self::check_reads(&state)?;
        Ok(state.items.values().cloned().collect())
    }
}
