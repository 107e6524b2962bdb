//! Service facade: the operations an HTTP collaborator calls.
//!
//! # Purchase path
//!
//! ```text
//! rate gate → token binding → duplicate guard → item lookup → window
//!           → order number → deplete (atomic) → finalize (locked)
//! ```
//!
//! Every step before depletion is a cheap early rejection. Only depletion
//! decides who gets stock.

use crate::admission::TokenManager;
use crate::finalizer::Finalizer;
use crate::guard::DuplicateGuard;
use crate::inventory::InventoryEngine;
use crate::order_no;
use crate::providers::{FastStore, RecordStore};
use crate::rate_gate::RateGate;
use flash_sale_core::environment::Clock;
use flash_sale_core::types::{
    AdmissionToken, Identity, Item, ItemId, NewItem, OrderNo, OrderRecord, OrderStatus,
    WindowPhase,
};
use flash_sale_core::{FlashSaleConfig, FlashSaleError, Result};
use flash_sale_runtime::metrics::{AdmissionMetrics, PurchaseMetrics};
use std::sync::Arc;
use std::time::Instant;

/// Flash sale service over a fast store `F` and a record store `R`.
///
/// # Example
///
/// ```
/// use flash_sale_core::FlashSaleConfig;
/// use flash_sale_core::environment::SystemClock;
/// use flash_sale_core::types::{Identity, NewItem, SaleWindow};
/// use flash_sale_engine::mocks::{InMemoryFastStore, InMemoryRecordStore};
/// use flash_sale_engine::service::FlashSaleService;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let service = FlashSaleService::new(
///     InMemoryFastStore::new(),
///     InMemoryRecordStore::new(),
///     FlashSaleConfig::default(),
///     Arc::new(SystemClock),
/// )?;
///
/// let now = chrono::Utc::now();
/// let item = service
///     .create_item(&NewItem {
///         name: "Phone".into(),
///         price_cents: 19_900,
///         stock: 10,
///         sale_stock: 1,
///         window: SaleWindow::new(now - chrono::Duration::minutes(1), now + chrono::Duration::hours(1))?,
///     })
///     .await?;
///
/// let alice = Identity::new("alice");
/// let token = service.issue_token(&alice, item.id).await?;
/// let order = service.purchase(&alice, item.id, &token).await?;
/// assert_eq!(order.item_id, item.id);
/// assert_eq!(service.stock(item.id).await?, 0);
/// # Ok::<(), flash_sale_core::FlashSaleError>(())
/// # }).unwrap();
/// ```
pub struct FlashSaleService<F, R> {
    gate: RateGate,
    tokens: TokenManager<F>,
    inventory: Arc<InventoryEngine<F>>,
    guard: Arc<DuplicateGuard<F, R>>,
    finalizer: Finalizer<F, R>,
    records: Arc<R>,
    clock: Arc<dyn Clock>,
}

impl<F: FastStore, R: RecordStore> FlashSaleService<F, R> {
    /// Wire every component over the two stores.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::InvalidInput`] if `config` fails validation.
    pub fn new(fast: F, records: R, config: FlashSaleConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let fast = Arc::new(fast);
        let records = Arc::new(records);
        let inventory = Arc::new(InventoryEngine::new(Arc::clone(&fast), &config));
        let guard = Arc::new(DuplicateGuard::new(
            Arc::clone(&fast),
            Arc::clone(&records),
            &config,
        ));
        let finalizer = Finalizer::new(
            Arc::clone(&fast),
            Arc::clone(&records),
            Arc::clone(&inventory),
            Arc::clone(&guard),
            &config,
        );

        Ok(Self {
            gate: RateGate::new(&config.rate_limit, Arc::clone(&clock)),
            tokens: TokenManager::new(fast, &config, Arc::clone(&clock)),
            inventory,
            guard,
            finalizer,
            records,
            clock,
        })
    }

    /// Issue an admission token for `identity` to buy `item`.
    ///
    /// # Errors
    ///
    /// [`FlashSaleError::RateLimited`], [`FlashSaleError::ItemNotFound`],
    /// [`FlashSaleError::SaleWindowClosed`], [`FlashSaleError::OutOfStock`],
    /// or a store error.
    pub async fn issue_token(&self, identity: &Identity, item: ItemId) -> Result<AdmissionToken> {
        self.gate.check(Some(identity))?;
        let item = self.get_item(item).await?;
        self.tokens.issue(identity, &item).await
    }

    /// Buy one unit of `item` with an admission token.
    ///
    /// # Errors
    ///
    /// Any kind in the error taxonomy except `OrderNotFound` and
    /// `InvalidStatusTransition`; see [`FlashSaleError::retry_guidance`].
    pub async fn purchase(
        &self,
        identity: &Identity,
        item: ItemId,
        token: &AdmissionToken,
    ) -> Result<OrderRecord> {
        let started = Instant::now();
        let result = self.try_purchase(identity, item, token).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.code(),
        };
        PurchaseMetrics::record_outcome(outcome, started.elapsed());

        result
    }

    async fn try_purchase(
        &self,
        identity: &Identity,
        item_id: ItemId,
        token: &AdmissionToken,
    ) -> Result<OrderRecord> {
        self.gate.check(Some(identity))?;

        if !self.tokens.validate_for(token, identity, item_id).await? {
            return Err(Self::invalid_token());
        }

        if let Err(err) = self.guard.check(identity, item_id).await {
            // A concurrent replay may have spent the token after it was
            // validated above; report that rather than the marker it left.
            if err == FlashSaleError::DuplicateOrder && !self.tokens.validate(token).await? {
                return Err(Self::invalid_token());
            }
            return Err(err);
        }

        let item = self.get_item(item_id).await?;

        // A token issued inside the window must not outlive it.
        let now = self.clock.now();
        let phase = item.window.phase(now);
        if phase != WindowPhase::Open {
            return Err(FlashSaleError::SaleWindowClosed { phase });
        }

        let order_no = order_no::generate(now);
        let reservation = self
            .inventory
            .deplete(identity, item_id, token, order_no.clone())
            .await?;

        let order = OrderRecord::pending(order_no, identity.clone(), &item, now);
        self.finalizer.finalize(&reservation, order).await
    }

    fn invalid_token() -> FlashSaleError {
        AdmissionMetrics::record_rejected("invalid_token");
        FlashSaleError::InvalidOrExpiredToken
    }

    /// Persist a catalog entry and preheat its sale stock.
    ///
    /// # Errors
    ///
    /// [`FlashSaleError::InvalidInput`] for a bad payload, or a store error.
    pub async fn create_item(&self, item: &NewItem) -> Result<Item> {
        item.validate()?;
        let now = self.clock.now();
        let id = self.records.create_item(item, now).await?;
        self.tokens.preheat_stock(id, item.sale_stock).await?;

        tracing::info!(
            item_id = %id,
            name = %item.name,
            sale_stock = item.sale_stock,
            start = %item.window.start,
            end = %item.window.end,
            "Item created"
        );

        Ok(Item {
            id,
            name: item.name.clone(),
            price_cents: item.price_cents,
            stock: item.stock,
            sale_stock: item.sale_stock,
            window: item.window,
            created_at: now,
        })
    }

    /// Look up a catalog entry.
    ///
    /// # Errors
    ///
    /// [`FlashSaleError::ItemNotFound`], or a store error.
    pub async fn get_item(&self, id: ItemId) -> Result<Item> {
        self.records
            .find_item(id)
            .await?
            .ok_or(FlashSaleError::ItemNotFound(id))
    }

    /// All catalog entries.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn list_items(&self) -> Result<Vec<Item>> {
        self.records.list_items().await
    }

    /// Remaining sale stock for `item` (0 if never preheated).
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn stock(&self, item: ItemId) -> Result<i64> {
        self.tokens.stock(item).await
    }

    /// Look up an order by number.
    ///
    /// # Errors
    ///
    /// [`FlashSaleError::OrderNotFound`], or a store error.
    pub async fn get_order(&self, order_no: &OrderNo) -> Result<OrderRecord> {
        self.records
            .find_order_by_number(order_no)
            .await?
            .ok_or_else(|| FlashSaleError::OrderNotFound(order_no.clone()))
    }

    /// Move an order to `status`.
    ///
    /// Cancelling clears the duplicate marker so the identity may buy the
    /// item again. Stock is not returned; a cancelled unit stays sold.
    ///
    /// # Errors
    ///
    /// [`FlashSaleError::OrderNotFound`],
    /// [`FlashSaleError::InvalidStatusTransition`], or a store error.
    pub async fn update_order_status(&self, order_no: &OrderNo, status: OrderStatus) -> Result<OrderRecord> {
        let mut order = self.get_order(order_no).await?;
        if !order.status.can_transition_to(status) {
            return Err(FlashSaleError::InvalidStatusTransition {
                from: order.status,
                to: status,
            });
        }

        let now = self.clock.now();
        if !self.records.update_order_status(order_no, status, now).await? {
            return Err(FlashSaleError::OrderNotFound(order_no.clone()));
        }

        tracing::info!(
            order_no = %order_no,
            from = order.status.as_str(),
            to = status.as_str(),
            "Order status changed"
        );

        if status == OrderStatus::Cancelled {
            if let Err(err) = self.guard.clear(&order.identity, order.item_id).await {
                tracing::warn!(
                    order_no = %order_no,
                    error = %err,
                    "Duplicate marker not cleared, it will expire"
                );
            }
        }

        order.status = status;
        order.updated_at = now;
        Ok(order)
    }

    /// Whether `identity` already holds a non-cancelled order for `item`.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn has_existing_order(&self, identity: &Identity, item: ItemId) -> Result<bool> {
        self.guard.has_existing_order(identity, item).await
    }

    /// Drop rate buckets of identities idle past the configured TTL.
    ///
    /// Call periodically; returns the number evicted.
    pub fn evict_idle_buckets(&self) -> usize {
        self.gate.evict_idle()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::mocks::{InMemoryFastStore, InMemoryRecordStore};
    use chrono::Duration;
    use flash_sale_testing::ManualClock;
    use flash_sale_testing::helpers::open_item;

    type Service = FlashSaleService<InMemoryFastStore, InMemoryRecordStore>;

    fn service(clock: &ManualClock) -> Service {
        FlashSaleService::new(
            InMemoryFastStore::new(),
            InMemoryRecordStore::new(),
            FlashSaleConfig::default(),
            Arc::new(clock.clone()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = FlashSaleConfig::default().with_lock(
            flash_sale_core::config::LockConfig::default()
                .with_retries(0, std::time::Duration::from_millis(1)),
        );
        let result = FlashSaleService::new(
            InMemoryFastStore::new(),
            InMemoryRecordStore::new(),
            config,
            Arc::new(ManualClock::starting_at_test_epoch()),
        );
        assert!(matches!(result, Err(FlashSaleError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn unknown_item_is_reported() {
        let clock = ManualClock::starting_at_test_epoch();
        let service = service(&clock);
        assert_eq!(
            service.issue_token(&Identity::new("a"), ItemId::new(42)).await.unwrap_err(),
            FlashSaleError::ItemNotFound(ItemId::new(42))
        );
    }

    #[tokio::test]
    async fn token_cannot_outlive_window() {
        let clock = ManualClock::starting_at_test_epoch();
        let service = service(&clock);
        let item = service.create_item(&open_item("Phone", 3, &clock)).await.unwrap();
        let alice = Identity::new("alice");
        let token = service.issue_token(&alice, item.id).await.unwrap();

        clock.advance(Duration::hours(2));
        assert_eq!(
            service.purchase(&alice, item.id, &token).await.unwrap_err(),
            FlashSaleError::SaleWindowClosed { phase: WindowPhase::Ended }
        );
        assert_eq!(service.stock(item.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn cancelling_allows_buying_again() {
        let clock = ManualClock::starting_at_test_epoch();
        let service = service(&clock);
        let item = service.create_item(&open_item("Phone", 3, &clock)).await.unwrap();
        let alice = Identity::new("alice");

        let token = service.issue_token(&alice, item.id).await.unwrap();
        let order = service.purchase(&alice, item.id, &token).await.unwrap();
        assert!(service.has_existing_order(&alice, item.id).await.unwrap());

        let cancelled = service
            .update_order_status(&order.order_no, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert!(!service.has_existing_order(&alice, item.id).await.unwrap());

        let token = service.issue_token(&alice, item.id).await.unwrap();
        assert!(service.purchase(&alice, item.id, &token).await.is_ok());
        assert_eq!(service.stock(item.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn status_transitions_are_checked() {
        let clock = ManualClock::starting_at_test_epoch();
        let service = service(&clock);
        let item = service.create_item(&open_item("Phone", 1, &clock)).await.unwrap();
        let alice = Identity::new("alice");
        let token = service.issue_token(&alice, item.id).await.unwrap();
        let order = service.purchase(&alice, item.id, &token).await.unwrap();

        let paid = service
            .update_order_status(&order.order_no, OrderStatus::Paid)
            .await
            .unwrap();
        assert_eq!(paid.status, OrderStatus::Paid);
        assert_eq!(
            service
                .update_order_status(&order.order_no, OrderStatus::Pending)
                .await
                .unwrap_err(),
            FlashSaleError::InvalidStatusTransition {
                from: OrderStatus::Paid,
                to: OrderStatus::Pending,
            }
        );
        assert_eq!(
            service.get_order(&order.order_no).await.unwrap().status,
            OrderStatus::Paid
        );
        assert_eq!(
            service
                .get_order(&OrderNo::new("ORD0"))
                .await
                .unwrap_err(),
            FlashSaleError::OrderNotFound(OrderNo::new("ORD0"))
        );
    }

    #[tokio::test]
    async fn created_items_are_listed_and_preheated() {
        let clock = ManualClock::starting_at_test_epoch();
        let service = service(&clock);
        let first = service.create_item(&open_item("Phone", 5, &clock)).await.unwrap();
        service.create_item(&open_item("Tablet", 2, &clock)).await.unwrap();

        assert_eq!(service.list_items().await.unwrap().len(), 2);
        assert_eq!(service.get_item(first.id).await.unwrap(), first);
        assert_eq!(service.stock(first.id).await.unwrap(), 5);
    }
}
