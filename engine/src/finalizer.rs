//! Purchase finalizer: persists a reserved order under its purchase lock.
//!
//! ```text
//! acquire lock ──fail──► LockAcquisitionFailure (stock stays taken, reconcile)
//!      │
//! create_order ──fail──► compensate ──► PersistenceFailure
//!      │
//! refresh marker
//!      │
//! release lock (every path past acquire)
//! ```

use crate::guard::DuplicateGuard;
use crate::inventory::{InventoryEngine, Reservation};
use crate::lock::PurchaseLock;
use crate::providers::{FastStore, RecordStore};
use flash_sale_core::config::LockConfig;
use flash_sale_core::types::OrderRecord;
use flash_sale_core::{FlashSaleConfig, FlashSaleError, Keyspace, Result};
use std::sync::Arc;

/// Turns a [`Reservation`] into a durable [`OrderRecord`].
pub struct Finalizer<F, R> {
    fast: Arc<F>,
    records: Arc<R>,
    inventory: Arc<InventoryEngine<F>>,
    guard: Arc<DuplicateGuard<F, R>>,
    keys: Keyspace,
    lock: LockConfig,
}

impl<F: FastStore, R: RecordStore> Finalizer<F, R> {
    /// Create a finalizer.
    #[must_use]
    pub fn new(
        fast: Arc<F>,
        records: Arc<R>,
        inventory: Arc<InventoryEngine<F>>,
        guard: Arc<DuplicateGuard<F, R>>,
        config: &FlashSaleConfig,
    ) -> Self {
        Self {
            fast,
            records,
            inventory,
            guard,
            keys: config.keys.clone(),
            lock: config.lock,
        }
    }

    /// Persist `order` for `reservation`.
    ///
    /// The admission token was already consumed by depletion, so there is
    /// nothing left to revoke here.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::LockAcquisitionFailure`] if the lock stayed
    ///   busy; stock is not returned
    /// - [`FlashSaleError::PersistenceFailure`] if the insert failed; stock
    ///   has been returned (or the compensation failure logged)
    pub async fn finalize(&self, reservation: &Reservation, mut order: OrderRecord) -> Result<OrderRecord> {
        let lock = PurchaseLock::acquire(
            self.fast.as_ref(),
            &self.keys,
            &reservation.order_no,
            &self.lock,
        )
        .await?;

        let outcome = self.persist(reservation, &mut order).await;

        if let Err(err) = lock.release(self.fast.as_ref()).await {
            tracing::warn!(
                order_no = %reservation.order_no,
                error = %err,
                "Purchase lock release failed, key will expire"
            );
        }

        outcome.map(|()| order)
    }

    async fn persist(&self, reservation: &Reservation, order: &mut OrderRecord) -> Result<()> {
        match self.records.create_order(order).await {
            Ok(id) => {
                order.id = id;
                tracing::info!(
                    order_no = %order.order_no,
                    identity = %order.identity,
                    item_id = %order.item_id,
                    remaining = reservation.remaining,
                    "Order created"
                );

                // Depletion already wrote the marker; this only restarts its TTL.
                if let Err(err) = self
                    .guard
                    .remember(&reservation.identity, reservation.item_id, &reservation.order_no)
                    .await
                {
                    tracing::warn!(
                        order_no = %order.order_no,
                        error = %err,
                        "Duplicate marker refresh failed, record store still guards"
                    );
                }
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    order_no = %reservation.order_no,
                    identity = %reservation.identity,
                    item_id = %reservation.item_id,
                    error = %err,
                    "Order persistence failed after stock was taken, compensating"
                );
                // A failed compensation is logged and counted inside `compensate`.
                let _ = self.inventory.compensate(reservation).await;
                Err(FlashSaleError::PersistenceFailure {
                    order_no: reservation.order_no.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::mocks::{InMemoryFastStore, InMemoryRecordStore};
    use crate::providers::AtomicScript;
    use flash_sale_core::types::{Identity, Item, ItemId, OrderNo, SaleWindow};
    use flash_sale_testing::test_epoch;
    use std::time::Duration;

    struct Fixture {
        finalizer: Finalizer<InMemoryFastStore, InMemoryRecordStore>,
        fast: InMemoryFastStore,
        records: InMemoryRecordStore,
        keys: Keyspace,
    }

    fn fixture() -> Fixture {
        let fast = InMemoryFastStore::new();
        let records = InMemoryRecordStore::new();
        let config = FlashSaleConfig::default()
            .with_lock(LockConfig::default().with_retries(2, Duration::from_millis(1)));
        let fast_arc = Arc::new(fast.clone());
        let records_arc = Arc::new(records.clone());
        let inventory = Arc::new(InventoryEngine::new(Arc::clone(&fast_arc), &config));
        let guard = Arc::new(DuplicateGuard::new(
            Arc::clone(&fast_arc),
            Arc::clone(&records_arc),
            &config,
        ));
        Fixture {
            finalizer: Finalizer::new(fast_arc, records_arc, inventory, guard, &config),
            fast,
            records,
            keys: config.keys,
        }
    }

    fn reservation() -> Reservation {
        Reservation {
            order_no: OrderNo::new("ORD1"),
            identity: Identity::new("alice"),
            item_id: ItemId::new(1),
            remaining: 0,
        }
    }

    fn order() -> OrderRecord {
        let now = test_epoch();
        let item = Item {
            id: ItemId::new(1),
            name: "Phone".into(),
            price_cents: 19_900,
            stock: 1,
            sale_stock: 1,
            window: SaleWindow::new(now, now + chrono::Duration::hours(1)).unwrap(),
            created_at: now,
        };
        OrderRecord::pending(OrderNo::new("ORD1"), Identity::new("alice"), &item, now)
    }

    #[tokio::test]
    async fn persists_and_releases_lock() {
        let f = fixture();
        let order = f.finalizer.finalize(&reservation(), order()).await.unwrap();

        assert_eq!(order.id, 1);
        assert_eq!(f.records.orders().len(), 1);
        assert!(f.fast.keys_with_prefix(&f.keys.lock_prefix).is_empty());
        let marker = f.keys.order_marker_key(&Identity::new("alice"), ItemId::new(1));
        assert_eq!(f.fast.get(&marker).await.unwrap().as_deref(), Some("ORD1"));
    }

    #[tokio::test]
    async fn persistence_failure_compensates() {
        let f = fixture();
        f.fast.set(&f.keys.stock_key(ItemId::new(1)), "0", None).await.unwrap();
        f.records.fail_next_create_order("disk full");

        let err = f.finalizer.finalize(&reservation(), order()).await.unwrap_err();

        assert_eq!(
            err,
            FlashSaleError::PersistenceFailure {
                order_no: OrderNo::new("ORD1"),
                reason: "Record store error: disk full".into(),
            }
        );
        assert_eq!(
            f.fast.get(&f.keys.stock_key(ItemId::new(1))).await.unwrap().as_deref(),
            Some("1")
        );
        assert!(f.records.orders().is_empty());
        assert!(f.fast.keys_with_prefix(&f.keys.lock_prefix).is_empty());
    }

    #[tokio::test]
    async fn busy_lock_is_terminal_without_compensation() {
        let f = fixture();
        f.fast.set(&f.keys.stock_key(ItemId::new(1)), "0", None).await.unwrap();
        f.fast
            .set(&f.keys.lock_key(&OrderNo::new("ORD1")), "someone-else", None)
            .await
            .unwrap();

        let err = f.finalizer.finalize(&reservation(), order()).await.unwrap_err();

        assert_eq!(err, FlashSaleError::LockAcquisitionFailure { order_no: OrderNo::new("ORD1") });
        assert_eq!(
            f.fast.get(&f.keys.stock_key(ItemId::new(1))).await.unwrap().as_deref(),
            Some("0")
        );
        assert!(f.records.orders().is_empty());
    }

    #[tokio::test]
    async fn release_failure_does_not_fail_the_order() {
        let f = fixture();
        f.fast.fail_next_scripts(AtomicScript::CompareAndDelete, 1);

        let order = f.finalizer.finalize(&reservation(), order()).await.unwrap();
        assert_eq!(order.order_no, OrderNo::new("ORD1"));
        assert_eq!(f.records.orders().len(), 1);
    }
}
