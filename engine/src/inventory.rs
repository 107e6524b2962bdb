//! Inventory Depletion Engine.
//!
//! The stock counter is only ever changed by [`AtomicScript::Deplete`] and
//! [`AtomicScript::Restock`]. Application code never reads the counter and
//! writes it back, so for `N` concurrent purchases against stock `S` at
//! most `S` reservations succeed.
//!
//! One depletion step does all of the following or none of it:
//!
//! ```text
//! token bound to (identity, item)?      no  → InvalidOrExpiredToken
//! duplicate marker absent?              no  → DuplicateOrder
//! stock > 0?                            no  → OutOfStock (token kept)
//! DECR stock, DEL token, SET marker     → Reservation
//! ```

use crate::providers::{
    AtomicScript, DEPLETE_DUPLICATE, DEPLETE_INVALID_TOKEN, DEPLETE_OUT_OF_STOCK,
    DEPLETE_RESERVED, FastStore,
};
use flash_sale_core::keys::token_binding;
use flash_sale_core::types::{AdmissionToken, Identity, ItemId, OrderNo};
use flash_sale_core::{FlashSaleConfig, FlashSaleError, Keyspace, Result};
use flash_sale_runtime::metrics::PurchaseMetrics;
use flash_sale_runtime::{RetryPolicy, retry_with_predicate};
use std::sync::Arc;
use std::time::Duration;

/// One unit of stock taken for an order that is not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    /// Order the unit is held for.
    pub order_no: OrderNo,
    /// Buyer.
    pub identity: Identity,
    /// Item the unit came from.
    pub item_id: ItemId,
    /// Stock left right after this reservation.
    pub remaining: i64,
}

/// Atomic check-and-decrement against the inventory counters.
pub struct InventoryEngine<F> {
    store: Arc<F>,
    keys: Keyspace,
    marker_ttl: Duration,
    compensation_retry: RetryPolicy,
}

impl<F: FastStore> InventoryEngine<F> {
    /// Create an engine. Compensation retries transient store failures
    /// three times with exponential delay.
    #[must_use]
    pub fn new(store: Arc<F>, config: &FlashSaleConfig) -> Self {
        Self {
            store,
            keys: config.keys.clone(),
            marker_ttl: config.marker_ttl,
            compensation_retry: RetryPolicy::exponential(
                3,
                Duration::from_millis(20),
                Duration::from_millis(200),
            ),
        }
    }

    /// Replace the retry policy used by [`compensate`](Self::compensate).
    #[must_use]
    pub const fn with_compensation_retry(mut self, policy: RetryPolicy) -> Self {
        self.compensation_retry = policy;
        self
    }

    /// Consume `token` and take one unit of `item` for `order_no`.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::InvalidOrExpiredToken`] if the token is gone or
    ///   bound to another identity or item
    /// - [`FlashSaleError::DuplicateOrder`] if the identity already holds a
    ///   marker for the item
    /// - [`FlashSaleError::OutOfStock`] if the counter is at zero; the
    ///   token stays valid
    /// - [`FlashSaleError::FastStore`] if the script cannot run
    pub async fn deplete(
        &self,
        identity: &Identity,
        item: ItemId,
        token: &AdmissionToken,
        order_no: OrderNo,
    ) -> Result<Reservation> {
        let keys = [
            self.keys.stock_key(item),
            self.keys.token_key(token),
            self.keys.order_marker_key(identity, item),
        ];
        let args = [
            order_no.to_string(),
            self.marker_ttl.as_secs().max(1).to_string(),
            token_binding(identity, item),
        ];

        let reply = self
            .store
            .execute_script(AtomicScript::Deplete, &keys, &args)
            .await?;

        match reply.code {
            DEPLETE_RESERVED => {
                let remaining: i64 = reply.value.parse().map_err(|_| {
                    FlashSaleError::FastStore(format!(
                        "deplete reply for {order_no} carries {:?} as remaining stock",
                        reply.value
                    ))
                })?;
                tracing::debug!(
                    identity = %identity,
                    item_id = %item,
                    order_no = %order_no,
                    remaining,
                    "Stock reserved"
                );
                Ok(Reservation {
                    order_no,
                    identity: identity.clone(),
                    item_id: item,
                    remaining,
                })
            }
            DEPLETE_OUT_OF_STOCK => {
                tracing::debug!(identity = %identity, item_id = %item, "Depletion refused, out of stock");
                Err(FlashSaleError::OutOfStock)
            }
            DEPLETE_INVALID_TOKEN => {
                tracing::debug!(identity = %identity, item_id = %item, "Depletion refused, token not valid for this purchase");
                Err(FlashSaleError::InvalidOrExpiredToken)
            }
            DEPLETE_DUPLICATE => {
                tracing::warn!(
                    identity = %identity,
                    item_id = %item,
                    existing_order = %reply.value,
                    "Duplicate purchase attempt"
                );
                Err(FlashSaleError::DuplicateOrder)
            }
            code => Err(FlashSaleError::FastStore(format!(
                "unexpected deplete reply code {code}"
            ))),
        }
    }

    /// Give the unit held by `reservation` back.
    ///
    /// Increments the counter by exactly one and removes the duplicate
    /// marker if it still names this order. Transient store failures are
    /// retried; a final failure is logged for the operator and returned.
    ///
    /// Returns the stock after the increment.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::FastStore`] once the retry budget is spent.
    pub async fn compensate(&self, reservation: &Reservation) -> Result<i64> {
        let keys = [
            self.keys.stock_key(reservation.item_id),
            self.keys.order_marker_key(&reservation.identity, reservation.item_id),
        ];
        let args = [reservation.order_no.to_string()];
        let (keys, args) = (&keys, &args);
        let store = &self.store;

        let result = retry_with_predicate(
            &self.compensation_retry,
            "restock",
            move || store.execute_script(AtomicScript::Restock, keys, args),
            |err| matches!(err, FlashSaleError::FastStore(_)),
        )
        .await;

        match result {
            Ok(reply) => {
                PurchaseMetrics::record_compensation();
                tracing::warn!(
                    order_no = %reservation.order_no,
                    item_id = %reservation.item_id,
                    remaining = reply.code,
                    "Stock restored after failed finalize"
                );
                Ok(reply.code)
            }
            Err(err) => {
                PurchaseMetrics::record_compensation_failure();
                tracing::error!(
                    order_no = %reservation.order_no,
                    identity = %reservation.identity,
                    item_id = %reservation.item_id,
                    error = %err,
                    "Compensation failed, one unit of stock is lost until reconciled"
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::mocks::InMemoryFastStore;
    use crate::providers::ScriptReply;

    struct Fixture {
        engine: InventoryEngine<InMemoryFastStore>,
        store: InMemoryFastStore,
        keys: Keyspace,
    }

    async fn fixture(stock: i64) -> Fixture {
        let store = InMemoryFastStore::new();
        let keys = Keyspace::default();
        store
            .set(&keys.stock_key(ItemId::new(1)), &stock.to_string(), None)
            .await
            .unwrap();
        let engine = InventoryEngine::new(Arc::new(store.clone()), &FlashSaleConfig::default())
            .with_compensation_retry(RetryPolicy::fixed(3, Duration::from_millis(1)));
        Fixture { engine, store, keys }
    }

    async fn token_for(f: &Fixture, identity: &str, value: &str) -> AdmissionToken {
        let token = AdmissionToken::new(value);
        f.store
            .set(
                &f.keys.token_key(&token),
                &token_binding(&Identity::new(identity), ItemId::new(1)),
                None,
            )
            .await
            .unwrap();
        token
    }

    async fn stock(f: &Fixture) -> String {
        f.store
            .get(&f.keys.stock_key(ItemId::new(1)))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn reservation_consumes_token_and_writes_marker() {
        let f = fixture(2).await;
        let alice = Identity::new("alice");
        let token = token_for(&f, "alice", "t1").await;

        let reservation = f
            .engine
            .deplete(&alice, ItemId::new(1), &token, OrderNo::new("ORD1"))
            .await
            .unwrap();

        assert_eq!(reservation.remaining, 1);
        assert_eq!(stock(&f).await, "1");
        assert!(!f.store.exists(&f.keys.token_key(&token)).await.unwrap());
        let marker = f.keys.order_marker_key(&alice, ItemId::new(1));
        assert_eq!(f.store.get(&marker).await.unwrap().as_deref(), Some("ORD1"));
    }

    #[tokio::test]
    async fn out_of_stock_keeps_token() {
        let f = fixture(0).await;
        let token = token_for(&f, "alice", "t1").await;

        let err = f
            .engine
            .deplete(&Identity::new("alice"), ItemId::new(1), &token, OrderNo::new("ORD1"))
            .await
            .unwrap_err();

        assert_eq!(err, FlashSaleError::OutOfStock);
        assert_eq!(stock(&f).await, "0");
        assert!(f.store.exists(&f.keys.token_key(&token)).await.unwrap());
    }

    #[tokio::test]
    async fn token_bound_elsewhere_is_rejected() {
        let f = fixture(1).await;
        let token = token_for(&f, "alice", "t1").await;

        let err = f
            .engine
            .deplete(&Identity::new("bob"), ItemId::new(1), &token, OrderNo::new("ORD1"))
            .await
            .unwrap_err();

        assert_eq!(err, FlashSaleError::InvalidOrExpiredToken);
        assert_eq!(stock(&f).await, "1");
    }

    #[tokio::test]
    async fn second_token_of_same_identity_is_a_duplicate() {
        let f = fixture(5).await;
        let alice = Identity::new("alice");
        let first = token_for(&f, "alice", "t1").await;
        let second = token_for(&f, "alice", "t2").await;

        f.engine
            .deplete(&alice, ItemId::new(1), &first, OrderNo::new("ORD1"))
            .await
            .unwrap();
        let err = f
            .engine
            .deplete(&alice, ItemId::new(1), &second, OrderNo::new("ORD2"))
            .await
            .unwrap_err();

        assert_eq!(err, FlashSaleError::DuplicateOrder);
        assert_eq!(stock(&f).await, "4");
    }

    #[tokio::test]
    async fn malformed_remaining_stock_is_a_store_error() {
        let f = fixture(3).await;
        let token = token_for(&f, "alice", "t1").await;
        f.store
            .reply_next_script(AtomicScript::Deplete, ScriptReply::new(DEPLETE_RESERVED, "lots"));

        let err = f
            .engine
            .deplete(&Identity::new("alice"), ItemId::new(1), &token, OrderNo::new("ORD1"))
            .await
            .unwrap_err();

        assert!(matches!(err, FlashSaleError::FastStore(_)));
    }

    #[tokio::test]
    async fn compensation_restores_one_unit_and_clears_marker() {
        let f = fixture(1).await;
        let alice = Identity::new("alice");
        let token = token_for(&f, "alice", "t1").await;
        let reservation = f
            .engine
            .deplete(&alice, ItemId::new(1), &token, OrderNo::new("ORD1"))
            .await
            .unwrap();

        assert_eq!(f.engine.compensate(&reservation).await.unwrap(), 1);
        assert_eq!(stock(&f).await, "1");
        let marker = f.keys.order_marker_key(&alice, ItemId::new(1));
        assert!(!f.store.exists(&marker).await.unwrap());
    }

    #[tokio::test]
    async fn compensation_retries_transient_failures() {
        let f = fixture(1).await;
        let token = token_for(&f, "alice", "t1").await;
        let reservation = f
            .engine
            .deplete(&Identity::new("alice"), ItemId::new(1), &token, OrderNo::new("ORD1"))
            .await
            .unwrap();

        f.store.fail_next_scripts(AtomicScript::Restock, 2);
        assert_eq!(f.engine.compensate(&reservation).await.unwrap(), 1);

        f.store.fail_next_scripts(AtomicScript::Restock, 3);
        assert!(matches!(
            f.engine.compensate(&reservation).await,
            Err(FlashSaleError::FastStore(_))
        ));
        assert_eq!(stock(&f).await, "1");
    }
}
