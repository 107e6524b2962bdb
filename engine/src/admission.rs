//! Admission Token Manager.
//!
//! Tokens are advisory admission control, not reservations: issuing one
//! never touches the stock counter. A token is stored under
//! `{token_prefix}{token}` with the `identity:item` binding as its value,
//! so it can only be spent on the pair it was issued for. The depletion
//! script deletes it in the same step that takes the stock.

use crate::providers::FastStore;
use chrono::{DateTime, Utc};
use flash_sale_core::environment::Clock;
use flash_sale_core::keys::token_binding;
use flash_sale_core::types::{AdmissionToken, Identity, Item, ItemId, WindowPhase};
use flash_sale_core::{FlashSaleConfig, FlashSaleError, Keyspace, Result};
use flash_sale_runtime::metrics::AdmissionMetrics;
use std::sync::Arc;
use std::time::Duration;

/// Issues, validates and revokes admission tokens, and owns stock preheating.
pub struct TokenManager<F> {
    store: Arc<F>,
    keys: Keyspace,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<F: FastStore> TokenManager<F> {
    /// Create a token manager.
    #[must_use]
    pub fn new(store: Arc<F>, config: &FlashSaleConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            keys: config.keys.clone(),
            ttl: config.tokens.ttl,
            clock,
        }
    }

    /// Write the inventory counter for `item`.
    ///
    /// The counter never expires; it lives as long as the sale.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::FastStore`] if the write fails.
    pub async fn preheat_stock(&self, item: ItemId, stock: i64) -> Result<()> {
        self.store
            .set(&self.keys.stock_key(item), &stock.to_string(), None)
            .await?;
        tracing::info!(item_id = %item, stock, "Preheated sale stock");
        Ok(())
    }

    /// Current inventory counter for `item`; an absent counter reads as 0.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::FastStore`] if the read fails or the
    /// counter holds something other than an integer.
    pub async fn stock(&self, item: ItemId) -> Result<i64> {
        let key = self.keys.stock_key(item);
        match self.store.get(&key).await? {
            Some(value) => value.parse().map_err(|_| {
                FlashSaleError::FastStore(format!("stock counter {key} holds {value:?}"))
            }),
            None => Ok(0),
        }
    }

    /// Issue a token for `identity` to buy `item`.
    ///
    /// # Errors
    ///
    /// - [`FlashSaleError::SaleWindowClosed`] outside `[start, end)`
    /// - [`FlashSaleError::OutOfStock`] when the counter is already at zero
    /// - [`FlashSaleError::FastStore`] if the store fails
    pub async fn issue(&self, identity: &Identity, item: &Item) -> Result<AdmissionToken> {
        let now = self.clock.now();

        let phase = item.window.phase(now);
        if phase != WindowPhase::Open {
            AdmissionMetrics::record_rejected("window_closed");
            tracing::debug!(identity = %identity, item_id = %item.id, %phase, "Token refused outside sale window");
            return Err(FlashSaleError::SaleWindowClosed { phase });
        }

        // Advisory only: depletion is the authoritative stock check.
        let remaining = self.stock(item.id).await?;
        if remaining <= 0 {
            AdmissionMetrics::record_rejected("out_of_stock");
            tracing::debug!(identity = %identity, item_id = %item.id, "Token refused, stock exhausted");
            return Err(FlashSaleError::OutOfStock);
        }

        let token = generate_token(identity, item.id, now);
        self.store
            .set(
                &self.keys.token_key(&token),
                &token_binding(identity, item.id),
                Some(self.ttl),
            )
            .await?;

        AdmissionMetrics::record_issued();
        tracing::debug!(identity = %identity, item_id = %item.id, remaining, "Admission token issued");

        Ok(token)
    }

    /// Whether `token` is live. Does not consume it.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::FastStore`] if the read fails.
    pub async fn validate(&self, token: &AdmissionToken) -> Result<bool> {
        self.store.exists(&self.keys.token_key(token)).await
    }

    /// Whether `token` is live and was issued to `identity` for `item`.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::FastStore`] if the read fails.
    pub async fn validate_for(
        &self,
        token: &AdmissionToken,
        identity: &Identity,
        item: ItemId,
    ) -> Result<bool> {
        let bound = self.store.get(&self.keys.token_key(token)).await?;
        Ok(bound.is_some_and(|value| value == token_binding(identity, item)))
    }

    /// Delete `token`. Returns whether it was still live.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::FastStore`] if the delete fails.
    pub async fn revoke(&self, token: &AdmissionToken) -> Result<bool> {
        self.store.delete(&self.keys.token_key(token)).await
    }
}

/// `{identity}-{item}-{unix_nanos}-{random}`.
///
/// The random suffix keeps tokens distinct when two issues share a
/// timestamp, which a pinned test clock makes certain.
fn generate_token(identity: &Identity, item: ItemId, now: DateTime<Utc>) -> AdmissionToken {
    let nanos = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp());
    let suffix: u64 = rand::random();
    AdmissionToken::new(format!("{identity}-{item}-{nanos}-{suffix:016x}"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::mocks::InMemoryFastStore;
    use chrono::Duration as ChronoDuration;
    use flash_sale_core::types::SaleWindow;
    use flash_sale_testing::{ManualClock, test_epoch};

    fn item(window: SaleWindow) -> Item {
        Item {
            id: ItemId::new(1),
            name: "Phone".into(),
            price_cents: 19_900,
            stock: 10,
            sale_stock: 10,
            window,
            created_at: test_epoch(),
        }
    }

    fn manager(clock: &ManualClock) -> (TokenManager<InMemoryFastStore>, InMemoryFastStore) {
        let store = InMemoryFastStore::new();
        let manager = TokenManager::new(
            Arc::new(store.clone()),
            &FlashSaleConfig::default(),
            Arc::new(clock.clone()),
        );
        (manager, store)
    }

    fn open_window() -> SaleWindow {
        SaleWindow::new(test_epoch(), test_epoch() + ChronoDuration::hours(1)).unwrap()
    }

    #[tokio::test]
    async fn issued_token_is_bound_to_its_pair() {
        let clock = ManualClock::starting_at_test_epoch();
        let (manager, _) = manager(&clock);
        let item = item(open_window());
        manager.preheat_stock(item.id, 5).await.unwrap();

        let alice = Identity::new("alice");
        let token = manager.issue(&alice, &item).await.unwrap();

        assert!(token.as_str().starts_with("alice-1-"));
        assert!(manager.validate(&token).await.unwrap());
        assert!(manager.validate_for(&token, &alice, item.id).await.unwrap());
        assert!(!manager.validate_for(&token, &Identity::new("bob"), item.id).await.unwrap());
        assert!(!manager.validate_for(&token, &alice, ItemId::new(2)).await.unwrap());
    }

    #[tokio::test]
    async fn issuing_does_not_reserve_stock() {
        let clock = ManualClock::starting_at_test_epoch();
        let (manager, _) = manager(&clock);
        let item = item(open_window());
        manager.preheat_stock(item.id, 1).await.unwrap();

        let first = manager.issue(&Identity::new("a"), &item).await.unwrap();
        let second = manager.issue(&Identity::new("b"), &item).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(manager.stock(item.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn window_is_half_open() {
        let clock = ManualClock::starting_at_test_epoch();
        let (manager, _) = manager(&clock);
        let item = item(open_window());
        manager.preheat_stock(item.id, 5).await.unwrap();
        let alice = Identity::new("alice");

        clock.set(test_epoch() - ChronoDuration::seconds(1));
        assert_eq!(
            manager.issue(&alice, &item).await.unwrap_err(),
            FlashSaleError::SaleWindowClosed { phase: WindowPhase::NotStarted }
        );

        clock.set(test_epoch());
        assert!(manager.issue(&alice, &item).await.is_ok());

        clock.set(item.window.end);
        assert_eq!(
            manager.issue(&alice, &item).await.unwrap_err(),
            FlashSaleError::SaleWindowClosed { phase: WindowPhase::Ended }
        );
    }

    #[tokio::test]
    async fn missing_counter_reads_as_sold_out() {
        let clock = ManualClock::starting_at_test_epoch();
        let (manager, _) = manager(&clock);
        let item = item(open_window());

        assert_eq!(manager.stock(item.id).await.unwrap(), 0);
        assert_eq!(
            manager.issue(&Identity::new("alice"), &item).await.unwrap_err(),
            FlashSaleError::OutOfStock
        );
    }

    #[tokio::test]
    async fn revoked_and_expired_tokens_are_invalid() {
        let clock = ManualClock::starting_at_test_epoch();
        let (manager, store) = manager(&clock);
        let item = item(open_window());
        manager.preheat_stock(item.id, 5).await.unwrap();
        let alice = Identity::new("alice");

        let revoked = manager.issue(&alice, &item).await.unwrap();
        assert!(manager.revoke(&revoked).await.unwrap());
        assert!(!manager.validate(&revoked).await.unwrap());
        assert!(!manager.revoke(&revoked).await.unwrap());

        let expired = manager.issue(&alice, &item).await.unwrap();
        store.expire(&Keyspace::default().token_key(&expired));
        assert!(!manager.validate(&expired).await.unwrap());
    }
}
