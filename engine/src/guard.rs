//! Duplicate-Purchase Guard.
//!
//! The fast-store marker answers for recent orders; the record store's
//! count of non-cancelled orders answers for everything else, including
//! markers that expired or were never written because a process died
//! between depletion and persistence.

use crate::providers::{FastStore, RecordStore};
use flash_sale_core::types::{Identity, ItemId, OrderNo, OrderStatus};
use flash_sale_core::{FlashSaleConfig, FlashSaleError, Keyspace, Result};
use std::sync::Arc;
use std::time::Duration;

/// Marker-then-database duplicate check for `(identity, item)` pairs.
pub struct DuplicateGuard<F, R> {
    fast: Arc<F>,
    records: Arc<R>,
    keys: Keyspace,
    marker_ttl: Duration,
}

impl<F: FastStore, R: RecordStore> DuplicateGuard<F, R> {
    /// Create a guard.
    #[must_use]
    pub fn new(fast: Arc<F>, records: Arc<R>, config: &FlashSaleConfig) -> Self {
        Self {
            fast,
            records,
            keys: config.keys.clone(),
            marker_ttl: config.marker_ttl,
        }
    }

    /// Whether `identity` already holds a non-cancelled order for `item`.
    ///
    /// # Errors
    ///
    /// Returns a store error if either lookup fails.
    pub async fn has_existing_order(&self, identity: &Identity, item: ItemId) -> Result<bool> {
        let marker = self.keys.order_marker_key(identity, item);
        if self.fast.exists(&marker).await? {
            return Ok(true);
        }

        let count = self
            .records
            .count_orders(identity, item, OrderStatus::Cancelled)
            .await?;
        Ok(count > 0)
    }

    /// [`has_existing_order`](Self::has_existing_order) as a `Result`.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::DuplicateOrder`] for an existing order, or
    /// a store error if a lookup fails.
    pub async fn check(&self, identity: &Identity, item: ItemId) -> Result<()> {
        if self.has_existing_order(identity, item).await? {
            tracing::warn!(identity = %identity, item_id = %item, "Duplicate purchase attempt");
            return Err(FlashSaleError::DuplicateOrder);
        }
        Ok(())
    }

    /// Write (or refresh) the marker for a persisted order.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::FastStore`] if the write fails.
    pub async fn remember(&self, identity: &Identity, item: ItemId, order_no: &OrderNo) -> Result<()> {
        self.fast
            .set(
                &self.keys.order_marker_key(identity, item),
                order_no.as_str(),
                Some(self.marker_ttl),
            )
            .await
    }

    /// Remove the marker so the identity may buy the item again.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::FastStore`] if the delete fails.
    pub async fn clear(&self, identity: &Identity, item: ItemId) -> Result<bool> {
        self.fast
            .delete(&self.keys.order_marker_key(identity, item))
            .await
    }
}
