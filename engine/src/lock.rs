//! Per-order purchase lock.
//!
//! Acquire is `SET key owner NX PX ttl` with a fresh UUID as owner;
//! release is [`AtomicScript::CompareAndDelete`] on that owner. A holder
//! whose TTL lapsed can therefore never delete a lock someone else has
//! since taken.
//!
//! The lock key is scoped to the order number, not the item: depletion has
//! already serialized the item-level race, so unrelated orders for the
//! same item never wait on each other.

use crate::providers::{AtomicScript, FastStore};
use flash_sale_core::config::LockConfig;
use flash_sale_core::types::OrderNo;
use flash_sale_core::{FlashSaleError, Keyspace, Result};
use flash_sale_runtime::metrics::LockMetrics;
use flash_sale_runtime::{RetryPolicy, retry_with_backoff};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
enum AttemptError {
    #[error("lock held by another owner")]
    Contended,
    #[error(transparent)]
    Store(#[from] FlashSaleError),
}

/// A held purchase lock.
///
/// Dropping it without [`release`](Self::release) leaves the key to expire
/// with its TTL.
#[derive(Debug)]
#[must_use = "a purchase lock should be released"]
pub struct PurchaseLock {
    order_no: OrderNo,
    key: String,
    owner: String,
}

impl PurchaseLock {
    /// Acquire the lock for `order_no`.
    ///
    /// Makes `config.attempts` attempts with `config.retry_delay` between
    /// them. A store error counts as a failed attempt.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::LockAcquisitionFailure`] when every attempt
    /// failed.
    pub async fn acquire<F: FastStore>(
        store: &F,
        keys: &Keyspace,
        order_no: &OrderNo,
        config: &LockConfig,
    ) -> Result<Self> {
        let key = keys.lock_key(order_no);
        let owner = Uuid::new_v4().to_string();
        let policy = RetryPolicy::fixed(config.attempts, config.retry_delay);
        let (key_ref, owner_ref, ttl) = (key.as_str(), owner.as_str(), config.ttl);

        let result = retry_with_backoff(&policy, "purchase_lock", move || async move {
            LockMetrics::record_attempt();
            if store.set_if_absent(key_ref, owner_ref, ttl).await? {
                Ok(())
            } else {
                tracing::warn!(order_no = %order_no, "Purchase lock contended");
                Err(AttemptError::Contended)
            }
        })
        .await;

        match result {
            Ok(()) => {
                tracing::debug!(order_no = %order_no, "Purchase lock acquired");
                Ok(Self {
                    order_no: order_no.clone(),
                    key,
                    owner,
                })
            }
            Err(err) => {
                LockMetrics::record_failure();
                tracing::warn!(
                    order_no = %order_no,
                    attempts = config.attempts,
                    error = %err,
                    "Purchase lock unavailable"
                );
                Err(FlashSaleError::LockAcquisitionFailure {
                    order_no: order_no.clone(),
                })
            }
        }
    }

    /// Release the lock if this holder still owns it.
    ///
    /// Returns `false` when the key had already expired or changed owner.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::FastStore`] if the script cannot run.
    pub async fn release<F: FastStore>(self, store: &F) -> Result<bool> {
        let reply = store
            .execute_script(
                AtomicScript::CompareAndDelete,
                std::slice::from_ref(&self.key),
                std::slice::from_ref(&self.owner),
            )
            .await?;

        let released = reply.code == 1;
        if !released {
            tracing::warn!(order_no = %self.order_no, "Purchase lock lost before release");
        }
        Ok(released)
    }

    /// Store key of the lock.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Owner token written into the key.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::mocks::InMemoryFastStore;
    use std::time::Duration;

    fn config() -> LockConfig {
        LockConfig::default().with_retries(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let store = InMemoryFastStore::new();
        let keys = Keyspace::default();
        let order_no = OrderNo::new("ORD1");

        let held = PurchaseLock::acquire(&store, &keys, &order_no, &config())
            .await
            .unwrap();
        assert_eq!(held.key(), "seckill:lock:order:ORD1");

        let err = PurchaseLock::acquire(&store, &keys, &order_no, &config())
            .await
            .unwrap_err();
        assert_eq!(err, FlashSaleError::LockAcquisitionFailure { order_no: order_no.clone() });

        assert!(held.release(&store).await.unwrap());
        assert!(PurchaseLock::acquire(&store, &keys, &order_no, &config()).await.is_ok());
    }

    #[tokio::test]
    async fn release_never_deletes_another_owners_lock() {
        let store = InMemoryFastStore::new();
        let keys = Keyspace::default();
        let order_no = OrderNo::new("ORD1");

        let stale = PurchaseLock::acquire(&store, &keys, &order_no, &config())
            .await
            .unwrap();
        store.expire(stale.key());
        let current = PurchaseLock::acquire(&store, &keys, &order_no, &config())
            .await
            .unwrap();

        assert!(!stale.release(&store).await.unwrap());
        assert_eq!(
            store.get(current.key()).await.unwrap().as_deref(),
            Some(current.owner())
        );
    }

    #[tokio::test]
    async fn transient_store_error_is_retried() {
        let store = InMemoryFastStore::new();
        store.fail_next_ops(2);

        let lock = PurchaseLock::acquire(&store, &Keyspace::default(), &OrderNo::new("ORD1"), &config())
            .await;
        assert!(lock.is_ok());
    }
}
