//! Fast-store key layout.
//!
//! Every key the subsystem touches is derived here so the Redis store, the
//! in-memory store and operators inspecting the keyspace agree on one layout.

use crate::types::{AdmissionToken, Identity, ItemId, OrderNo};

/// Key prefixes for the fast store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyspace {
    /// Prefix for admission tokens.
    pub token_prefix: String,
    /// Prefix for inventory counters.
    pub stock_prefix: String,
    /// Prefix for duplicate-order markers.
    pub order_prefix: String,
    /// Prefix for purchase locks.
    pub lock_prefix: String,
}

impl Keyspace {
    /// Keyspace with every prefix placed under `namespace`.
    ///
    /// ```
    /// use flash_sale_core::{Keyspace, types::ItemId};
    ///
    /// let keys = Keyspace::namespaced("test");
    /// assert_eq!(keys.stock_key(ItemId::new(3)), "test:stock:3");
    /// ```
    #[must_use]
    pub fn namespaced(namespace: &str) -> Self {
        Self {
            token_prefix: format!("{namespace}:token:"),
            stock_prefix: format!("{namespace}:stock:"),
            order_prefix: format!("{namespace}:order:"),
            lock_prefix: format!("{namespace}:lock:"),
        }
    }

    /// Inventory counter for an item.
    #[must_use]
    pub fn stock_key(&self, item: ItemId) -> String {
        format!("{}{item}", self.stock_prefix)
    }

    /// Admission token entry.
    #[must_use]
    pub fn token_key(&self, token: &AdmissionToken) -> String {
        format!("{}{token}", self.token_prefix)
    }

    /// Duplicate-order marker for an (identity, item) pair.
    #[must_use]
    pub fn order_marker_key(&self, identity: &Identity, item: ItemId) -> String {
        format!("{}{identity}:{item}", self.order_prefix)
    }

    /// Purchase lock for one order.
    #[must_use]
    pub fn lock_key(&self, order_no: &OrderNo) -> String {
        format!("{}order:{order_no}", self.lock_prefix)
    }
}

impl Default for Keyspace {
    fn default() -> Self {
        Self::namespaced("seckill")
    }
}

/// Value stored under a token key: the (identity, item) pair the token was issued for.
#[must_use]
pub fn token_binding(identity: &Identity, item: ItemId) -> String {
    format!("{identity}:{item}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let keys = Keyspace::default();
        let identity = Identity::new("u42");
        let item = ItemId::new(7);

        assert_eq!(keys.stock_key(item), "seckill:stock:7");
        assert_eq!(
            keys.token_key(&AdmissionToken::new("abc")),
            "seckill:token:abc"
        );
        assert_eq!(keys.order_marker_key(&identity, item), "seckill:order:u42:7");
        assert_eq!(
            keys.lock_key(&OrderNo::new("ORD1")),
            "seckill:lock:order:ORD1"
        );
    }

    #[test]
    fn binding_names_identity_and_item() {
        assert_eq!(token_binding(&Identity::new("alice"), ItemId::new(9)), "alice:9");
    }
}
