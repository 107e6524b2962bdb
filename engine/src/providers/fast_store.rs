//! Fast atomic store trait.
//!
//! The fast store owns every piece of shared mutable sale state: inventory
//! counters, admission tokens, duplicate markers and purchase locks. The
//! engine never reads a counter and writes it back; every conditional
//! mutation goes through [`FastStore::execute_script`].

use flash_sale_core::Result;
use std::time::Duration;

/// Indivisible multi-step mutations the fast store must offer.
///
/// Each variant fixes the layout of `keys` and `args` passed to
/// [`FastStore::execute_script`] and the meaning of the [`ScriptReply`].
/// Implementations must run the whole script without any other command
/// observing an intermediate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicScript {
    /// Consume a token and take one unit of stock.
    ///
    /// - keys: `[stock, token, marker]`
    /// - args: `[order_no, marker_ttl_secs, binding]`
    ///
    /// Steps, in order:
    /// 1. token value must equal `binding`, else code [`DEPLETE_INVALID_TOKEN`]
    /// 2. marker must be absent, else code [`DEPLETE_DUPLICATE`] (value: existing order number)
    /// 3. stock must be positive, else code [`DEPLETE_OUT_OF_STOCK`]
    /// 4. decrement stock, delete token, set marker to `order_no` with expiry;
    ///    code [`DEPLETE_RESERVED`], value: remaining stock
    Deplete,

    /// Give one unit of stock back.
    ///
    /// - keys: `[stock, marker]`
    /// - args: `[order_no]`
    ///
    /// Increments stock and deletes the marker only while it still holds
    /// `order_no`. Code is the stock after the increment.
    Restock,

    /// Delete a key only if it holds the expected value.
    ///
    /// - keys: `[key]`
    /// - args: `[expected]`
    ///
    /// Code is 1 when deleted, 0 otherwise.
    CompareAndDelete,
}

/// [`AtomicScript::Deplete`]: stock taken.
pub const DEPLETE_RESERVED: i64 = 1;
/// [`AtomicScript::Deplete`]: no stock left.
pub const DEPLETE_OUT_OF_STOCK: i64 = 0;
/// [`AtomicScript::Deplete`]: token missing or bound to another purchase.
pub const DEPLETE_INVALID_TOKEN: i64 = -1;
/// [`AtomicScript::Deplete`]: identity already holds an order for the item.
pub const DEPLETE_DUPLICATE: i64 = -2;

/// Result of an atomic script: a status code plus an optional payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReply {
    /// Script-specific status code.
    pub code: i64,
    /// Script-specific payload (may be empty).
    pub value: String,
}

impl ScriptReply {
    /// Create a reply.
    #[must_use]
    pub fn new(code: i64, value: impl Into<String>) -> Self {
        Self {
            code,
            value: value.into(),
        }
    }
}

/// Fast atomic key-value store.
///
/// # Implementation Notes
///
/// - Values are strings; counters are decimal integers
/// - A `ttl` of `None` means the key never expires
/// - Expired keys must behave exactly like absent keys
/// - `execute_script` must be linearizable with respect to every other
///   command touching the same keys
pub trait FastStore: Send + Sync {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn get(&self, key: &str) -> impl std::future::Future<Output = Result<Option<String>>> + Send;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Write a value only if the key is absent.
    ///
    /// Returns `true` when this call created the key.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Delete a key. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn delete(&self, key: &str) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Check whether a key exists.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable.
    fn exists(&self, key: &str) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Add one to a counter (absent counts as 0). Returns the new value.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable or the value is not an integer.
    fn increment(&self, key: &str) -> impl std::future::Future<Output = Result<i64>> + Send;

    /// Subtract one from a counter (absent counts as 0). Returns the new value.
    ///
    /// Unconditional; stock must never be taken through this call.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable or the value is not an integer.
    fn decrement(&self, key: &str) -> impl std::future::Future<Output = Result<i64>> + Send;

    /// Run one of the [`AtomicScript`]s indivisibly.
    ///
    /// # Errors
    ///
    /// Returns error if the store is unreachable or the arguments do not
    /// match the script's layout.
    fn execute_script(
        &self,
        script: AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> impl std::future::Future<Output = Result<ScriptReply>> + Send;
}
