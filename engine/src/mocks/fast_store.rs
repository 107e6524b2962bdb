//! In-memory fast store for testing.

use crate::providers::{
    AtomicScript, DEPLETE_DUPLICATE, DEPLETE_INVALID_TOKEN, DEPLETE_OUT_OF_STOCK,
    DEPLETE_RESERVED, FastStore, ScriptReply,
};
use flash_sale_core::{FlashSaleError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    fail_ops: u32,
    fail_scripts: HashMap<AtomicScript, u32>,
    canned_replies: HashMap<AtomicScript, ScriptReply>,
}

impl State {
    fn read(&mut self, key: &str) -> Option<String> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn write(&mut self, key: &str, value: String, ttl: Option<Duration>) {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
    }

    fn remove(&mut self, key: &str) -> bool {
        let live = self.read(key).is_some();
        self.entries.remove(key);
        live
    }

    fn add(&mut self, key: &str, delta: i64) -> Result<i64> {
        let current = match self.read(key) {
            Some(value) => value.parse::<i64>().map_err(|_| {
                FlashSaleError::FastStore(format!("value at {key} is not an integer"))
            })?,
            None => 0,
        };
        let next = current + delta;
        // INCR/DECR keep an existing expiry.
        let expires_at = self.entries.get(key).and_then(|e| e.expires_at);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    fn take_op_failure(&mut self) -> Result<()> {
        if self.fail_ops > 0 {
            self.fail_ops -= 1;
            return Err(FlashSaleError::FastStore("injected failure".into()));
        }
        Ok(())
    }

    fn take_script_failure(&mut self, script: AtomicScript) -> Result<()> {
        if let Some(remaining) = self.fail_scripts.get_mut(&script) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FlashSaleError::FastStore(format!(
                    "injected {script:?} failure"
                )));
            }
        }
        Ok(())
    }
}

/// In-memory fast store.
///
/// One mutex guards the whole keyspace, so every script runs indivisibly,
/// the same guarantee Redis gives Lua scripts. Expiry uses the monotonic
/// clock; expired keys are dropped lazily on access.
///
/// # Failure injection
///
/// - [`fail_next_ops`](Self::fail_next_ops) fails the next N plain commands
/// - [`fail_next_scripts`](Self::fail_next_scripts) fails the next N runs of one script
/// - [`reply_next_script`](Self::reply_next_script) answers the next run of one
///   script with a fixed reply, without touching any key
#[derive(Debug, Clone, Default)]
pub struct InMemoryFastStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryFastStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| FlashSaleError::FastStore("Mutex lock failed".into()))
    }

    /// Fail the next `count` plain commands (not scripts).
    pub fn fail_next_ops(&self, count: u32) {
        if let Ok(mut state) = self.lock() {
            state.fail_ops = count;
        }
    }

    /// Fail the next `count` executions of `script`.
    pub fn fail_next_scripts(&self, script: AtomicScript, count: u32) {
        if let Ok(mut state) = self.lock() {
            state.fail_scripts.insert(script, count);
        }
    }

    /// Answer the next execution of `script` with `reply` instead of running it.
    pub fn reply_next_script(&self, script: AtomicScript, reply: ScriptReply) {
        if let Ok(mut state) = self.lock() {
            state.canned_replies.insert(script, reply);
        }
    }

    /// Drop a key as if its TTL had elapsed.
    pub fn expire(&self, key: &str) {
        if let Ok(mut state) = self.lock() {
            state.entries.remove(key);
        }
    }

    /// Live keys starting with `prefix` (for assertions).
    #[must_use]
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let Ok(state) = self.lock() else {
            return Vec::new();
        };
        let now = Instant::now();
        let mut keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn deplete(state: &mut State, keys: &[String], args: &[String]) -> Result<ScriptReply> {
        let [stock_key, token_key, marker_key] = keys else {
            return Err(arity(AtomicScript::Deplete));
        };
        let [order_no, marker_ttl, binding] = args else {
            return Err(arity(AtomicScript::Deplete));
        };

        if state.read(token_key).as_deref() != Some(binding.as_str()) {
            return Ok(ScriptReply::new(DEPLETE_INVALID_TOKEN, ""));
        }

        if let Some(existing) = state.read(marker_key) {
            return Ok(ScriptReply::new(DEPLETE_DUPLICATE, existing));
        }

        let stock = state
            .read(stock_key)
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        if stock <= 0 {
            return Ok(ScriptReply::new(DEPLETE_OUT_OF_STOCK, ""));
        }

        let ttl_secs: u64 = marker_ttl
            .parse()
            .map_err(|_| FlashSaleError::FastStore(format!("bad marker ttl: {marker_ttl}")))?;

        let remaining = state.add(stock_key, -1)?;
        state.entries.remove(token_key.as_str());
        state.write(marker_key, order_no.clone(), Some(Duration::from_secs(ttl_secs)));

        Ok(ScriptReply::new(DEPLETE_RESERVED, remaining.to_string()))
    }

    fn restock(state: &mut State, keys: &[String], args: &[String]) -> Result<ScriptReply> {
        let [stock_key, marker_key] = keys else {
            return Err(arity(AtomicScript::Restock));
        };
        let [order_no] = args else {
            return Err(arity(AtomicScript::Restock));
        };

        let stock = state.add(stock_key, 1)?;
        if state.read(marker_key).as_deref() == Some(order_no.as_str()) {
            state.entries.remove(marker_key.as_str());
        }
        Ok(ScriptReply::new(stock, ""))
    }

    fn compare_and_delete(state: &mut State, keys: &[String], args: &[String]) -> Result<ScriptReply> {
        let [key] = keys else {
            return Err(arity(AtomicScript::CompareAndDelete));
        };
        let [expected] = args else {
            return Err(arity(AtomicScript::CompareAndDelete));
        };

        if state.read(key).as_deref() == Some(expected.as_str()) {
            state.entries.remove(key.as_str());
            Ok(ScriptReply::new(1, ""))
        } else {
            Ok(ScriptReply::new(0, ""))
        }
    }
}

fn arity(script: AtomicScript) -> FlashSaleError {
    FlashSaleError::FastStore(format!("wrong number of keys or args for {script:?}"))
}

impl FastStore for InMemoryFastStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.lock()?;
        state.take_op_failure()?;
        Ok(state.read(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut state = self.lock()?;
        state.take_op_failure()?;
        state.write(key, value.to_string(), ttl);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut state = self.lock()?;
        state.take_op_failure()?;
        if state.read(key).is_some() {
            return Ok(false);
        }
        state.write(key, value.to_string(), Some(ttl));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut state = self.lock()?;
        state.take_op_failure()?;
        Ok(state.remove(key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut state = self.lock()?;
        state.take_op_failure()?;
        Ok(state.read(key).is_some())
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut state = self.lock()?;
        state.take_op_failure()?;
        state.add(key, 1)
    }

    async fn decrement(&self, key: &str) -> Result<i64> {
        let mut state = self.lock()?;
        state.take_op_failure()?;
        state.add(key, -1)
    }

    async fn execute_script(
        &self,
        script: AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply> {
        let mut state = self.lock()?;
        state.take_script_failure(script)?;
        if let Some(reply) = state.canned_replies.remove(&script) {
            return Ok(reply);
        }
        match script {
            AtomicScript::Deplete => Self::deplete(&mut state, keys, args),
            AtomicScript::Restock => Self::restock(&mut state, keys, args),
            AtomicScript::CompareAndDelete => Self::compare_and_delete(&mut state, keys, args),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn ttl_expires_keys() {
        let store = InMemoryFastStore::new();
        store.set("k", "v", Some(Duration::from_millis(20))).await.unwrap();
        assert!(store.exists("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(!store.exists("k").await.unwrap());
        assert!(store.set_if_absent("k", "w", Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn counters_start_at_zero() {
        let store = InMemoryFastStore::new();
        assert_eq!(store.increment("c").await.unwrap(), 1);
        assert_eq!(store.decrement("c").await.unwrap(), 0);
        assert_eq!(store.decrement("c").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn deplete_checks_token_then_marker_then_stock() {
        let store = InMemoryFastStore::new();
        let keys = strings(&["stock", "token", "marker"]);
        let args = strings(&["ORD1", "60", "alice:1"]);

        // No token.
        let reply = store.execute_script(AtomicScript::Deplete, &keys, &args).await.unwrap();
        assert_eq!(reply.code, DEPLETE_INVALID_TOKEN);

        // Token bound to someone else.
        store.set("token", "bob:1", None).await.unwrap();
        let reply = store.execute_script(AtomicScript::Deplete, &keys, &args).await.unwrap();
        assert_eq!(reply.code, DEPLETE_INVALID_TOKEN);

        // Right token, no stock: token survives.
        store.set("token", "alice:1", None).await.unwrap();
        let reply = store.execute_script(AtomicScript::Deplete, &keys, &args).await.unwrap();
        assert_eq!(reply.code, DEPLETE_OUT_OF_STOCK);
        assert!(store.exists("token").await.unwrap());

        // Stock available.
        store.set("stock", "2", None).await.unwrap();
        let reply = store.execute_script(AtomicScript::Deplete, &keys, &args).await.unwrap();
        assert_eq!(reply, ScriptReply::new(DEPLETE_RESERVED, "1"));
        assert!(!store.exists("token").await.unwrap());
        assert_eq!(store.get("marker").await.unwrap().as_deref(), Some("ORD1"));

        // Second token for the same pair hits the marker.
        store.set("token", "alice:1", None).await.unwrap();
        let reply = store.execute_script(AtomicScript::Deplete, &keys, &args).await.unwrap();
        assert_eq!(reply, ScriptReply::new(DEPLETE_DUPLICATE, "ORD1"));
        assert_eq!(store.get("stock").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn restock_only_clears_own_marker() {
        let store = InMemoryFastStore::new();
        store.set("stock", "0", None).await.unwrap();
        store.set("marker", "ORD2", None).await.unwrap();

        let reply = store
            .execute_script(AtomicScript::Restock, &strings(&["stock", "marker"]), &strings(&["ORD1"]))
            .await
            .unwrap();
        assert_eq!(reply.code, 1);
        assert!(store.exists("marker").await.unwrap());
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = InMemoryFastStore::new();
        store.fail_next_ops(1);
        assert!(store.get("k").await.is_err());
        assert!(store.get("k").await.is_ok());

        store.fail_next_scripts(AtomicScript::Restock, 1);
        let keys = strings(&["s", "m"]);
        let args = strings(&["ORD"]);
        assert!(store.execute_script(AtomicScript::Restock, &keys, &args).await.is_err());
        assert!(store.execute_script(AtomicScript::Restock, &keys, &args).await.is_ok());
    }

    #[tokio::test]
    async fn canned_reply_is_used_once() {
        let store = InMemoryFastStore::new();
        store.reply_next_script(AtomicScript::Restock, ScriptReply::new(42, "x"));
        let keys = strings(&["s", "m"]);
        let args = strings(&["ORD"]);

        let reply = store.execute_script(AtomicScript::Restock, &keys, &args).await.unwrap();
        assert_eq!(reply.code, 42);
        assert!(!store.exists("s").await.unwrap());

        let reply = store.execute_script(AtomicScript::Restock, &keys, &args).await.unwrap();
        assert_eq!(reply.code, 1);
    }

    #[tokio::test]
    async fn script_arity_is_checked() {
        let store = InMemoryFastStore::new();
        let result = store
            .execute_script(AtomicScript::CompareAndDelete, &strings(&["a", "b"]), &strings(&["x"]))
            .await;
        assert!(result.is_err());
    }
}
