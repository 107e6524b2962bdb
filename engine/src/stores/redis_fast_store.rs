//! Redis-backed fast store.
//!
//! # Architecture
//!
//! - Plain commands map one-to-one onto Redis commands (`GET`, `SET PX`,
//!   `SET NX PX`, `DEL`, `EXISTS`, `INCR`, `DECR`)
//! - [`AtomicScript`]s run as Lua via `EVALSHA`, so Redis executes each
//!   script without interleaving any other client's command
//! - Every script returns a two-element array `{code, value}`
//!
//! # Example
//!
//! ```no_run
//! use flash_sale_engine::stores::RedisFastStore;
//! use flash_sale_engine::providers::FastStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisFastStore::new("redis://127.0.0.1:6379").await?;
//! store.set("seckill:stock:1", "100", None).await?;
//! # Ok(())
//! # }
//! ```

use crate::providers::{AtomicScript, FastStore, ScriptReply};
use flash_sale_core::{FlashSaleError, Result};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::time::Duration;

const DEPLETE_LUA: &str = r"
local stock_key = KEYS[1]
local token_key = KEYS[2]
local marker_key = KEYS[3]

local bound = redis.call('GET', token_key)
if (not bound) or bound ~= ARGV[3] then
    return {-1, ''}
end

local existing = redis.call('GET', marker_key)
if existing then
    return {-2, existing}
end

local stock = tonumber(redis.call('GET', stock_key) or '0')
if stock <= 0 then
    return {0, ''}
end

local remaining = redis.call('DECR', stock_key)
redis.call('DEL', token_key)
redis.call('SET', marker_key, ARGV[1], 'EX', tonumber(ARGV[2]))
return {1, tostring(remaining)}
";

const RESTOCK_LUA: &str = r"
local stock = redis.call('INCR', KEYS[1])
if redis.call('GET', KEYS[2]) == ARGV[1] then
    redis.call('DEL', KEYS[2])
end
return {stock, ''}
";

const COMPARE_AND_DELETE_LUA: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return {redis.call('DEL', KEYS[1]), ''}
end
return {0, ''}
";

/// `Redis` fast store with connection pooling.
///
/// # Thread Safety
///
/// This type is `Clone`; clones share one `ConnectionManager`, which
/// reconnects transparently after a dropped connection.
#[derive(Clone)]
pub struct RedisFastStore {
    conn_manager: ConnectionManager,
    deplete: Script,
    restock: Script,
    compare_and_delete: Script,
}

impl RedisFastStore {
    /// Connect to `Redis`.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::FastStore`] if the URL is malformed or the
    /// server is unreachable.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| FlashSaleError::FastStore(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            FlashSaleError::FastStore(format!("Failed to create Redis connection manager: {e}"))
        })?;

        tracing::info!("RedisFastStore initialized successfully");

        Ok(Self {
            conn_manager,
            deplete: Script::new(DEPLETE_LUA),
            restock: Script::new(RESTOCK_LUA),
            compare_and_delete: Script::new(COMPARE_AND_DELETE_LUA),
        })
    }

    const fn script(&self, script: AtomicScript) -> &Script {
        match script {
            AtomicScript::Deplete => &self.deplete,
            AtomicScript::Restock => &self.restock,
            AtomicScript::CompareAndDelete => &self.compare_and_delete,
        }
    }
}

fn store_err(op: &str) -> impl Fn(redis::RedisError) -> FlashSaleError + '_ {
    move |e| FlashSaleError::FastStore(format!("Redis {op} failed: {e}"))
}

#[allow(clippy::cast_possible_truncation)]
fn millis(ttl: Duration) -> u64 {
    // Redis rejects a zero expiry.
    (ttl.as_millis() as u64).max(1)
}

const fn expected_arity(script: AtomicScript) -> (usize, usize) {
    match script {
        AtomicScript::Deplete => (3, 3),
        AtomicScript::Restock => (2, 1),
        AtomicScript::CompareAndDelete => (1, 1),
    }
}

impl FastStore for RedisFastStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn_manager.clone();
        conn.get(key).await.map_err(store_err("GET"))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: () = match ttl {
            Some(ttl) => conn
                .pset_ex(key, value, millis(ttl))
                .await
                .map_err(store_err("PSETEX"))?,
            None => conn.set(key, value).await.map_err(store_err("SET"))?,
        };
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();

        // SET NX PX is a single command: create-with-expiry or nothing.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_err("SET NX"))?;

        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let removed: i64 = conn.del(key).await.map_err(store_err("DEL"))?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        conn.exists(key).await.map_err(store_err("EXISTS"))
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn_manager.clone();
        conn.incr(key, 1).await.map_err(store_err("INCR"))
    }

    async fn decrement(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn_manager.clone();
        conn.decr(key, 1).await.map_err(store_err("DECR"))
    }

    async fn execute_script(
        &self,
        script: AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply> {
        let (key_count, arg_count) = expected_arity(script);
        if keys.len() != key_count || args.len() != arg_count {
            return Err(FlashSaleError::FastStore(format!(
                "{script:?} expects {key_count} keys and {arg_count} args, got {} and {}",
                keys.len(),
                args.len()
            )));
        }

        let mut conn = self.conn_manager.clone();
        let mut invocation = self.script(script).prepare_invoke();
        for key in keys {
            invocation.key(key);
        }
        for arg in args {
            invocation.arg(arg);
        }

        let (code, value): (i64, String) = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(|e| FlashSaleError::FastStore(format!("{script:?} script failed: {e}")))?;

        Ok(ScriptReply { code, value })
    }
}
