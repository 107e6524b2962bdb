//! Application configuration loaded from the environment.
//!
//! Every value has a default, so an empty environment yields a working
//! local setup backed by the in-memory stores.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `FLASH_SALE_REDIS_URL` | unset (in-memory fast store) |
//! | `DATABASE_URL` | unset (in-memory record store) |
//! | `FLASH_SALE_KEY_NAMESPACE` | `seckill` |
//! | `FLASH_SALE_GLOBAL_CAPACITY` / `FLASH_SALE_GLOBAL_REFILL` | 10000 / 1000 |
//! | `FLASH_SALE_IDENTITY_CAPACITY` / `FLASH_SALE_IDENTITY_REFILL` | 5 / 5 |
//! | `FLASH_SALE_TOKEN_TTL_SECS` | 3600 |
//! | `FLASH_SALE_LOCK_TTL_MS` | 5000 |
//! | `FLASH_SALE_LOCK_ATTEMPTS` / `FLASH_SALE_LOCK_RETRY_MS` | 3 / 100 |
//! | `FLASH_SALE_MARKER_TTL_SECS` | 3600 |

use flash_sale_core::config::{LockConfig, RateLimitConfig};
use flash_sale_core::{FlashSaleConfig, Keyspace, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Process-level configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Redis URL; `None` selects the in-memory fast store.
    pub redis_url: Option<String>,
    /// `PostgreSQL` URL; `None` selects the in-memory record store.
    pub database_url: Option<String>,
    /// Sale tuning.
    pub sale: FlashSaleConfig,
}

impl AppConfig {
    /// Load from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`flash_sale_core::FlashSaleError::InvalidInput`] if the
    /// resulting sale configuration is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup.
    ///
    /// Unparseable values fall back to their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`flash_sale_core::FlashSaleError::InvalidInput`] if the
    /// resulting sale configuration is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let parse = |name: &str, default: u64| parsed(&lookup, name, default);
        let defaults = FlashSaleConfig::default();

        let rate_limit = RateLimitConfig::default()
            .with_global(
                parse("FLASH_SALE_GLOBAL_CAPACITY", defaults.rate_limit.global_capacity),
                parse("FLASH_SALE_GLOBAL_REFILL", defaults.rate_limit.global_refill_per_sec),
            )
            .with_per_identity(
                parse("FLASH_SALE_IDENTITY_CAPACITY", defaults.rate_limit.per_identity_capacity),
                parse(
                    "FLASH_SALE_IDENTITY_REFILL",
                    defaults.rate_limit.per_identity_refill_per_sec,
                ),
            );

        let lock = LockConfig {
            ttl: Duration::from_millis(parse("FLASH_SALE_LOCK_TTL_MS", 5_000)),
            ..LockConfig::default()
        }
        .with_retries(
            parsed(&lookup, "FLASH_SALE_LOCK_ATTEMPTS", defaults.lock.attempts),
            Duration::from_millis(parse("FLASH_SALE_LOCK_RETRY_MS", 100)),
        );

        let keys = lookup("FLASH_SALE_KEY_NAMESPACE")
            .map_or_else(Keyspace::default, |ns| Keyspace::namespaced(&ns));

        let sale = FlashSaleConfig::default()
            .with_rate_limit(rate_limit)
            .with_token_ttl(Duration::from_secs(parse(
                "FLASH_SALE_TOKEN_TTL_SECS",
                defaults.tokens.ttl.as_secs(),
            )))
            .with_lock(lock)
            .with_marker_ttl(Duration::from_secs(parse(
                "FLASH_SALE_MARKER_TTL_SECS",
                defaults.marker_ttl.as_secs(),
            )))
            .with_keys(keys);
        sale.validate()?;

        Ok(Self {
            redis_url: lookup("FLASH_SALE_REDIS_URL"),
            database_url: lookup("DATABASE_URL"),
            sale,
        })
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    lookup(name)
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}
