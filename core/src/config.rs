//! Flash sale configuration.
//!
//! Values only. Loading them (environment, files) is the application's job;
//! every struct has defaults suitable for a single-node sale.

use crate::error::{FlashSaleError, Result};
use crate::keys::Keyspace;
use std::time::Duration;

/// Token bucket sizing for the Rate Gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Burst capacity of the service-wide bucket.
    ///
    /// Default: 10 000
    pub global_capacity: u64,

    /// Tokens added to the service-wide bucket per second.
    ///
    /// Default: 1 000
    pub global_refill_per_sec: u64,

    /// Burst capacity of each identity's bucket.
    ///
    /// Default: 5
    pub per_identity_capacity: u64,

    /// Tokens added to each identity's bucket per second.
    ///
    /// Default: 5
    pub per_identity_refill_per_sec: u64,

    /// Identity buckets untouched for this long are evicted.
    ///
    /// Default: 10 minutes
    pub idle_bucket_ttl: Duration,
}

impl RateLimitConfig {
    /// Set the global bucket.
    #[must_use]
    pub const fn with_global(mut self, capacity: u64, refill_per_sec: u64) -> Self {
        self.global_capacity = capacity;
        self.global_refill_per_sec = refill_per_sec;
        self
    }

    /// Set the per-identity buckets.
    #[must_use]
    pub const fn with_per_identity(mut self, capacity: u64, refill_per_sec: u64) -> Self {
        self.per_identity_capacity = capacity;
        self.per_identity_refill_per_sec = refill_per_sec;
        self
    }

    /// Set the idle eviction threshold.
    #[must_use]
    pub const fn with_idle_bucket_ttl(mut self, ttl: Duration) -> Self {
        self.idle_bucket_ttl = ttl;
        self
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_capacity: 10_000,
            global_refill_per_sec: 1_000,
            per_identity_capacity: 5,
            per_identity_refill_per_sec: 5,
            idle_bucket_ttl: Duration::from_secs(600),
        }
    }
}

/// Admission token settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenConfig {
    /// How long an issued token stays valid.
    ///
    /// Default: 1 hour
    pub ttl: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Purchase lock settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// Maximum hold time if the holder never releases.
    ///
    /// Default: 5 seconds
    pub ttl: Duration,

    /// Acquisition attempts before giving up.
    ///
    /// Default: 3
    pub attempts: u32,

    /// Fixed pause between attempts.
    ///
    /// Default: 100 ms
    pub retry_delay: Duration,
}

impl LockConfig {
    /// Set acquisition attempts and the pause between them.
    #[must_use]
    pub const fn with_retries(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts;
        self.retry_delay = retry_delay;
        self
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5),
            attempts: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Complete configuration for a flash sale engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashSaleConfig {
    /// Rate Gate buckets.
    pub rate_limit: RateLimitConfig,
    /// Admission tokens.
    pub tokens: TokenConfig,
    /// Purchase lock.
    pub lock: LockConfig,
    /// Fast-store key layout.
    pub keys: Keyspace,
    /// Expiry of duplicate-order markers.
    ///
    /// Default: 1 hour
    pub marker_ttl: Duration,
}

impl Default for FlashSaleConfig {
    fn default() -> Self {
        Self {
            rate_limit: RateLimitConfig::default(),
            tokens: TokenConfig::default(),
            lock: LockConfig::default(),
            keys: Keyspace::default(),
            marker_ttl: Duration::from_secs(3600),
        }
    }
}

impl FlashSaleConfig {
    /// Set the Rate Gate configuration.
    #[must_use]
    pub const fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Set the admission token time-to-live.
    #[must_use]
    pub const fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.tokens.ttl = ttl;
        self
    }

    /// Set the purchase lock configuration.
    #[must_use]
    pub const fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    /// Set the duplicate marker time-to-live.
    #[must_use]
    pub const fn with_marker_ttl(mut self, ttl: Duration) -> Self {
        self.marker_ttl = ttl;
        self
    }

    /// Set the fast-store key layout.
    #[must_use]
    pub fn with_keys(mut self, keys: Keyspace) -> Self {
        self.keys = keys;
        self
    }

    /// Reject configurations that would refuse every request or never expire.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::InvalidInput`] naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limit;
        if rl.global_capacity == 0 || rl.per_identity_capacity == 0 {
            return Err(invalid("bucket capacity must be positive"));
        }
        if rl.global_refill_per_sec == 0 || rl.per_identity_refill_per_sec == 0 {
            return Err(invalid("bucket refill rate must be positive"));
        }
        if self.tokens.ttl.is_zero() {
            return Err(invalid("token ttl must be positive"));
        }
        if self.lock.attempts == 0 {
            return Err(invalid("lock attempts must be at least 1"));
        }
        if self.lock.ttl.is_zero() {
            return Err(invalid("lock ttl must be positive"));
        }
        if self.marker_ttl.as_secs() == 0 {
            return Err(invalid("marker ttl must be at least one second"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> FlashSaleError {
    FlashSaleError::InvalidInput(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = FlashSaleConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rate_limit.global_capacity, 10_000);
        assert_eq!(config.rate_limit.per_identity_capacity, 5);
        assert_eq!(config.tokens.ttl, Duration::from_secs(3600));
        assert_eq!(config.lock.attempts, 3);
        assert_eq!(config.lock.retry_delay, Duration::from_millis(100));
        assert_eq!(config.marker_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn builders_override_defaults() {
        let config = FlashSaleConfig::default()
            .with_rate_limit(RateLimitConfig::default().with_per_identity(2, 1))
            .with_lock(LockConfig::default().with_retries(5, Duration::from_millis(10)))
            .with_token_ttl(Duration::from_secs(60));

        assert_eq!(config.rate_limit.per_identity_capacity, 2);
        assert_eq!(config.lock.attempts, 5);
        assert_eq!(config.tokens.ttl, Duration::from_secs(60));
    }

    #[test]
    fn validate_rejects_zero_values() {
        let zero_capacity = FlashSaleConfig::default()
            .with_rate_limit(RateLimitConfig::default().with_global(0, 10));
        assert!(zero_capacity.validate().is_err());

        let zero_attempts = FlashSaleConfig::default()
            .with_lock(LockConfig::default().with_retries(0, Duration::ZERO));
        assert!(zero_attempts.validate().is_err());

        let short_marker = FlashSaleConfig::default().with_marker_ttl(Duration::from_millis(500));
        assert!(short_marker.validate().is_err());
    }
}
