//! Rate Gate: token buckets in front of every other component.
//!
//! One global bucket plus one bucket per identity, created on first sight.
//! Each bucket has its own mutex, and the identity buckets live in a
//! [`DashMap`], so two identities never contend on the same lock.
//!
//! ```text
//! request ──► global bucket ──► identity bucket ──► admitted
//!                  │                   │
//!                  └── RateLimited ◄───┘
//! ```
//!
//! Buckets count whole tokens. Refill adds `floor(elapsed * rate)` tokens
//! and moves the refill timestamp only by the time those tokens account
//! for, so a caller polling faster than `1 / rate` still accrues refill.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use flash_sale_core::config::RateLimitConfig;
use flash_sale_core::environment::Clock;
use flash_sale_core::types::Identity;
use flash_sale_core::{FlashSaleError, RateLimitScope, Result};
use flash_sale_runtime::metrics::RateGateMetrics;
use std::sync::{Arc, Mutex, PoisonError};

const NANOS_PER_SEC: i128 = 1_000_000_000;

#[derive(Debug)]
struct BucketState {
    tokens: u64,
    last_refill: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Token bucket with capacity `C` and refill rate `R` tokens per second.
///
/// Starts full.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    refill_per_sec: u64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    #[must_use]
    pub const fn new(capacity: u64, refill_per_sec: u64, now: DateTime<Utc>) -> Self {
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
                last_seen: now,
            }),
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> bool {
        // A poisoned bucket still holds consistent integers.
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state, now);
        state.last_seen = now;
        if state.tokens > 0 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Tokens currently available, after refill.
    #[must_use]
    pub fn available(&self, now: DateTime<Utc>) -> u64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state, now);
        state.tokens
    }

    fn last_seen(&self) -> DateTime<Utc> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_seen
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn refill(&self, state: &mut BucketState, now: DateTime<Utc>) {
        let Some(elapsed) = (now - state.last_refill).num_nanoseconds() else {
            // More than ~292 years: the bucket is full either way.
            state.tokens = self.capacity;
            state.last_refill = now;
            return;
        };
        if elapsed <= 0 || self.refill_per_sec == 0 {
            return;
        }

        let rate = i128::from(self.refill_per_sec);
        let earned = i128::from(elapsed) * rate / NANOS_PER_SEC;
        if earned == 0 {
            return;
        }

        let missing = self.capacity.saturating_sub(state.tokens);
        if earned >= i128::from(missing) {
            state.tokens = self.capacity;
            state.last_refill = now;
        } else {
            state.tokens += earned as u64;
            let spent_nanos = earned * NANOS_PER_SEC / rate;
            state.last_refill += Duration::nanoseconds(spent_nanos as i64);
        }
    }
}

/// Global plus per-identity request limiter.
///
/// # Example
///
/// ```
/// use flash_sale_core::config::RateLimitConfig;
/// use flash_sale_core::types::Identity;
/// use flash_sale_engine::rate_gate::RateGate;
/// use flash_sale_testing::test_clock;
/// use std::sync::Arc;
///
/// let config = RateLimitConfig::default().with_per_identity(2, 1);
/// let gate = RateGate::new(&config, Arc::new(test_clock()));
/// let alice = Identity::new("alice");
///
/// assert!(gate.allow(Some(&alice)));
/// assert!(gate.allow(Some(&alice)));
/// assert!(!gate.allow(Some(&alice)));
/// assert!(gate.allow(Some(&Identity::new("bob"))));
/// ```
pub struct RateGate {
    global: TokenBucket,
    identities: DashMap<Identity, TokenBucket>,
    per_identity_capacity: u64,
    per_identity_refill_per_sec: u64,
    idle_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl RateGate {
    /// Create a gate with a full global bucket.
    #[must_use]
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            global: TokenBucket::new(config.global_capacity, config.global_refill_per_sec, now),
            identities: DashMap::new(),
            per_identity_capacity: config.per_identity_capacity,
            per_identity_refill_per_sec: config.per_identity_refill_per_sec,
            idle_ttl: Duration::from_std(config.idle_bucket_ttl).unwrap_or(Duration::MAX),
            clock,
        }
    }

    /// Non-blocking admission decision.
    pub fn allow(&self, identity: Option<&Identity>) -> bool {
        self.admit(identity).is_none()
    }

    /// Admission decision as a `Result`.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::RateLimited`] naming the bucket that refused.
    pub fn check(&self, identity: Option<&Identity>) -> Result<()> {
        match self.admit(identity) {
            None => Ok(()),
            Some(scope) => Err(FlashSaleError::RateLimited { scope }),
        }
    }

    fn admit(&self, identity: Option<&Identity>) -> Option<RateLimitScope> {
        let now = self.clock.now();

        if !self.global.try_acquire(now) {
            RateGateMetrics::record_denied("global");
            tracing::warn!("Request refused by global rate limit");
            return Some(RateLimitScope::Global);
        }

        let identity = identity?;

        // Read lock on the shard for known identities; write lock only on first sight.
        let known = self.identities.get(identity).map(|bucket| bucket.try_acquire(now));
        let allowed = match known {
            Some(allowed) => allowed,
            None => self
                .identities
                .entry(identity.clone())
                .or_insert_with(|| {
                    TokenBucket::new(
                        self.per_identity_capacity,
                        self.per_identity_refill_per_sec,
                        now,
                    )
                })
                .try_acquire(now),
        };

        if allowed {
            None
        } else {
            RateGateMetrics::record_denied("identity");
            tracing::warn!(identity = %identity, "Request refused by per-identity rate limit");
            Some(RateLimitScope::Identity)
        }
    }

    /// Drop identity buckets not touched within the idle TTL.
    ///
    /// Returns the number of buckets removed. An evicted identity starts
    /// with a full bucket next time, which is no more than it would have
    /// refilled to while idle.
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let before = self.identities.len();
        self.identities
            .retain(|_, bucket| now - bucket.last_seen() < self.idle_ttl);
        let evicted = before.saturating_sub(self.identities.len());
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.identities.len(), "Evicted idle rate buckets");
        }
        evicted
    }

    /// Number of identity buckets currently tracked.
    #[must_use]
    pub fn tracked_identities(&self) -> usize {
        self.identities.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flash_sale_testing::properties::identity;
    use flash_sale_testing::{ManualClock, test_epoch};
    use proptest::prelude::*;

    fn gate(global: (u64, u64), per_identity: (u64, u64)) -> (RateGate, ManualClock) {
        let clock = ManualClock::starting_at_test_epoch();
        let config = RateLimitConfig::default()
            .with_global(global.0, global.1)
            .with_per_identity(per_identity.0, per_identity.1);
        (RateGate::new(&config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn bucket_refills_one_token_per_interval() {
        let now = test_epoch();
        let bucket = TokenBucket::new(2, 4, now);
        assert!(bucket.try_acquire(now));
        assert!(bucket.try_acquire(now));
        assert!(!bucket.try_acquire(now));

        // 250ms at 4/s is one token.
        let later = now + Duration::milliseconds(250);
        assert!(bucket.try_acquire(later));
        assert!(!bucket.try_acquire(later));
    }

    #[test]
    fn frequent_polling_does_not_starve_refill() {
        let start = test_epoch();
        let bucket = TokenBucket::new(1, 1, start);
        assert!(bucket.try_acquire(start));

        // Poll every 100ms; the token earned after one second must appear.
        let mut granted = 0;
        for step in 1..=10 {
            if bucket.try_acquire(start + Duration::milliseconds(100 * step)) {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        let now = test_epoch();
        let bucket = TokenBucket::new(3, 100, now);
        assert!(bucket.try_acquire(now));
        assert_eq!(bucket.available(now + Duration::hours(1)), 3);
    }

    #[test]
    fn global_limit_applies_without_identity() {
        let (gate, _) = gate((1, 1), (5, 5));
        assert!(gate.check(None).is_ok());
        assert_eq!(
            gate.check(None),
            Err(FlashSaleError::RateLimited { scope: RateLimitScope::Global })
        );
    }

    #[test]
    fn identity_limit_is_partitioned() {
        let (gate, _) = gate((100, 100), (1, 1));
        let alice = Identity::new("alice");
        let bob = Identity::new("bob");

        assert!(gate.allow(Some(&alice)));
        assert_eq!(
            gate.check(Some(&alice)),
            Err(FlashSaleError::RateLimited { scope: RateLimitScope::Identity })
        );
        assert!(gate.allow(Some(&bob)));
        assert_eq!(gate.tracked_identities(), 2);
    }

    #[test]
    fn idle_buckets_are_evicted() {
        let (gate, clock) = gate((100, 100), (1, 1));
        gate.allow(Some(&Identity::new("alice")));
        clock.advance(Duration::minutes(5));
        gate.allow(Some(&Identity::new("bob")));

        clock.advance(Duration::minutes(6));
        assert_eq!(gate.evict_idle(), 1);
        assert_eq!(gate.tracked_identities(), 1);
    }

    proptest! {
        #[test]
        fn burst_allows_exactly_capacity_then_one_per_interval(capacity in 1u64..50, rate in 1u64..1000) {
            let start = test_epoch();
            let bucket = TokenBucket::new(capacity, rate, start);

            for _ in 0..capacity {
                prop_assert!(bucket.try_acquire(start));
            }
            prop_assert!(!bucket.try_acquire(start));

            // Smallest whole-nanosecond wait that earns one token.
            let interval = (1_000_000_000 + rate as i64 - 1) / rate as i64;
            let later = start + Duration::nanoseconds(interval);
            prop_assert!(bucket.try_acquire(later));
            prop_assert!(!bucket.try_acquire(later));
        }

        #[test]
        fn identity_budget_is_never_shared(
            first in identity(),
            second in identity(),
            capacity in 1u64..10,
        ) {
            prop_assume!(first != second);
            let (gate, _) = gate((1_000, 1), (capacity, 1));

            for _ in 0..capacity {
                prop_assert!(gate.allow(Some(&first)));
            }
            prop_assert!(!gate.allow(Some(&first)));
            prop_assert!(gate.allow(Some(&second)));
        }
    }
}
