//! # Flash Sale Testing
//!
//! Testing utilities for the flash sale subsystem.
//!
//! This crate provides:
//! - Deterministic [`Clock`] implementations (`FixedClock`, `ManualClock`)
//! - Builders for items whose sale window sits at a known offset from the clock
//! - proptest strategies for domain types
//!
//! ## Example
//!
//! ```
//! use flash_sale_testing::{ManualClock, helpers};
//! use flash_sale_core::environment::Clock;
//! use chrono::Duration;
//!
//! let clock = ManualClock::starting_at_test_epoch();
//! let item = helpers::open_item("Phone", 10, &clock);
//! assert!(item.window.contains(clock.now()));
//!
//! clock.advance(Duration::hours(2));
//! assert!(!item.window.contains(clock.now()));
//! ```

use chrono::{DateTime, Utc};
use flash_sale_core::environment::Clock;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use flash_sale_testing::mocks::FixedClock;
    /// use flash_sale_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test moves it.
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the component under test.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock stopped at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Create a clock stopped at [`test_epoch`].
        #[must_use]
        pub fn starting_at_test_epoch() -> Self {
            Self::new(test_epoch())
        }

        /// Move the clock forward (or backward, for a negative duration).
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += by;
        }

        /// Jump to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// 2025-01-01 00:00:00 UTC, the instant every test clock starts from.
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }
}

/// Builders for common sale scenarios.
pub mod helpers {
    use super::Clock;
    use chrono::Duration;
    use flash_sale_core::types::{NewItem, SaleWindow};

    /// Window opened an hour ago that closes in an hour.
    #[must_use]
    pub fn open_window(clock: &dyn Clock) -> SaleWindow {
        let now = clock.now();
        SaleWindow {
            start: now - Duration::hours(1),
            end: now + Duration::hours(1),
        }
    }

    /// Window that opens `in_future` from now and stays open for an hour.
    #[must_use]
    pub fn upcoming_window(clock: &dyn Clock, in_future: Duration) -> SaleWindow {
        let start = clock.now() + in_future;
        SaleWindow {
            start,
            end: start + Duration::hours(1),
        }
    }

    /// Item on sale right now with `sale_stock` units.
    #[must_use]
    pub fn open_item(name: &str, sale_stock: i64, clock: &dyn Clock) -> NewItem {
        NewItem {
            name: name.to_string(),
            price_cents: 19_900,
            stock: sale_stock,
            sale_stock,
            window: open_window(clock),
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use flash_sale_core::types::Identity;
    use proptest::prelude::*;

    /// Identities shaped like user ids or IPv4 client addresses.
    pub fn identity() -> impl Strategy<Value = Identity> {
        prop_oneof![
            "user-[a-z0-9]{1,12}".prop_map(Identity::new),
            (1u8..=254, 0u8..=255, 0u8..=255, 1u8..=254)
                .prop_map(|(a, b, c, d)| Identity::new(format!("{a}.{b}.{c}.{d}"))),
        ]
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock, test_epoch};
