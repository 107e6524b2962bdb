//! # Flash Sale Core
//!
//! Core types, error taxonomy, and configuration shared by every crate of the
//! flash sale admission and inventory subsystem.
//!
//! A flash sale lets a bounded number of buyers compete for a scarce,
//! time-windowed inventory pool. The hard guarantees live in
//! `flash-sale-engine`; this crate only describes the vocabulary:
//!
//! - **Identity**: who is buying
//! - **Item**: what is being sold, and during which [`types::SaleWindow`]
//! - **Admission token**: single-use credential gating a purchase attempt
//! - **Order record**: the durable result of a successful purchase
//! - **Error taxonomy**: every failure kind with a stable code and retry guidance
//!
//! ## Request Flow
//!
//! ```text
//! Rate Gate → issue token → (client) → Duplicate Guard
//!           → consume token + deplete stock (one atomic step)
//!           → Purchase Lock → persist order (compensate on failure)
//! ```
//!
//! All time-dependent decisions read the time through the
//! [`environment::Clock`] trait so tests can pin or advance it.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod keys;
pub mod types;

pub use config::FlashSaleConfig;
pub use error::{FlashSaleError, RateLimitScope, Result, RetryGuidance};
pub use keys::Keyspace;

/// Environment module - Dependency injection traits
///
/// All external sources of nondeterminism are abstracted behind traits and
/// injected into the components that need them.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use flash_sale_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
