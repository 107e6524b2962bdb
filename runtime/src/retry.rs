//! Bounded retry for transient fast-store and record-store failures.
//!
//! Two call sites need it: the purchase lock retries acquisition a few times
//! with a fixed pause, and stock compensation retries a failed restock with
//! a growing backoff before giving up and alerting.
//!
//! # Example
//!
//! ```rust
//! use flash_sale_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::fixed(3, Duration::from_millis(100));
//!
//! let value = retry_with_backoff(&policy, "read_stock", || async {
//!     Ok::<_, String>(42)
//! })
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How the pause between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same pause before every retry.
    Fixed(Duration),
    /// `initial * multiplier^retry`, capped at `max`.
    Exponential {
        /// Pause before the first retry
        initial: Duration,
        /// Upper bound for any pause
        max: Duration,
        /// Growth factor per retry
        multiplier: f64,
    },
}

/// Retry policy: total attempt budget plus a backoff shape.
///
/// # Default Values
///
/// - `max_attempts`: 4 (one call plus three retries)
/// - `backoff`: exponential from 50ms, doubling, capped at 2 seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of calls, including the first one. Zero behaves like one.
    pub max_attempts: u32,
    /// Pause between calls
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(4, Duration::from_millis(50), Duration::from_secs(2))
    }
}

impl RetryPolicy {
    /// Fixed pause between a bounded number of attempts.
    #[must_use]
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Doubling pause between a bounded number of attempts.
    #[must_use]
    pub const fn exponential(max_attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                initial,
                max,
                multiplier: 2.0,
            },
        }
    }

    /// Pause to wait after the `retry`-th failed attempt (0-based).
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential {
                initial,
                max,
                multiplier,
            } => {
                let exponent = retry.min(32) as i32;
                let delay_ms = initial.as_millis() as f64 * multiplier.powi(exponent);
                if delay_ms >= max.as_millis() as f64 {
                    max
                } else {
                    Duration::from_millis(delay_ms as u64)
                }
            }
        }
    }

    const fn budget(&self) -> u32 {
        if self.max_attempts == 0 {
            1
        } else {
            self.max_attempts
        }
    }
}

/// Retry an async operation on every error until the attempt budget runs out.
///
/// Returns the last error once all attempts failed.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: &'static str,
    call: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_predicate(policy, operation, call, |_| true).await
}

/// Retry an async operation while `is_retryable` accepts the error.
///
/// A rejected error is returned immediately without sleeping.
///
/// # Errors
///
/// Returns the first non-retryable error, or the error of the final attempt.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let budget = policy.budget();
    let mut attempt: u32 = 1;

    loop {
        match call().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !is_retryable(&err) => return Err(err),
            Err(err) if attempt >= budget => {
                tracing::warn!(operation, attempt, error = %err, "Retry budget exhausted");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for_attempt(attempt - 1);
                tracing::debug!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Attempt failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
