//! # Flash Sale Runtime
//!
//! Operational plumbing shared by the flash sale engine and its binaries.
//!
//! ## Components
//!
//! - **Retry**: bounded retry with fixed or exponential backoff, used for
//!   purchase lock acquisition and stock compensation
//! - **Metrics**: Prometheus recorder plus per-component recorders
//!   (`RateGateMetrics`, `AdmissionMetrics`, `PurchaseMetrics`, `LockMetrics`)

/// Bounded retry with fixed or exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

pub use retry::{Backoff, RetryPolicy, retry_with_backoff, retry_with_predicate};
