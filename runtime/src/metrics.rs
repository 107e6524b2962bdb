//! Prometheus metrics for the flash sale subsystem.
//!
//! Recorders are zero-sized types with associated functions so call sites
//! read as `PurchaseMetrics::record_outcome("success")`. Recording before a
//! recorder is installed is a no-op, which keeps unit tests free of setup.
//!
//! # Example
//!
//! ```rust,no_run
//! use flash_sale_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder with a render handle.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a metrics server for `addr`.
    ///
    /// The address is reported in logs; serving `/metrics` over HTTP is the
    /// embedding application's concern.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder that is already installed is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Rate Gate
    describe_counter!(
        "flash_sale_rate_limited_total",
        "Requests refused by the rate gate, by scope (global, identity)"
    );

    // Admission
    describe_counter!(
        "flash_sale_tokens_issued_total",
        "Admission tokens issued"
    );
    describe_counter!(
        "flash_sale_token_rejections_total",
        "Token requests refused, by reason"
    );

    // Purchase
    describe_counter!(
        "flash_sale_purchases_total",
        "Purchase attempts, by outcome"
    );
    describe_histogram!(
        "flash_sale_purchase_duration_seconds",
        "Time from purchase request to outcome"
    );
    describe_counter!(
        "flash_sale_compensations_total",
        "Stock units restored after a failed order write"
    );
    describe_counter!(
        "flash_sale_compensation_failures_total",
        "Compensations that could not restore stock"
    );

    // Lock
    describe_counter!(
        "flash_sale_lock_acquire_attempts_total",
        "Purchase lock acquisition attempts"
    );
    describe_counter!(
        "flash_sale_lock_acquire_failures_total",
        "Purchase locks not acquired after all retries"
    );
}

/// Rate gate metrics recorder.
pub struct RateGateMetrics;

impl RateGateMetrics {
    /// Record a refused request.
    pub fn record_denied(scope: &'static str) {
        counter!("flash_sale_rate_limited_total", "scope" => scope).increment(1);
    }
}

/// Admission token metrics recorder.
pub struct AdmissionMetrics;

impl AdmissionMetrics {
    /// Record an issued token.
    pub fn record_issued() {
        counter!("flash_sale_tokens_issued_total").increment(1);
    }

    /// Record a refused token request.
    pub fn record_rejected(reason: &'static str) {
        counter!("flash_sale_token_rejections_total", "reason" => reason).increment(1);
    }
}

/// Purchase metrics recorder.
pub struct PurchaseMetrics;

impl PurchaseMetrics {
    /// Record the outcome and latency of one purchase call.
    pub fn record_outcome(outcome: &'static str, duration: Duration) {
        counter!("flash_sale_purchases_total", "outcome" => outcome).increment(1);
        histogram!("flash_sale_purchase_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a restored stock unit.
    pub fn record_compensation() {
        counter!("flash_sale_compensations_total").increment(1);
    }

    /// Record a compensation that gave up.
    pub fn record_compensation_failure() {
        counter!("flash_sale_compensation_failures_total").increment(1);
    }
}

/// Purchase lock metrics recorder.
pub struct LockMetrics;

impl LockMetrics {
    /// Record one acquisition attempt.
    pub fn record_attempt() {
        counter!("flash_sale_lock_acquire_attempts_total").increment(1);
    }

    /// Record a lock that could not be acquired.
    pub fn record_failure() {
        counter!("flash_sale_lock_acquire_failures_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn server_starts_without_handle() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn recorders_render_flash_sale_metrics() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        RateGateMetrics::record_denied("identity");
        AdmissionMetrics::record_issued();
        PurchaseMetrics::record_outcome("success", Duration::from_millis(3));
        LockMetrics::record_attempt();

        // Another test may have installed the recorder first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("flash_sale_rate_limited_total"));
            assert!(rendered.contains("flash_sale_tokens_issued_total"));
            assert!(rendered.contains("flash_sale_purchases_total"));
            assert!(rendered.contains("flash_sale_lock_acquire_attempts_total"));
        }
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        PurchaseMetrics::record_compensation();
        PurchaseMetrics::record_compensation_failure();
        LockMetrics::record_failure();
        AdmissionMetrics::record_rejected("out_of_stock");
    }
}
