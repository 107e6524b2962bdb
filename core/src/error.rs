//! Error types for flash sale operations.

use crate::types::{ItemId, OrderNo, OrderStatus, WindowPhase};
use std::fmt;
use thiserror::Error;

/// Result type alias for flash sale operations.
pub type Result<T> = std::result::Result<T, FlashSaleError>;

/// Which bucket refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    /// The service-wide bucket.
    Global,
    /// The requester's own bucket.
    Identity,
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Identity => f.write_str("identity"),
        }
    }
}

/// What a caller should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryGuidance {
    /// Retry the same request after a backoff.
    RetryAfterBackoff,
    /// Obtain a fresh admission token, then retry.
    ReissueToken,
    /// Retrying cannot succeed.
    NotRetryable,
    /// Inventory already moved; an external reconciliation decides.
    Reconcile,
}

/// Complete error taxonomy for the flash sale subsystem.
///
/// Every variant maps to a stable [`code`](Self::code) for API consumers.
/// No variant is fatal to the process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlashSaleError {
    // ═══════════════════════════════════════════════════════════
    // Admission
    // ═══════════════════════════════════════════════════════════

    /// Caller exceeded its allotted request rate. No side effects.
    #[error("Too many requests ({scope} limit)")]
    RateLimited {
        /// Bucket that refused the request
        scope: RateLimitScope,
    },

    /// Current time lies outside the item's sale window.
    #[error("Sale window is {phase}")]
    SaleWindowClosed {
        /// Whether the sale has not started or has ended
        phase: WindowPhase,
    },

    /// No stock left, either at issue time (advisory) or at depletion time.
    #[error("Out of stock")]
    OutOfStock,

    /// Token unknown, already consumed, bound to another purchase, or expired.
    #[error("Invalid or expired token")]
    InvalidOrExpiredToken,

    /// Identity already holds a non-cancelled order for the item.
    #[error("Identity already has an order for this item")]
    DuplicateOrder,

    // ═══════════════════════════════════════════════════════════
    // Finalization
    // ═══════════════════════════════════════════════════════════

    /// The per-order lock could not be acquired after bounded retries.
    ///
    /// Inventory was already decremented and is not compensated here.
    #[error("Failed to acquire lock for order {order_no}")]
    LockAcquisitionFailure {
        /// Order whose finalize step could not run
        order_no: OrderNo,
    },

    /// Durable write failed after depletion; stock was restored.
    #[error("Failed to persist order {order_no}: {reason}")]
    PersistenceFailure {
        /// Order that was not persisted
        order_no: OrderNo,
        /// Underlying store failure
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Lookups
    // ═══════════════════════════════════════════════════════════

    /// Requested item does not exist.
    #[error("Item {0} not found")]
    ItemNotFound(ItemId),

    /// Requested order does not exist.
    #[error("Order {0} not found")]
    OrderNotFound(OrderNo),

    /// Status change not allowed by the order lifecycle.
    #[error("Cannot move order from {from} to {to}")]
    InvalidStatusTransition {
        /// Current status
        from: OrderStatus,
        /// Requested status
        to: OrderStatus,
    },

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Fast store operation failed.
    #[error("Fast store error: {0}")]
    FastStore(String),

    /// Durable record store operation failed.
    #[error("Record store error: {0}")]
    RecordStore(String),

    /// Request or configuration value rejected.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl FlashSaleError {
    /// Stable machine-readable error code.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flash_sale_core::FlashSaleError;
    /// assert_eq!(FlashSaleError::OutOfStock.code(), "OUT_OF_STOCK");
    /// ```
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::SaleWindowClosed { .. } => "SALE_WINDOW_CLOSED",
            Self::OutOfStock => "OUT_OF_STOCK",
            Self::InvalidOrExpiredToken => "INVALID_TOKEN",
            Self::DuplicateOrder => "DUPLICATE_ORDER",
            Self::LockAcquisitionFailure { .. } => "LOCK_UNAVAILABLE",
            Self::PersistenceFailure { .. } => "PERSISTENCE_FAILED",
            Self::ItemNotFound(_) => "ITEM_NOT_FOUND",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            Self::FastStore(_) => "FAST_STORE_UNAVAILABLE",
            Self::RecordStore(_) => "RECORD_STORE_UNAVAILABLE",
            Self::InvalidInput(_) => "INVALID_INPUT",
        }
    }

    /// Retry guidance documented for API consumers.
    #[must_use]
    pub const fn retry_guidance(&self) -> RetryGuidance {
        match self {
            Self::RateLimited { .. } | Self::FastStore(_) | Self::RecordStore(_) => {
                RetryGuidance::RetryAfterBackoff
            }
            Self::InvalidOrExpiredToken | Self::PersistenceFailure { .. } => {
                RetryGuidance::ReissueToken
            }
            Self::LockAcquisitionFailure { .. } => RetryGuidance::Reconcile,
            Self::SaleWindowClosed { .. }
            | Self::OutOfStock
            | Self::DuplicateOrder
            | Self::ItemNotFound(_)
            | Self::OrderNotFound(_)
            | Self::InvalidStatusTransition { .. }
            | Self::InvalidInput(_) => RetryGuidance::NotRetryable,
        }
    }

    /// Returns `true` if the same caller may eventually succeed by retrying.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flash_sale_core::{FlashSaleError, RateLimitScope};
    /// assert!(FlashSaleError::RateLimited { scope: RateLimitScope::Global }.is_retryable());
    /// assert!(!FlashSaleError::OutOfStock.is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.retry_guidance(),
            RetryGuidance::RetryAfterBackoff | RetryGuidance::ReissueToken
        )
    }

    /// HTTP status an API layer should answer with.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::RateLimited { .. } => 429,
            Self::SaleWindowClosed { .. } => 403,
            Self::OutOfStock | Self::InvalidOrExpiredToken => 410,
            Self::DuplicateOrder | Self::InvalidStatusTransition { .. } => 409,
            Self::ItemNotFound(_) | Self::OrderNotFound(_) => 404,
            Self::LockAcquisitionFailure { .. } | Self::FastStore(_) | Self::RecordStore(_) => 503,
            Self::PersistenceFailure { .. } => 500,
            Self::InvalidInput(_) => 400,
        }
    }

    /// Returns `true` for failures an operator must see.
    ///
    /// A persistence failure after depletion means the durable store is
    /// unhealthy while the inventory counter has already moved.
    #[must_use]
    pub const fn needs_operator_attention(&self) -> bool {
        matches!(
            self,
            Self::PersistenceFailure { .. } | Self::LockAcquisitionFailure { .. }
        )
    }
}
