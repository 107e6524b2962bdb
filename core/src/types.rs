//! Domain types for the flash sale subsystem.
//!
//! Identifiers are newtypes so an item id can never be passed where an order
//! number is expected. Prices are integer minor units (cents).

use crate::error::{FlashSaleError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Requester identity.
///
/// Usually a user id; callers without an authenticated user fall back to the
/// client address so per-requester rate limiting still applies.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    /// Create an identity from any string-like value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Catalog item identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(u64);

impl ItemId {
    /// Wrap a raw item id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique order number (`ORD{unix_seconds}{8 hex chars}`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderNo(String);

impl OrderNo {
    /// Wrap an existing order number.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw order number.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque admission token handed to a client by `issue_token`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdmissionToken(String);

impl AdmissionToken {
    /// Wrap a token value received from a client.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw token value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdmissionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Sale Window
// ============================================================================

/// Where a point in time falls relative to a [`SaleWindow`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowPhase {
    /// Before `start`.
    NotStarted,
    /// Inside `[start, end)`.
    Open,
    /// At or after `end`.
    Ended,
}

impl fmt::Display for WindowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => f.write_str("not started"),
            Self::Open => f.write_str("open"),
            Self::Ended => f.write_str("ended"),
        }
    }
}

/// Half-open interval `[start, end)` during which purchases are permitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleWindow {
    /// First instant at which the sale is open.
    pub start: DateTime<Utc>,
    /// First instant at which the sale is closed again.
    pub end: DateTime<Utc>,
}

impl SaleWindow {
    /// Create a sale window.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::InvalidInput`] if `end` is not after `start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(FlashSaleError::InvalidInput(format!(
                "sale window end ({end}) must be after start ({start})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Classify `now` against the window.
    #[must_use]
    pub fn phase(&self, now: DateTime<Utc>) -> WindowPhase {
        if now < self.start {
            WindowPhase::NotStarted
        } else if now < self.end {
            WindowPhase::Open
        } else {
            WindowPhase::Ended
        }
    }

    /// `true` when `now` lies in `[start, end)`.
    #[must_use]
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.phase(now) == WindowPhase::Open
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// A catalog entry offered in a flash sale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Item identifier assigned by the record store.
    pub id: ItemId,
    /// Display name, snapshotted into every order.
    pub name: String,
    /// Sale price in minor units.
    pub price_cents: i64,
    /// Regular stock held outside the sale.
    pub stock: i64,
    /// Units preheated into the fast store for the sale.
    pub sale_stock: i64,
    /// When the sale is open.
    pub window: SaleWindow,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Payload for creating a catalog entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewItem {
    /// Display name.
    pub name: String,
    /// Sale price in minor units.
    pub price_cents: i64,
    /// Regular stock held outside the sale.
    pub stock: i64,
    /// Units to preheat into the fast store.
    pub sale_stock: i64,
    /// When the sale is open.
    pub window: SaleWindow,
}

impl NewItem {
    /// Check the payload before it reaches any store.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::InvalidInput`] for an empty name or negative
    /// amounts.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FlashSaleError::InvalidInput("item name must not be empty".into()));
        }
        if self.price_cents < 0 {
            return Err(FlashSaleError::InvalidInput("price must not be negative".into()));
        }
        if self.stock < 0 || self.sale_stock < 0 {
            return Err(FlashSaleError::InvalidInput("stock must not be negative".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Orders
// ============================================================================

/// Lifecycle of an order.
///
/// ```text
/// Pending ──► Paid ──► Completed
///    │          │
///    │          └────► Cancelled
///    ├───────────────► Completed
///    └───────────────► Cancelled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Created by a successful purchase, awaiting payment.
    Pending,
    /// Paid by the buyer.
    Paid,
    /// Cancelled; does not count as an existing order.
    Cancelled,
    /// Fulfilled.
    Completed,
}

impl OrderStatus {
    /// Convert status to its storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Parse status from its storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`FlashSaleError::InvalidInput`] if the string is not a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            other => Err(FlashSaleError::InvalidInput(format!("unknown order status: {other}"))),
        }
    }

    /// Whether an order in this status may move to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Paid | Self::Cancelled | Self::Completed)
                | (Self::Paid, Self::Completed | Self::Cancelled)
        )
    }

    /// `Cancelled` and `Completed` accept no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable order created exactly once per successful depletion and finalize.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Row id assigned by the record store (0 until persisted).
    pub id: u64,
    /// Unique order number.
    pub order_no: OrderNo,
    /// Buyer.
    pub identity: Identity,
    /// Purchased item.
    pub item_id: ItemId,
    /// Item name at purchase time.
    pub item_name: String,
    /// Price at purchase time, in minor units.
    pub price_cents: i64,
    /// Current status.
    pub status: OrderStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
    /// Build a pending order from the item snapshot.
    #[must_use]
    pub fn pending(order_no: OrderNo, identity: Identity, item: &Item, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            order_no,
            identity,
            item_id: item.id,
            item_name: item.name.clone(),
            price_cents: item.price_cents,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
