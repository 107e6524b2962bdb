//! # Flash Sale Engine
//!
//! Admission and inventory control for flash sales: a bounded number of
//! buyers compete for scarce, time-windowed stock without overselling and
//! without any buyer getting two orders.
//!
//! ## Components
//!
//! - [`rate_gate`]: global and per-identity token buckets
//! - [`admission`]: single-use admission tokens and stock preheating
//! - [`inventory`]: atomic check-and-decrement plus compensation
//! - [`lock`] and [`finalizer`]: per-order lock around the durable write
//! - [`guard`]: duplicate-purchase check
//! - [`service`]: the facade an HTTP layer calls
//!
//! ## Stores
//!
//! All shared state lives behind two traits in [`providers`]:
//!
//! | Trait | Production | Tests |
//! |-------|------------|-------|
//! | [`providers::FastStore`] | [`stores::RedisFastStore`] | `mocks::InMemoryFastStore` |
//! | [`providers::RecordStore`] | `stores::PostgresRecordStore` (feature `postgres`) | `mocks::InMemoryRecordStore` |
//!
//! ## Guarantees
//!
//! - For stock `S` and `N >= S` concurrent purchases, exactly `S` succeed
//! - A token is consumed in the same atomic step that takes the stock
//! - At most one non-cancelled order per identity and item
//! - A failed durable write gives its unit of stock back

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod admission;
pub mod app_config;
pub mod finalizer;
pub mod guard;
pub mod inventory;
pub mod lock;
pub mod order_no;
pub mod providers;
pub mod rate_gate;
pub mod service;
pub mod stores;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

pub use admission::TokenManager;
pub use app_config::AppConfig;
pub use finalizer::Finalizer;
pub use guard::DuplicateGuard;
pub use inventory::{InventoryEngine, Reservation};
pub use lock::PurchaseLock;
pub use rate_gate::{RateGate, TokenBucket};
pub use service::FlashSaleService;
