//! Production store implementations.
//!
//! - **Fast store** (Redis) - counters, tokens, markers and locks with TTL
//! - **Record store** (PostgreSQL) - items and orders

#[cfg(feature = "postgres")]
pub mod postgres;
pub mod redis_fast_store;

// Re-exports
#[cfg(feature = "postgres")]
pub use postgres::PostgresRecordStore;
pub use redis_fast_store::RedisFastStore;
