//! In-memory store implementations for testing.
//!
//! Both stores are `Clone` and share state between clones, so a test can
//! hand one clone to the service and keep another for assertions and
//! failure injection.

pub mod fast_store;
pub mod record_store;

pub use fast_store::InMemoryFastStore;
pub use record_store::InMemoryRecordStore;
