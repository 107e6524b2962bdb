//! External collaborators.
//!
//! The engine depends on two stores and nothing else:
//!
//! ```text
//! ┌───────────────────┐        ┌────────────────────┐
//! │ FastStore         │        │ RecordStore        │
//! │ (Redis)           │        │ (PostgreSQL)       │
//! │ - stock counters  │        │ - items            │
//! │ - admission tokens│        │ - orders           │
//! │ - dup. markers    │        │                    │
//! │ - purchase locks  │        │                    │
//! └───────────────────┘        └────────────────────┘
//! ```
//!
//! Production wiring uses `stores::RedisFastStore` and
//! `stores::PostgresRecordStore`; tests use the in-memory versions in
//! `mocks`.

pub mod fast_store;
pub mod record_store;

pub use fast_store::{
    AtomicScript, DEPLETE_DUPLICATE, DEPLETE_INVALID_TOKEN, DEPLETE_OUT_OF_STOCK,
    DEPLETE_RESERVED, FastStore, ScriptReply,
};
pub use record_store::RecordStore;
