//! Local-first cache and sync engine for wrap shop field operations.
//!
//! Records are cached in a local SQLite store and stay readable offline.
//! Local writes land in the store immediately and in a durable outbox that
//! the sync engine drains to the server once connectivity returns; pulls
//! refresh the cache from the server's authoritative snapshot.

pub mod config;
pub mod context;
pub mod error;
pub mod loader;
pub mod logging;
pub mod model;
pub mod network;
pub mod outbox;
pub mod query;
pub mod remote;
pub mod store;
pub mod sync;
pub mod writer;

pub use context::SyncContext;
pub use error::{Result, SyncError};

/// Current wall-clock time in epoch millis.
pub fn now_millis() -> i64 {
  chrono::Utc::now().timestamp_millis()
}
