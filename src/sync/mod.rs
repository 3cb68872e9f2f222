//! Reconciliation between the local store and the server.
//!
//! Two independent flows:
//! - pull: full-refresh snapshot of every cached collection
//! - push: drain the outbox through per-collection handlers, with bounded retries
//!
//! plus a recurring scheduler for push and a listener that drains on reconnect.

mod engine;
mod handlers;
mod scheduler;

pub use engine::{spawn_connectivity_listener, SyncEngine, LAST_SYNC_KEY};
pub use handlers::{quote_row, quotes_handler, PushHandler, PushReceipt};
pub use scheduler::Scheduler;

use crate::store::{Collection, ReplaceStats};

/// Outcomes published by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
  PullCompleted {
    at: i64,
    /// Entity types whose fetch failed this cycle
    failed: Vec<Collection>,
  },
  DrainCompleted {
    pushed: usize,
    failed: usize,
    dead_lettered: usize,
  },
  /// An outbox entry used up its retry budget and needs attention.
  NeedsAttention {
    entry_id: i64,
    collection: Collection,
    error: String,
  },
}

/// Why a sync cycle did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  Offline,
  AlreadyRunning,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
  pub skipped: bool,
  pub cached: Vec<(Collection, ReplaceStats)>,
  pub failed: Vec<(Collection, String)>,
  pub completed_at: Option<i64>,
}

impl PullReport {
  pub fn skipped() -> Self {
    Self {
      skipped: true,
      ..Self::default()
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub skipped: Option<SkipReason>,
  pub attempted: usize,
  /// Entries accepted by the server and removed.
  pub pushed: Vec<i64>,
  /// Entries whose attempt failed this drain.
  pub failed: Vec<i64>,
  /// Subset of `failed` that used up the retry budget on this attempt.
  pub dead_lettered: Vec<i64>,
  /// Entries not attempted because their budget was already used up.
  pub exhausted: Vec<i64>,
  /// Entries held back behind an earlier entry for the same record.
  pub deferred: Vec<i64>,
}

impl DrainReport {
  pub fn skipped(reason: SkipReason) -> Self {
    Self {
      skipped: Some(reason),
      ..Self::default()
    }
  }
}

/// Point-in-time sync health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
  pub online: bool,
  pub last_sync: Option<i64>,
  pub pending: usize,
  pub dead_lettered: usize,
}
