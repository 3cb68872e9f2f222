//! Error taxonomy for the store, outbox and sync engine.
//!
//! Storage errors are surfaced to callers. Network errors are recovered inside
//! the sync engine (retry counters for push, log-and-continue for pull) and
//! only reach the caller through reports.

/// Errors raised by the local-first cache and sync engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  /// The local database cannot be opened, read or written.
  #[error("local storage unavailable: {0}")]
  StorageUnavailable(String),

  /// A network call failed or timed out.
  #[error("network unreachable: {0}")]
  NetworkUnreachable(String),

  /// The server answered with a non-success status.
  #[error("server rejected request ({status}): {body}")]
  Remote { status: u16, body: String },

  /// The server accepted a create but did not say which id it stored it under.
  #[error("server created a record in {0} without returning its id")]
  MissingServerId(String),

  /// An outbox entry has used up its retry budget.
  #[error("outbox entry {id} exhausted its {retries} retries")]
  RetryExhausted { id: i64, retries: u32 },

  /// No push handler is registered for the entry's collection.
  #[error("no push handler registered for {0}")]
  NoPushHandler(String),

  /// A record or payload could not be (de)serialized.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A collection name that is not part of the layout.
  #[error("unknown collection: {0}")]
  UnknownCollection(String),

  /// An index name the collection does not define.
  #[error("collection {collection} has no index named {index}")]
  UnknownIndex { collection: String, index: String },
}

impl SyncError {
  /// True for failures that happened on the way to or at the server.
  pub fn is_network(&self) -> bool {
    matches!(
      self,
      SyncError::NetworkUnreachable(_) | SyncError::Remote { .. } | SyncError::MissingServerId(_)
    )
  }
}

impl From<rusqlite::Error> for SyncError {
  fn from(e: rusqlite::Error) -> Self {
    SyncError::StorageUnavailable(e.to_string())
  }
}

impl From<std::io::Error> for SyncError {
  fn from(e: std::io::Error) -> Self {
    SyncError::StorageUnavailable(e.to_string())
  }
}

impl From<reqwest::Error> for SyncError {
  fn from(e: reqwest::Error) -> Self {
    SyncError::NetworkUnreachable(e.to_string())
  }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
