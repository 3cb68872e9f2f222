//! Optimistic local writes.
//!
//! Every write updates the local copy and appends the matching outbox entry
//! in one transaction, so readers see their own writes immediately and a
//! pending record always has an entry waiting to be pushed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::Result;
use crate::model::{is_local_id, CachedQuote, Record, LOCAL_ID_PREFIX};
use crate::now_millis;
use crate::outbox::{self, Action};
use crate::store::{self, Store};

static LOCAL_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a key for a record created while its server id is unknown.
pub fn new_local_id() -> String {
  let seq = LOCAL_SEQ.fetch_add(1, Ordering::Relaxed);
  let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();

  let mut hasher = Sha256::new();
  hasher.update(nanos.to_le_bytes());
  hasher.update(seq.to_le_bytes());
  hasher.update(std::process::id().to_le_bytes());
  let digest = hex::encode(hasher.finalize());

  format!("{}{}", LOCAL_ID_PREFIX, &digest[..16])
}

#[derive(Clone)]
pub struct LocalWriter {
  store: Arc<Store>,
}

impl LocalWriter {
  pub fn new(store: Arc<Store>) -> Self {
    Self { store }
  }

  /// Write a record locally and queue the mutation. Returns the outbox id.
  ///
  /// `Delete` removes the local copy; the payload still carries the record
  /// so the server handler knows what to delete.
  pub fn record_mutation<T: Record>(&self, action: Action, record: &T) -> Result<i64> {
    let key = record.key();
    let payload = serde_json::to_value(record)?;
    let now = now_millis();

    self.store.with_transaction(|tx| {
      match action {
        Action::Delete => {
          store::delete_record(tx, T::COLLECTION, &key)?;
        }
        Action::Create | Action::Update => {
          store::write_record(tx, record)?;
        }
      }
      outbox::insert_entry(tx, T::COLLECTION, action, &key, &payload, now)
    })
  }

  /// Save a quote as a pending local write.
  ///
  /// Quotes without an id get a local one and are queued as creates; quotes
  /// with a local id that is not stored yet are creates too. Everything else
  /// is an update.
  pub fn save_quote(&self, mut quote: CachedQuote) -> Result<CachedQuote> {
    let now = now_millis();
    let action = if quote.id.is_empty() {
      quote.id = new_local_id();
      quote.created_at = now;
      Action::Create
    } else if is_local_id(&quote.id) && self.store.get::<CachedQuote>(&quote.id)?.is_none() {
      Action::Create
    } else {
      Action::Update
    };

    quote.updated_at = now;
    quote.pending_sync = true;

    let entry = self.record_mutation(action, &quote)?;
    debug!(id = %quote.id, %action, entry, "saved quote locally");
    Ok(quote)
  }

  /// Delete a quote locally and queue the server delete.
  ///
  /// Returns false when no such quote is cached.
  pub fn delete_quote(&self, id: &str) -> Result<bool> {
    let Some(quote) = self.store.get::<CachedQuote>(id)? else {
      return Ok(false);
    };
    self.record_mutation(Action::Delete, &quote)?;
    Ok(true)
  }
}
