//! Durable queue of local mutations awaiting delivery to the server.
//!
//! Entries live in the same database as the cached records so a local write
//! and its outbox entry can commit together. Entries are removed only after
//! the server accepted them; failed attempts bump a bounded retry counter.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rusqlite::{params, OptionalExtension, Row, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::store::{Collection, Store};

/// Kind of local mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
  Create,
  Update,
  Delete,
}

impl Action {
  pub fn as_str(&self) -> &'static str {
    match self {
      Action::Create => "create",
      Action::Update => "update",
      Action::Delete => "delete",
    }
  }
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

impl FromStr for Action {
  type Err = SyncError;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "create" => Ok(Action::Create),
      "update" => Ok(Action::Update),
      "delete" => Ok(Action::Delete),
      other => Err(SyncError::StorageUnavailable(format!(
        "corrupt outbox action: {}",
        other
      ))),
    }
  }
}

/// Delivery state of an outbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
  /// Eligible for the next drain.
  Pending,
  /// Retry budget used up; skipped until revived.
  DeadLettered,
}

impl EntryStatus {
  fn as_str(&self) -> &'static str {
    match self {
      EntryStatus::Pending => "pending",
      EntryStatus::DeadLettered => "dead_lettered",
    }
  }
}

/// One queued local mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
  pub id: i64,
  pub collection: Collection,
  pub action: Action,
  /// Key of the record the mutation targets.
  pub record_key: String,
  /// Snapshot of the record at the time of the write.
  pub payload: Value,
  pub enqueued_at: i64,
  pub retries: u32,
  pub status: EntryStatus,
  pub last_error: Option<String>,
  pub last_attempt_at: Option<i64>,
  /// How many times the entry was re-enabled after dead-lettering.
  pub revivals: u32,
}

impl OutboxEntry {
  /// Whether a drain may attempt this entry under the given retry budget.
  pub fn is_attemptable(&self, max_retries: u32) -> bool {
    self.status == EntryStatus::Pending && self.retries < max_retries
  }
}

// Row shape before the text columns are parsed.
struct RawEntry {
  id: i64,
  collection: String,
  action: String,
  record_key: String,
  payload: Vec<u8>,
  enqueued_at: i64,
  retries: u32,
  status: String,
  last_error: Option<String>,
  last_attempt_at: Option<i64>,
  revivals: u32,
}

impl RawEntry {
  fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id: row.get(0)?,
      collection: row.get(1)?,
      action: row.get(2)?,
      record_key: row.get(3)?,
      payload: row.get(4)?,
      enqueued_at: row.get(5)?,
      retries: row.get(6)?,
      status: row.get(7)?,
      last_error: row.get(8)?,
      last_attempt_at: row.get(9)?,
      revivals: row.get(10)?,
    })
  }
}

impl TryFrom<RawEntry> for OutboxEntry {
  type Error = SyncError;

  fn try_from(raw: RawEntry) -> Result<Self> {
    Ok(OutboxEntry {
      id: raw.id,
      collection: raw.collection.parse()?,
      action: raw.action.parse()?,
      record_key: raw.record_key,
      payload: serde_json::from_slice(&raw.payload)?,
      enqueued_at: raw.enqueued_at,
      retries: raw.retries,
      status: if raw.status == EntryStatus::DeadLettered.as_str() {
        EntryStatus::DeadLettered
      } else {
        EntryStatus::Pending
      },
      last_error: raw.last_error,
      last_attempt_at: raw.last_attempt_at,
      revivals: raw.revivals,
    })
  }
}

const SELECT_COLUMNS: &str = "SELECT id, collection, action, record_key, payload, enqueued_at, \
   retries, status, last_error, last_attempt_at, revivals FROM outbox";

/// Outcome of a failed delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOutcome {
  pub retries: u32,
  /// True when this attempt used up the retry budget.
  pub dead_lettered: bool,
}

/// Handle to the outbox queue.
#[derive(Clone)]
pub struct Outbox {
  store: Arc<Store>,
}

impl Outbox {
  pub fn new(store: Arc<Store>) -> Self {
    Self { store }
  }

  /// Append a mutation with `retries = 0`; returns its sequence id.
  pub fn enqueue(
    &self,
    collection: Collection,
    action: Action,
    record_key: &str,
    payload: &Value,
    now: i64,
  ) -> Result<i64> {
    self
      .store
      .with_transaction(|tx| insert_entry(tx, collection, action, record_key, payload, now))
  }

  /// Every entry, oldest first.
  pub fn list_pending(&self) -> Result<Vec<OutboxEntry>> {
    self.query(&format!("{} ORDER BY enqueued_at, id", SELECT_COLUMNS), &[])
  }

  /// Entries that used up their retry budget, oldest first.
  pub fn list_dead_lettered(&self) -> Result<Vec<OutboxEntry>> {
    self.query(
      &format!("{} WHERE status = ? ORDER BY enqueued_at, id", SELECT_COLUMNS),
      &[EntryStatus::DeadLettered.as_str()],
    )
  }

  pub fn get(&self, id: i64) -> Result<Option<OutboxEntry>> {
    self.store.with_transaction(|tx| {
      let raw = tx
        .query_row(
          &format!("{} WHERE id = ?", SELECT_COLUMNS),
          params![id],
          RawEntry::from_row,
        )
        .optional()?;
      raw.map(OutboxEntry::try_from).transpose()
    })
  }

  fn query(&self, sql: &str, args: &[&str]) -> Result<Vec<OutboxEntry>> {
    self.store.with_transaction(|tx| {
      let mut stmt = tx.prepare(sql)?;
      let raws = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), RawEntry::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
      raws.into_iter().map(OutboxEntry::try_from).collect()
    })
  }

  /// Delete an entry after the server accepted it. Returns whether it existed.
  pub fn remove(&self, id: i64) -> Result<bool> {
    self.store.with_transaction(|tx| delete_entry(tx, id))
  }

  /// Record a failed attempt: bump `retries` by one and keep the entry.
  ///
  /// Reaching `max_retries` dead-letters the entry. Calling this on an entry
  /// that already used its budget fails with `RetryExhausted` and leaves it
  /// untouched.
  pub fn increment_retry(&self, id: i64, max_retries: u32, error: &str, now: i64) -> Result<RetryOutcome> {
    self.store.with_transaction(|tx| {
      let retries: Option<u32> = tx
        .query_row("SELECT retries FROM outbox WHERE id = ?", params![id], |row| row.get(0))
        .optional()?;
      let Some(retries) = retries else {
        return Err(SyncError::StorageUnavailable(format!("outbox entry {} not found", id)));
      };
      if retries >= max_retries {
        return Err(SyncError::RetryExhausted { id, retries });
      }

      let retries = retries + 1;
      let dead_lettered = retries >= max_retries;
      let status = if dead_lettered {
        EntryStatus::DeadLettered
      } else {
        EntryStatus::Pending
      };
      tx.execute(
        "UPDATE outbox SET retries = ?, status = ?, last_error = ?, last_attempt_at = ? WHERE id = ?",
        params![retries, status.as_str(), error, now, id],
      )?;

      if dead_lettered {
        warn!(id, retries, error, "outbox entry dead-lettered");
      } else {
        debug!(id, retries, error, "outbox entry attempt failed");
      }
      Ok(RetryOutcome { retries, dead_lettered })
    })
  }

  /// Re-enable dead-lettered entries whose backoff has elapsed.
  ///
  /// An entry revived `n` times waits `base_backoff_ms * 2^n` after its last
  /// attempt. Revival resets `retries` to 0. Returns the revived ids.
  pub fn revive_due(&self, now: i64, base_backoff_ms: i64) -> Result<Vec<i64>> {
    let revived: Vec<i64> = self
      .list_dead_lettered()?
      .into_iter()
      .filter(|entry| {
        let backoff = base_backoff_ms.saturating_mul(1_i64 << entry.revivals.min(20));
        now.saturating_sub(entry.last_attempt_at.unwrap_or(entry.enqueued_at)) >= backoff
      })
      .map(|entry| entry.id)
      .collect();

    self.revive(&revived)?;
    Ok(revived)
  }

  /// Re-enable every dead-lettered entry now. Returns the revived ids.
  pub fn revive_all(&self) -> Result<Vec<i64>> {
    let ids: Vec<i64> = self.list_dead_lettered()?.into_iter().map(|e| e.id).collect();
    self.revive(&ids)?;
    Ok(ids)
  }

  fn revive(&self, ids: &[i64]) -> Result<()> {
    if ids.is_empty() {
      return Ok(());
    }
    self.store.with_transaction(|tx| {
      for id in ids {
        tx.execute(
          "UPDATE outbox SET retries = 0, status = ?, revivals = revivals + 1 WHERE id = ?",
          params![EntryStatus::Pending.as_str(), id],
        )?;
      }
      Ok(())
    })?;
    info!(count = ids.len(), "revived dead-lettered outbox entries");
    Ok(())
  }

  /// Total number of queued entries.
  pub fn len(&self) -> Result<usize> {
    self.count_where("1 = 1", &[])
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  pub fn dead_lettered_count(&self) -> Result<usize> {
    self.count_where("status = ?", &[EntryStatus::DeadLettered.as_str()])
  }

  /// Entries still queued for one record.
  pub fn pending_for_record(&self, collection: Collection, record_key: &str) -> Result<usize> {
    self
      .store
      .with_transaction(|tx| count_for_record(tx, collection, record_key))
  }

  fn count_where(&self, clause: &str, args: &[&str]) -> Result<usize> {
    self.store.with_transaction(|tx| {
      let n: i64 = tx.query_row(
        &format!("SELECT COUNT(*) FROM outbox WHERE {}", clause),
        rusqlite::params_from_iter(args.iter()),
        |row| row.get(0),
      )?;
      Ok(n as usize)
    })
  }
}

/// Insert an entry inside an existing transaction.
pub(crate) fn insert_entry(
  tx: &Transaction<'_>,
  collection: Collection,
  action: Action,
  record_key: &str,
  payload: &Value,
  now: i64,
) -> Result<i64> {
  let data = serde_json::to_vec(payload)?;
  tx.execute(
    "INSERT INTO outbox (collection, action, record_key, payload, enqueued_at, retries, status)
     VALUES (?, ?, ?, ?, ?, 0, ?)",
    params![
      collection.as_str(),
      action.as_str(),
      record_key,
      data,
      now,
      EntryStatus::Pending.as_str()
    ],
  )?;
  let id = tx.last_insert_rowid();
  debug!(id, %collection, %action, record_key, "enqueued local mutation");
  Ok(id)
}

pub(crate) fn delete_entry(tx: &Transaction<'_>, id: i64) -> Result<bool> {
  let n = tx.execute("DELETE FROM outbox WHERE id = ?", params![id])?;
  Ok(n > 0)
}

pub(crate) fn count_for_record(tx: &Transaction<'_>, collection: Collection, record_key: &str) -> Result<usize> {
  let n: i64 = tx.query_row(
    "SELECT COUNT(*) FROM outbox WHERE collection = ? AND record_key = ?",
    params![collection.as_str(), record_key],
    |row| row.get(0),
  )?;
  Ok(n as usize)
}

/// Point queued entries for a record at its new key.
///
/// Used after a create was accepted under a server-assigned id so later
/// updates for the same record address the server row.
pub(crate) fn rekey_entries(
  tx: &Transaction<'_>,
  collection: Collection,
  old_key: &str,
  new_key: &str,
) -> Result<usize> {
  let mut stmt =
    tx.prepare("SELECT id, payload FROM outbox WHERE collection = ? AND record_key = ?")?;
  let rows = stmt
    .query_map(params![collection.as_str(), old_key], |row| {
      Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  for (id, payload) in &rows {
    let mut payload: Value = serde_json::from_slice(payload)?;
    if let Some(obj) = payload.as_object_mut() {
      obj.insert("id".to_string(), Value::String(new_key.to_string()));
    }
    tx.execute(
      "UPDATE outbox SET record_key = ?, payload = ? WHERE id = ?",
      params![new_key, serde_json::to_vec(&payload)?, id],
    )?;
  }

  Ok(rows.len())
}
