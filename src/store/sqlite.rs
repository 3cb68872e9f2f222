//! SQLite implementation of the persistent store.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::schema::{encode_index_value, Collection, MIGRATIONS, SCHEMA_VERSION};
use crate::error::{Result, SyncError};
use crate::model::Record;

/// A bookkeeping key/value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEntry {
  pub key: String,
  pub value: Value,
  pub updated_at: i64,
}

/// Outcome of a full-replace write of one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceStats {
  /// Records written from the snapshot.
  pub written: usize,
  /// Stale records removed because the snapshot no longer has them.
  pub removed: usize,
  /// Records left untouched because a local write is still pending or queued.
  pub kept_pending: usize,
}

/// Durable, indexed local store.
///
/// All collections share one SQLite database. The connection is serialized
/// behind a mutex; bulk writes run inside a single transaction so a failure
/// never leaves a collection half-written.
pub struct Store {
  conn: Mutex<Connection>,
}

impl Store {
  /// Open the store at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  /// Open (or create) the store at the given path and bring its layout up to date.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        SyncError::StorageUnavailable(format!(
          "failed to create cache directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      SyncError::StorageUnavailable(format!(
        "failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    let journal: String =
      conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    debug!(path = %path.display(), %journal, "opened cache database");

    Self::from_connection(conn)
  }

  /// Open a private in-memory store.
  pub fn open_in_memory() -> Result<Self> {
    Self::from_connection(Connection::open_in_memory()?)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    conn.pragma_update(None, "synchronous", "FULL")?;
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| {
        SyncError::StorageUnavailable("could not determine data directory".to_string())
      })?;

    Ok(data_dir.join("wrapsync").join("cache.db"))
  }

  /// Apply every migration newer than the stored layout version.
  fn run_migrations(&self) -> Result<()> {
    let mut conn = self.lock()?;
    let current: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if current >= SCHEMA_VERSION {
      return Ok(());
    }

    let tx = conn.transaction()?;
    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
      tx.execute_batch(sql)?;
      tx.pragma_update(None, "user_version", version)?;
      debug!(version, "applied cache migration");
    }
    tx.commit()?;

    Ok(())
  }

  /// Layout version currently recorded in the database.
  pub fn schema_version(&self) -> Result<i32> {
    let conn = self.lock()?;
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::StorageUnavailable(format!("lock poisoned: {}", e)))
  }

  /// Run `f` inside one transaction; commits only when `f` succeeds.
  pub fn with_transaction<R>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<R>) -> Result<R> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
  }

  // ==========================================================================
  // Records
  // ==========================================================================

  /// Upsert one record by primary key.
  pub fn put<T: Record>(&self, record: &T) -> Result<()> {
    self.with_transaction(|tx| write_record(tx, record))
  }

  /// Upsert many records of one collection atomically.
  pub fn put_many<T: Record>(&self, records: &[T]) -> Result<()> {
    self.with_transaction(|tx| {
      for record in records {
        write_record(tx, record)?;
      }
      Ok(())
    })
  }

  /// Replace a collection's contents with a fresh snapshot.
  ///
  /// Records with an unconfirmed local write (a pending row, or any key that
  /// still has outbox entries queued, deletes included) are left exactly as
  /// they are: neither overwritten, removed nor brought back.
  pub fn replace_all<T: Record>(&self, records: &[T]) -> Result<ReplaceStats> {
    let collection = T::COLLECTION;
    self.with_transaction(|tx| {
      let mut stats = ReplaceStats::default();
      let mut pending = keys_where(tx, collection, true)?;
      pending.extend(queued_keys(tx, collection)?);
      let incoming: HashSet<String> = records.iter().map(Record::key).collect();

      for key in keys_where(tx, collection, false)? {
        if !incoming.contains(&key) && !pending.contains(&key) {
          delete_record(tx, collection, &key)?;
          stats.removed += 1;
        }
      }

      for record in records {
        if pending.contains(&record.key()) {
          stats.kept_pending += 1;
          continue;
        }
        write_record(tx, record)?;
        stats.written += 1;
      }

      Ok(stats)
    })
  }

  /// Get a record by key.
  pub fn get<T: Record>(&self, key: &str) -> Result<Option<T>> {
    let conn = self.lock()?;
    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT data FROM records WHERE collection = ? AND key = ?",
        params![T::COLLECTION.as_str(), key],
        |row| row.get(0),
      )
      .optional()?;

    match data {
      Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
      None => Ok(None),
    }
  }

  /// Get every record of a collection, ordered by key.
  pub fn get_all<T: Record>(&self) -> Result<Vec<T>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT data FROM records WHERE collection = ? ORDER BY key")?;
    let rows = stmt
      .query_map(params![T::COLLECTION.as_str()], |row| row.get::<_, Vec<u8>>(0))?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(decode_rows(T::COLLECTION, rows))
  }

  /// Get every record whose index entry equals `value`, ordered by key.
  ///
  /// Composite indexes take an array value, e.g. `["Ford", "Transit"]`.
  pub fn get_all_by_index<T: Record>(&self, index: &str, value: &Value) -> Result<Vec<T>> {
    let collection = T::COLLECTION;
    if collection.index(index).is_none() {
      return Err(SyncError::UnknownIndex {
        collection: collection.to_string(),
        index: index.to_string(),
      });
    }

    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT r.data FROM records r
       INNER JOIN record_index i ON i.collection = r.collection AND i.key = r.key
       WHERE i.collection = ? AND i.index_name = ? AND i.index_value = ?
       ORDER BY r.key",
    )?;
    let rows = stmt
      .query_map(
        params![collection.as_str(), index, encode_index_value(value)],
        |row| row.get::<_, Vec<u8>>(0),
      )?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(decode_rows(collection, rows))
  }

  /// Delete a record. Returns whether it existed.
  pub fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
    self.with_transaction(|tx| delete_record(tx, collection, key))
  }

  /// Remove every record of a collection.
  pub fn clear(&self, collection: Collection) -> Result<()> {
    self.with_transaction(|tx| {
      match collection {
        Collection::Outbox => {
          tx.execute("DELETE FROM outbox", [])?;
        }
        Collection::SyncMeta => {
          tx.execute("DELETE FROM sync_meta", [])?;
        }
        _ => {
          tx.execute(
            "DELETE FROM record_index WHERE collection = ?",
            params![collection.as_str()],
          )?;
          tx.execute(
            "DELETE FROM records WHERE collection = ?",
            params![collection.as_str()],
          )?;
        }
      }
      Ok(())
    })
  }

  /// Number of records in a collection.
  pub fn count(&self, collection: Collection) -> Result<usize> {
    let conn = self.lock()?;
    let n: i64 = conn.query_row(
      "SELECT COUNT(*) FROM records WHERE collection = ?",
      params![collection.as_str()],
      |row| row.get(0),
    )?;
    Ok(n as usize)
  }

  // ==========================================================================
  // Meta
  // ==========================================================================

  /// Write a bookkeeping entry, overwriting any previous value.
  pub fn set_meta(&self, key: &str, value: &Value, at: i64) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO sync_meta (key, value, updated_at) VALUES (?, ?, ?)",
      params![key, value.to_string(), at],
    )?;
    Ok(())
  }

  pub fn get_meta(&self, key: &str) -> Result<Option<MetaEntry>> {
    let conn = self.lock()?;
    let row: Option<(String, i64)> = conn
      .query_row(
        "SELECT value, updated_at FROM sync_meta WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    match row {
      Some((value, updated_at)) => Ok(Some(MetaEntry {
        key: key.to_string(),
        value: serde_json::from_str(&value)?,
        updated_at,
      })),
      None => Ok(None),
    }
  }
}

/// Decode stored JSON rows, skipping rows that no longer match the record shape.
fn decode_rows<T: Record>(collection: Collection, rows: Vec<Vec<u8>>) -> Vec<T> {
  rows
    .into_iter()
    .filter_map(|data| match serde_json::from_slice(&data) {
      Ok(record) => Some(record),
      Err(e) => {
        warn!(%collection, error = %e, "skipping undecodable cached record");
        None
      }
    })
    .collect()
}

fn keys_where(tx: &Transaction<'_>, collection: Collection, pending: bool) -> Result<HashSet<String>> {
  let mut stmt = tx.prepare("SELECT key FROM records WHERE collection = ? AND pending = ?")?;
  let keys = stmt
    .query_map(params![collection.as_str(), pending], |row| row.get(0))?
    .collect::<rusqlite::Result<HashSet<String>>>()?;
  Ok(keys)
}

/// Keys of a collection that still have outbox entries waiting.
fn queued_keys(tx: &Transaction<'_>, collection: Collection) -> Result<HashSet<String>> {
  let mut stmt = tx.prepare("SELECT DISTINCT record_key FROM outbox WHERE collection = ?")?;
  let keys = stmt
    .query_map(params![collection.as_str()], |row| row.get(0))?
    .collect::<rusqlite::Result<HashSet<String>>>()?;
  Ok(keys)
}

/// Upsert a typed record and refresh its index entries.
pub(crate) fn write_record<T: Record>(tx: &Transaction<'_>, record: &T) -> Result<()> {
  let value = serde_json::to_value(record)?;
  write_value(
    tx,
    T::COLLECTION,
    &record.key(),
    &value,
    record.synced_at(),
    record.is_pending(),
  )
}

/// Upsert a serialized record and refresh its index entries.
pub(crate) fn write_value(
  tx: &Transaction<'_>,
  collection: Collection,
  key: &str,
  value: &Value,
  synced_at: Option<i64>,
  pending: bool,
) -> Result<()> {
  let data = serde_json::to_vec(value)?;
  tx.execute(
    "INSERT OR REPLACE INTO records (collection, key, data, synced_at, pending)
     VALUES (?, ?, ?, ?, ?)",
    params![collection.as_str(), key, data, synced_at, pending],
  )?;

  tx.execute(
    "DELETE FROM record_index WHERE collection = ? AND key = ?",
    params![collection.as_str(), key],
  )?;
  for idx in collection.indexes() {
    if let Some(index_value) = idx.value_for(value) {
      tx.execute(
        "INSERT INTO record_index (collection, index_name, index_value, key) VALUES (?, ?, ?, ?)",
        params![collection.as_str(), idx.name, index_value, key],
      )?;
    }
  }

  Ok(())
}

/// Read a serialized record with its sync columns.
pub(crate) fn read_value(
  tx: &Transaction<'_>,
  collection: Collection,
  key: &str,
) -> Result<Option<(Value, Option<i64>, bool)>> {
  let row: Option<(Vec<u8>, Option<i64>, bool)> = tx
    .query_row(
      "SELECT data, synced_at, pending FROM records WHERE collection = ? AND key = ?",
      params![collection.as_str(), key],
      |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )
    .optional()?;

  match row {
    Some((data, synced_at, pending)) => Ok(Some((serde_json::from_slice(&data)?, synced_at, pending))),
    None => Ok(None),
  }
}

pub(crate) fn delete_record(tx: &Transaction<'_>, collection: Collection, key: &str) -> Result<bool> {
  tx.execute(
    "DELETE FROM record_index WHERE collection = ? AND key = ?",
    params![collection.as_str(), key],
  )?;
  let n = tx.execute(
    "DELETE FROM records WHERE collection = ? AND key = ?",
    params![collection.as_str(), key],
  )?;
  Ok(n > 0)
}

/// Apply a confirmed push to the local copy of a record.
///
/// Re-keys the record when the server assigned a new identifier and, unless
/// more local writes are still queued for it, clears its pending flag.
/// Returns the key the record now lives under, or `None` if it is gone.
pub(crate) fn confirm_record(
  tx: &Transaction<'_>,
  collection: Collection,
  key: &str,
  server_id: Option<&str>,
  still_pending: bool,
) -> Result<Option<String>> {
  let Some((mut value, synced_at, pending)) = read_value(tx, collection, key)? else {
    return Ok(None);
  };

  let mut new_key = key.to_string();
  if let Some(id) = server_id.filter(|id| *id != key) {
    delete_record(tx, collection, key)?;
    if let Some(obj) = value.as_object_mut() {
      obj.insert("id".to_string(), Value::String(id.to_string()));
    }
    new_key = id.to_string();
    debug!(%collection, from = key, to = id, "re-keyed record to server id");
  }

  let pending = pending && still_pending;
  if !pending {
    if let Some(flag) = value.get_mut("pendingSync") {
      *flag = Value::Bool(false);
    }
  }

  write_value(tx, collection, &new_key, &value, synced_at, pending)?;
  Ok(Some(new_key))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{CachedCustomer, CachedQuote, CachedVehicle, PanelMeasurements};
  use crate::outbox::{insert_entry, Action};
  use serde_json::json;

  fn vehicle(id: &str, make: &str, model: &str) -> CachedVehicle {
    CachedVehicle {
      id: id.into(),
      make: make.into(),
      model: model.into(),
      year: Some("2022".into()),
      panels: PanelMeasurements::default(),
      total_sqft: Some(250.0),
      corrected_sqft: None,
      synced_at: None,
    }
  }

  fn quote(id: &str, status: &str, pending: bool) -> CachedQuote {
    CachedQuote {
      id: id.into(),
      customer_name: "Dana".into(),
      customer_email: None,
      vehicle_year: None,
      vehicle_make: None,
      vehicle_model: None,
      sqft: None,
      product_id: None,
      product_name: None,
      total_price: 100.0,
      status: status.into(),
      created_at: 1,
      updated_at: 1,
      synced_at: None,
      pending_sync: pending,
    }
  }

  #[test]
  fn open_is_idempotent_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    let store = Store::open(&path).unwrap();
    store.put(&vehicle("v1", "Ford", "Transit")).unwrap();
    drop(store);

    let store = Store::open(&path).unwrap();
    assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
    let v: Option<CachedVehicle> = store.get("v1").unwrap();
    assert_eq!(v.map(|v| v.model), Some("Transit".to_string()));
  }

  #[test]
  fn put_overwrites_by_key() {
    let store = Store::open_in_memory().unwrap();
    store.put(&vehicle("v1", "Ford", "Transit")).unwrap();
    store.put(&vehicle("v1", "Ford", "E-Series")).unwrap();

    let all: Vec<CachedVehicle> = store.get_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].model, "E-Series");
  }

  #[test]
  fn index_lookup_returns_all_matches() {
    let store = Store::open_in_memory().unwrap();
    store
      .put_many(&[
        vehicle("v1", "Ford", "Transit"),
        vehicle("v2", "Ford", "F-150"),
        vehicle("v3", "Ram", "ProMaster"),
      ])
      .unwrap();

    let fords: Vec<CachedVehicle> = store.get_all_by_index("make", &json!("Ford")).unwrap();
    assert_eq!(fords.iter().map(|v| v.id.as_str()).collect::<Vec<_>>(), ["v1", "v2"]);

    let transit: Vec<CachedVehicle> = store
      .get_all_by_index("make_model", &json!(["Ford", "Transit"]))
      .unwrap();
    assert_eq!(transit.len(), 1);
  }

  #[test]
  fn index_entries_follow_updates() {
    let store = Store::open_in_memory().unwrap();
    store.put(&quote("q1", "draft", false)).unwrap();
    store.put(&quote("q1", "sent", false)).unwrap();

    let drafts: Vec<CachedQuote> = store.get_all_by_index("status", &json!("draft")).unwrap();
    let sent: Vec<CachedQuote> = store.get_all_by_index("status", &json!("sent")).unwrap();
    assert!(drafts.is_empty());
    assert_eq!(sent.len(), 1);
  }

  #[test]
  fn unknown_index_is_an_error() {
    let store = Store::open_in_memory().unwrap();
    let result: Result<Vec<CachedCustomer>> = store.get_all_by_index("phone", &json!("555"));
    assert!(matches!(result, Err(SyncError::UnknownIndex { .. })));
  }

  #[test]
  fn delete_and_clear() {
    let store = Store::open_in_memory().unwrap();
    store
      .put_many(&[vehicle("v1", "Ford", "Transit"), vehicle("v2", "Ram", "ProMaster")])
      .unwrap();

    assert!(store.delete(Collection::Vehicles, "v1").unwrap());
    assert!(!store.delete(Collection::Vehicles, "v1").unwrap());
    let by_make: Vec<CachedVehicle> = store.get_all_by_index("make", &json!("Ford")).unwrap();
    assert!(by_make.is_empty());

    store.clear(Collection::Vehicles).unwrap();
    assert_eq!(store.count(Collection::Vehicles).unwrap(), 0);
  }

  #[test]
  fn replace_all_removes_stale_and_keeps_pending() {
    let store = Store::open_in_memory().unwrap();
    store
      .put_many(&[
        quote("q1", "draft", false),
        quote("q2", "draft", false),
        quote("q3", "draft", true),
      ])
      .unwrap();

    let stats = store
      .replace_all(&[quote("q1", "sent", false), quote("q3", "sent", false)])
      .unwrap();
    assert_eq!(
      stats,
      ReplaceStats {
        written: 1,
        removed: 1,
        kept_pending: 1
      }
    );

    let all: Vec<CachedQuote> = store.get_all().unwrap();
    let summary: Vec<(&str, &str)> = all.iter().map(|q| (q.id.as_str(), q.status.as_str())).collect();
    assert_eq!(summary, [("q1", "sent"), ("q3", "draft")]);
  }

  #[test]
  fn replace_all_leaves_records_with_queued_writes_alone() {
    let store = Store::open_in_memory().unwrap();
    store.put(&vehicle("v1", "Ford", "Transit")).unwrap();
    store.put(&vehicle("v2", "Ram", "ProMaster")).unwrap();

    // v1 edited locally, v2 deleted locally; both still queued.
    store
      .with_transaction(|tx| {
        let edited = vehicle("v1", "Ford", "Transit Connect");
        write_record(tx, &edited)?;
        insert_entry(tx, Collection::Vehicles, Action::Update, "v1", &json!({"id": "v1"}), 1)?;
        delete_record(tx, Collection::Vehicles, "v2")?;
        insert_entry(tx, Collection::Vehicles, Action::Delete, "v2", &json!({"id": "v2"}), 2)?;
        Ok(())
      })
      .unwrap();

    let stats = store
      .replace_all(&[vehicle("v1", "Ford", "Transit"), vehicle("v2", "Ram", "ProMaster")])
      .unwrap();
    assert_eq!(stats.written, 0);
    assert_eq!(stats.kept_pending, 2);

    let v1: CachedVehicle = store.get("v1").unwrap().unwrap();
    assert_eq!(v1.model, "Transit Connect");
    assert!(store.get::<CachedVehicle>("v2").unwrap().is_none());

    // A queued record missing from the snapshot is not removed either.
    let stats = store.replace_all::<CachedVehicle>(&[]).unwrap();
    assert_eq!(stats.removed, 0);
    assert!(store.get::<CachedVehicle>("v1").unwrap().is_some());
  }

  #[test]
  fn confirm_record_rekeys_and_clears_pending() {
    let store = Store::open_in_memory().unwrap();
    store.put(&quote("local-1", "draft", true)).unwrap();

    let new_key = store
      .with_transaction(|tx| confirm_record(tx, Collection::Quotes, "local-1", Some("srv-9"), false))
      .unwrap();
    assert_eq!(new_key.as_deref(), Some("srv-9"));

    assert!(store.get::<CachedQuote>("local-1").unwrap().is_none());
    let q: CachedQuote = store.get("srv-9").unwrap().unwrap();
    assert_eq!(q.id, "srv-9");
    assert!(!q.pending_sync);
    let pending: Vec<CachedQuote> = store.get_all_by_index("pending_sync", &json!(true)).unwrap();
    assert!(pending.is_empty());
  }

  #[test]
  fn meta_entries_overwrite() {
    let store = Store::open_in_memory().unwrap();
    assert!(store.get_meta("lastSync").unwrap().is_none());

    store.set_meta("lastSync", &json!(10), 10).unwrap();
    store.set_meta("lastSync", &json!(20), 20).unwrap();
    let entry = store.get_meta("lastSync").unwrap().unwrap();
    assert_eq!(entry.value, json!(20));
    assert_eq!(entry.updated_at, 20);
  }
}
