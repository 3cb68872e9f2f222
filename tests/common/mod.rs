//! In-memory server used by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use wrapsync::config::SyncConfig;
use wrapsync::model::CachedQuote;
use wrapsync::remote::{Backend, TableQuery};
use wrapsync::store::Store;
use wrapsync::{SyncContext, SyncError};

#[derive(Default)]
pub struct MockState {
  pub tables: HashMap<String, Vec<Value>>,
  /// Tables whose fetch fails
  pub failing_tables: HashSet<String>,
  /// Every insert/update/delete fails while set
  pub fail_writes: bool,
  /// Record ids whose update/delete fails
  pub failing_ids: HashSet<String>,
  /// Inserts succeed but the returned row has no id
  pub omit_insert_id: bool,
  /// Simulated latency of write calls
  pub write_delay: Option<Duration>,
  pub reachable: bool,
  /// Write calls in the order they reached the server, e.g. "update quotes q1"
  pub calls: Vec<String>,
  next_id: u64,
}

#[derive(Default)]
pub struct MockBackend {
  state: Mutex<MockState>,
}

impl MockBackend {
  pub fn new() -> Arc<Self> {
    let backend = Self::default();
    backend.with(|s| s.reachable = true);
    Arc::new(backend)
  }

  pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
    let mut state = self.state.lock().unwrap();
    f(&mut state)
  }

  pub fn set_table(&self, table: &str, rows: Vec<Value>) {
    self.with(|s| s.tables.insert(table.to_string(), rows));
  }

  pub fn calls(&self) -> Vec<String> {
    self.with(|s| s.calls.clone())
  }

  pub fn fail_id(&self, id: &str) {
    self.with(|s| s.failing_ids.insert(id.to_string()));
  }

  async fn write_call(&self, call: String, id: Option<&str>) -> Result<(), SyncError> {
    let (delay, fail) = self.with(|s| {
      s.calls.push(call);
      let fail = s.fail_writes || id.is_some_and(|id| s.failing_ids.contains(id));
      (s.write_delay, fail)
    });
    if let Some(delay) = delay {
      tokio::time::sleep(delay).await;
    }
    if fail {
      return Err(SyncError::NetworkUnreachable("connection reset".into()));
    }
    Ok(())
  }
}

impl Backend for MockBackend {
  fn fetch<'a>(&'a self, query: &'a TableQuery) -> BoxFuture<'a, Result<Vec<Value>, SyncError>> {
    Box::pin(async move {
      self.with(|s| {
        if s.failing_tables.contains(query.table) {
          return Err(SyncError::Remote {
            status: 503,
            body: "unavailable".into(),
          });
        }
        Ok(s.tables.get(query.table).cloned().unwrap_or_default())
      })
    })
  }

  fn insert<'a>(&'a self, table: &'a str, mut row: Value) -> BoxFuture<'a, Result<Value, SyncError>> {
    Box::pin(async move {
      self.write_call(format!("insert {}", table), None).await?;
      let stored = self.with(|s| {
        s.next_id += 1;
        if s.omit_insert_id {
          if let Some(obj) = row.as_object_mut() {
            obj.remove("id");
          }
          return row;
        }
        row["id"] = json!(format!("srv-{}", s.next_id));
        s.tables.entry(table.to_string()).or_default().push(row.clone());
        row
      });
      Ok(stored)
    })
  }

  fn update<'a>(&'a self, table: &'a str, id: &'a str, row: Value) -> BoxFuture<'a, Result<Value, SyncError>> {
    Box::pin(async move {
      self.write_call(format!("update {} {}", table, id), Some(id)).await?;
      Ok(row)
    })
  }

  fn delete<'a>(&'a self, table: &'a str, id: &'a str) -> BoxFuture<'a, Result<(), SyncError>> {
    Box::pin(async move { self.write_call(format!("delete {} {}", table, id), Some(id)).await })
  }

  fn ping(&self) -> BoxFuture<'_, Result<(), SyncError>> {
    Box::pin(async move {
      if self.with(|s| s.reachable) {
        Ok(())
      } else {
        Err(SyncError::NetworkUnreachable("no route to host".into()))
      }
    })
  }
}

pub fn context(backend: &Arc<MockBackend>) -> SyncContext {
  let store = Arc::new(Store::open_in_memory().unwrap());
  let backend: Arc<dyn Backend> = backend.clone();
  SyncContext::with_store(store, backend, SyncConfig::default())
}

pub fn quote(id: &str, status: &str) -> CachedQuote {
  CachedQuote {
    id: id.into(),
    customer_name: "Dana Ruiz".into(),
    customer_email: Some("dana@ruizplumbing.com".into()),
    vehicle_year: Some("2021".into()),
    vehicle_make: Some("Ford".into()),
    vehicle_model: Some("Transit".into()),
    sqft: Some(310.0),
    product_id: Some("p1".into()),
    product_name: Some("Gloss Cast Vinyl".into()),
    total_price: 2635.0,
    status: status.into(),
    created_at: 1_700_000_000_000,
    updated_at: 1_700_000_000_000,
    synced_at: Some(1_700_000_000_000),
    pending_sync: false,
  }
}

pub fn product_row(id: &str, name: &str, order: i64) -> Value {
  json!({
    "id": id,
    "product_name": name,
    "price_per_sqft": "8.50",
    "pricing_type": "per_sqft",
    "category": "wrap",
    "is_active": true,
    "display_order": order,
  })
}

/// Wait (bounded) until the outbox is empty.
pub async fn wait_for_empty_outbox(ctx: &SyncContext) {
  for _ in 0..200 {
    if ctx.outbox().is_empty().unwrap() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("outbox never drained");
}
