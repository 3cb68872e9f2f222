//! Bulk loading of server snapshots into the store.
//!
//! Each loader stamps records with the pull time and replaces the collection
//! in one transaction, so re-pulling the same snapshot is idempotent.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{CachedCustomer, CachedOrder, CachedProduct, CachedQuote, CachedVehicle, Record};
use crate::remote::api_types::{ApiCustomer, ApiOrder, ApiProduct, ApiQuote, ApiVehicle};
use crate::store::{Collection, ReplaceStats, Store};

/// Stamp and store a snapshot of one collection.
pub fn cache_records<T: Record>(store: &Store, mut records: Vec<T>, now: i64) -> Result<ReplaceStats> {
  for record in &mut records {
    record.stamp_synced(now);
  }
  let stats = store.replace_all(&records)?;
  let collection = T::COLLECTION;
  debug!(
    %collection,
    written = stats.written,
    removed = stats.removed,
    kept_pending = stats.kept_pending,
    "cached snapshot"
  );
  Ok(stats)
}

pub fn cache_vehicles(store: &Store, vehicles: Vec<CachedVehicle>, now: i64) -> Result<ReplaceStats> {
  cache_records(store, vehicles, now)
}

pub fn cache_products(store: &Store, products: Vec<CachedProduct>, now: i64) -> Result<ReplaceStats> {
  cache_records(store, products, now)
}

pub fn cache_customers(store: &Store, customers: Vec<CachedCustomer>, now: i64) -> Result<ReplaceStats> {
  cache_records(store, customers, now)
}

pub fn cache_quotes(store: &Store, quotes: Vec<CachedQuote>, now: i64) -> Result<ReplaceStats> {
  cache_records(store, quotes, now)
}

pub fn cache_orders(store: &Store, orders: Vec<CachedOrder>, now: i64) -> Result<ReplaceStats> {
  cache_records(store, orders, now)
}

/// Map raw server rows to the cached shape, skipping rows that do not decode.
fn map_rows<A, T>(collection: Collection, rows: Vec<Value>) -> Vec<T>
where
  A: DeserializeOwned,
  T: From<A>,
{
  rows
    .into_iter()
    .filter_map(|row| match serde_json::from_value::<A>(row) {
      Ok(api) => Some(T::from(api)),
      Err(e) => {
        warn!(%collection, error = %e, "skipping malformed server row");
        None
      }
    })
    .collect()
}

/// Map and cache raw rows fetched for a collection.
pub fn cache_rows(store: &Store, collection: Collection, rows: Vec<Value>, now: i64) -> Result<ReplaceStats> {
  match collection {
    Collection::Vehicles => cache_vehicles(store, map_rows::<ApiVehicle, _>(collection, rows), now),
    Collection::Products => cache_products(store, map_rows::<ApiProduct, _>(collection, rows), now),
    Collection::Customers => cache_customers(store, map_rows::<ApiCustomer, _>(collection, rows), now),
    Collection::Quotes => cache_quotes(store, map_rows::<ApiQuote, _>(collection, rows), now),
    Collection::Orders => cache_orders(store, map_rows::<ApiOrder, _>(collection, rows), now),
    Collection::Outbox | Collection::SyncMeta => Ok(ReplaceStats::default()),
  }
}
