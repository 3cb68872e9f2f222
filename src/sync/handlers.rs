//! Push handlers: deliver one outbox entry to its server table.

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::model::is_local_id;
use crate::outbox::{Action, OutboxEntry};
use crate::remote::api_types::{coerce_f64, coerce_string};
use crate::remote::Backend;

/// Server acknowledgement of a pushed mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReceipt {
  /// Identifier the server stored the record under, when it differs from
  /// the local key (creates of locally keyed records).
  pub server_id: Option<String>,
}

/// Delivers one outbox entry. Registered per collection on the engine.
pub type PushHandler =
  Arc<dyn Fn(Arc<dyn Backend>, OutboxEntry) -> BoxFuture<'static, Result<PushReceipt>> + Send + Sync>;

/// Handler for the `quotes` collection.
pub fn quotes_handler() -> PushHandler {
  Arc::new(
    |backend: Arc<dyn Backend>, entry: OutboxEntry| -> BoxFuture<'static, Result<PushReceipt>> {
      Box::pin(push_quote(backend, entry))
    },
  )
}

async fn push_quote(backend: Arc<dyn Backend>, entry: OutboxEntry) -> Result<PushReceipt> {
  let id = entry
    .payload
    .get("id")
    .and_then(coerce_string)
    .unwrap_or_else(|| entry.record_key.clone());

  match entry.action {
    Action::Delete => {
      // Never reached the server, nothing to delete there
      if !is_local_id(&id) {
        backend.delete("quotes", &id).await?;
      }
      Ok(PushReceipt::default())
    }
    Action::Create | Action::Update => {
      let row = quote_row(&entry.payload);
      if is_local_id(&id) {
        let stored = backend.insert("quotes", row).await?;
        // A create is only confirmed once the record can be re-keyed
        let server_id = stored
          .get("id")
          .and_then(coerce_string)
          .ok_or_else(|| SyncError::MissingServerId("quotes".to_string()))?;
        debug!(local = %id, server = %server_id, "quote created on server");
        Ok(PushReceipt {
          server_id: Some(server_id),
        })
      } else {
        backend.update("quotes", &id, row).await?;
        Ok(PushReceipt::default())
      }
    }
  }
}

/// Map a cached quote payload to server column names.
///
/// Numeric columns are coerced from strings; absent fields are left out so
/// an update never blanks server columns the payload did not carry.
pub fn quote_row(payload: &Value) -> Value {
  const TEXT_COLUMNS: &[(&str, &str)] = &[
    ("customerName", "customer_name"),
    ("customerEmail", "customer_email"),
    ("vehicleYear", "vehicle_year"),
    ("vehicleMake", "vehicle_make"),
    ("vehicleModel", "vehicle_model"),
    ("productId", "product_id"),
    ("productName", "product_name"),
    ("status", "status"),
  ];
  const NUMERIC_COLUMNS: &[(&str, &str)] = &[("sqft", "sqft"), ("totalPrice", "total_price")];

  let mut row = Map::new();
  for (local, column) in TEXT_COLUMNS {
    match payload.get(*local) {
      Some(Value::Null) => {
        row.insert(column.to_string(), Value::Null);
      }
      Some(v) => {
        if let Some(s) = coerce_string(v) {
          row.insert(column.to_string(), Value::String(s));
        }
      }
      None => {}
    }
  }
  for (local, column) in NUMERIC_COLUMNS {
    if let Some(v) = payload.get(*local) {
      let n = coerce_f64(v).map(Value::from).unwrap_or(Value::Null);
      row.insert(column.to_string(), n);
    }
  }
  Value::Object(row)
}
