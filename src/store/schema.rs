//! Fixed collection and index layout of the local database.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SyncError;

/// Current layout version, stored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i32 = 1;

/// Record collections held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
  Vehicles,
  Products,
  Customers,
  Quotes,
  Orders,
  Outbox,
  SyncMeta,
}

/// A secondary index over one or more top-level record fields.
#[derive(Debug, Clone, Copy)]
pub struct IndexDef {
  pub name: &'static str,
  pub fields: &'static [&'static str],
}

const VEHICLE_INDEXES: &[IndexDef] = &[
  IndexDef {
    name: "make",
    fields: &["make"],
  },
  IndexDef {
    name: "make_model",
    fields: &["make", "model"],
  },
];

const PRODUCT_INDEXES: &[IndexDef] = &[IndexDef {
  name: "category",
  fields: &["category"],
}];

const CUSTOMER_INDEXES: &[IndexDef] = &[
  IndexDef {
    name: "email",
    fields: &["email"],
  },
  IndexDef {
    name: "name",
    fields: &["name"],
  },
];

const QUOTE_INDEXES: &[IndexDef] = &[
  IndexDef {
    name: "status",
    fields: &["status"],
  },
  IndexDef {
    name: "pending_sync",
    fields: &["pendingSync"],
  },
];

const ORDER_INDEXES: &[IndexDef] = &[
  IndexDef {
    name: "status",
    fields: &["status"],
  },
  IndexDef {
    name: "order_number",
    fields: &["orderNumber"],
  },
];

impl Collection {
  /// Collections that hold cached entity records.
  pub const RECORDS: [Collection; 5] = [
    Collection::Vehicles,
    Collection::Products,
    Collection::Customers,
    Collection::Quotes,
    Collection::Orders,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      Collection::Vehicles => "vehicles",
      Collection::Products => "products",
      Collection::Customers => "customers",
      Collection::Quotes => "quotes",
      Collection::Orders => "orders",
      Collection::Outbox => "outbox",
      Collection::SyncMeta => "sync_meta",
    }
  }

  /// Secondary indexes maintained for this collection.
  pub fn indexes(&self) -> &'static [IndexDef] {
    match self {
      Collection::Vehicles => VEHICLE_INDEXES,
      Collection::Products => PRODUCT_INDEXES,
      Collection::Customers => CUSTOMER_INDEXES,
      Collection::Quotes => QUOTE_INDEXES,
      Collection::Orders => ORDER_INDEXES,
      Collection::Outbox | Collection::SyncMeta => &[],
    }
  }

  pub fn index(&self, name: &str) -> Option<&'static IndexDef> {
    self.indexes().iter().find(|idx| idx.name == name)
  }
}

impl fmt::Display for Collection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

impl FromStr for Collection {
  type Err = SyncError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "vehicles" => Ok(Collection::Vehicles),
      "products" => Ok(Collection::Products),
      "customers" => Ok(Collection::Customers),
      "quotes" => Ok(Collection::Quotes),
      "orders" => Ok(Collection::Orders),
      "outbox" => Ok(Collection::Outbox),
      "sync_meta" => Ok(Collection::SyncMeta),
      other => Err(SyncError::UnknownCollection(other.to_string())),
    }
  }
}

impl IndexDef {
  /// Compute the encoded index value for a serialized record.
  ///
  /// Single-field indexes encode the field value, composite indexes encode an
  /// array of the field values. Records missing any indexed field (or holding
  /// null) are left out of the index.
  pub fn value_for(&self, record: &Value) -> Option<String> {
    let mut parts = Vec::with_capacity(self.fields.len());
    for field in self.fields {
      match record.get(*field) {
        None | Some(Value::Null) => return None,
        Some(v) => parts.push(v.clone()),
      }
    }

    if parts.len() == 1 {
      parts.pop().map(|v| encode_index_value(&v))
    } else {
      Some(encode_index_value(&Value::Array(parts)))
    }
  }
}

/// Encode a lookup value the same way stored index values are encoded.
pub fn encode_index_value(value: &Value) -> String {
  value.to_string()
}

/// Layout for version 1.
pub const SCHEMA_V1: &str = r#"
-- Cached entity records (serialized JSON keyed by collection + identifier)
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    key TEXT NOT NULL,
    data BLOB NOT NULL,
    synced_at INTEGER,
    pending INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (collection, key)
);

-- Secondary index entries, one row per (index, record)
CREATE TABLE IF NOT EXISTS record_index (
    collection TEXT NOT NULL,
    index_name TEXT NOT NULL,
    index_value TEXT NOT NULL,
    key TEXT NOT NULL,
    PRIMARY KEY (collection, index_name, key)
);

CREATE INDEX IF NOT EXISTS idx_record_index_lookup
    ON record_index(collection, index_name, index_value);

-- Pending local mutations
CREATE TABLE IF NOT EXISTS outbox (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    action TEXT NOT NULL,
    record_key TEXT NOT NULL,
    payload BLOB NOT NULL,
    enqueued_at INTEGER NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    last_error TEXT,
    last_attempt_at INTEGER,
    revivals INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_outbox_order ON outbox(enqueued_at, id);
CREATE INDEX IF NOT EXISTS idx_outbox_record ON outbox(collection, record_key);

-- Bookkeeping key/value pairs
CREATE TABLE IF NOT EXISTS sync_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

/// Migrations indexed by the version they upgrade to.
pub const MIGRATIONS: &[(i32, &str)] = &[(1, SCHEMA_V1)];

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn collection_names_round_trip() {
    for c in Collection::RECORDS {
      assert_eq!(c.as_str().parse::<Collection>().ok(), Some(c));
    }
    assert!("invoices".parse::<Collection>().is_err());
  }

  #[test]
  fn composite_index_encodes_array() {
    let idx = Collection::Vehicles
      .index("make_model")
      .and_then(|i| i.value_for(&json!({"make": "Ford", "model": "Transit"})));
    assert_eq!(idx.as_deref(), Some(r#"["Ford","Transit"]"#));
  }

  #[test]
  fn missing_field_is_not_indexed() {
    let idx = Collection::Customers
      .index("email")
      .and_then(|i| i.value_for(&json!({"name": "Ana", "email": null})));
    assert_eq!(idx, None);
  }

  #[test]
  fn boolean_index_matches_lookup_encoding() {
    let idx = Collection::Quotes
      .index("pending_sync")
      .and_then(|i| i.value_for(&json!({"pendingSync": true})));
    assert_eq!(idx, Some(encode_index_value(&json!(true))));
  }
}
