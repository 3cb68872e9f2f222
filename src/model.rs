//! Cached entity shapes and the trait tying them to store collections.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::store::Collection;

/// Trait for entities that live in a store collection.
///
/// Implementors provide the primary key used as the store key and expose the
/// local sync bookkeeping fields.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned {
  /// Collection this record type is stored in.
  const COLLECTION: Collection;

  /// Stable identifier, used as the store key.
  fn key(&self) -> String;

  /// Epoch millis of the last successful pull that wrote this record.
  fn synced_at(&self) -> Option<i64>;

  /// Stamp the record with a pull time.
  fn stamp_synced(&mut self, at: i64);

  /// Whether the record holds a local write the server has not confirmed.
  fn is_pending(&self) -> bool {
    false
  }
}

// ============================================================================
// Vehicles
// ============================================================================

/// Per-panel surface measurements, in inches with computed square footage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelMeasurements {
  pub side_width: Option<f64>,
  pub side_height: Option<f64>,
  pub side_sqft: Option<f64>,
  pub back_width: Option<f64>,
  pub back_height: Option<f64>,
  pub back_sqft: Option<f64>,
  pub hood_width: Option<f64>,
  pub hood_length: Option<f64>,
  pub hood_sqft: Option<f64>,
  pub roof_width: Option<f64>,
  pub roof_length: Option<f64>,
  pub roof_sqft: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedVehicle {
  pub id: String,
  pub make: String,
  pub model: String,
  pub year: Option<String>,
  #[serde(default)]
  pub panels: PanelMeasurements,
  pub total_sqft: Option<f64>,
  pub corrected_sqft: Option<f64>,
  pub synced_at: Option<i64>,
}

// ============================================================================
// Products
// ============================================================================

/// How a product is priced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMode {
  #[default]
  PerSqft,
  Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedProduct {
  pub id: String,
  pub name: String,
  pub price_per_sqft: Option<f64>,
  pub flat_price: Option<f64>,
  pub pricing_mode: PricingMode,
  pub category: String,
  pub is_active: bool,
  pub display_order: i64,
  pub synced_at: Option<i64>,
}

impl CachedProduct {
  /// Price for a given area, honoring the pricing mode.
  pub fn price_for(&self, sqft: f64) -> f64 {
    match self.pricing_mode {
      PricingMode::Flat => self.flat_price.unwrap_or(0.0),
      PricingMode::PerSqft => self.price_per_sqft.unwrap_or(0.0) * sqft,
    }
  }
}

// ============================================================================
// Customers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedCustomer {
  pub id: String,
  pub name: String,
  pub email: Option<String>,
  pub phone: Option<String>,
  pub company: Option<String>,
  pub source: Option<String>,
  #[serde(default)]
  pub tags: Vec<String>,
  pub synced_at: Option<i64>,
}

// ============================================================================
// Quotes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedQuote {
  pub id: String,
  pub customer_name: String,
  pub customer_email: Option<String>,
  pub vehicle_year: Option<String>,
  pub vehicle_make: Option<String>,
  pub vehicle_model: Option<String>,
  pub sqft: Option<f64>,
  pub product_id: Option<String>,
  pub product_name: Option<String>,
  pub total_price: f64,
  pub status: String,
  pub created_at: i64,
  pub updated_at: i64,
  pub synced_at: Option<i64>,
  #[serde(default)]
  pub pending_sync: bool,
}

/// Prefix of keys assigned to records created while offline.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// True when the key was assigned locally and has no server counterpart yet.
pub fn is_local_id(id: &str) -> bool {
  id.is_empty() || id.starts_with(LOCAL_ID_PREFIX)
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedOrder {
  pub id: String,
  pub order_number: String,
  pub customer_name: Option<String>,
  pub customer_email: Option<String>,
  pub product_type: Option<String>,
  pub status: String,
  pub priority: Option<String>,
  /// Embedded vehicle description, kept as the server sends it.
  pub vehicle: Option<Value>,
  /// Embedded production timeline, kept as the server sends it.
  pub timeline: Option<Value>,
  pub created_at: Option<String>,
  pub synced_at: Option<i64>,
}

// ============================================================================
// Record implementations
// ============================================================================

macro_rules! impl_record {
  ($ty:ty, $collection:expr) => {
    impl Record for $ty {
      const COLLECTION: Collection = $collection;

      fn key(&self) -> String {
        self.id.clone()
      }

      fn synced_at(&self) -> Option<i64> {
        self.synced_at
      }

      fn stamp_synced(&mut self, at: i64) {
        self.synced_at = Some(at);
      }
    }
  };
}

impl_record!(CachedVehicle, Collection::Vehicles);
impl_record!(CachedProduct, Collection::Products);
impl_record!(CachedCustomer, Collection::Customers);
impl_record!(CachedOrder, Collection::Orders);

impl Record for CachedQuote {
  const COLLECTION: Collection = Collection::Quotes;

  fn key(&self) -> String {
    self.id.clone()
  }

  fn synced_at(&self) -> Option<i64> {
    self.synced_at
  }

  fn stamp_synced(&mut self, at: i64) {
    self.synced_at = Some(at);
  }

  fn is_pending(&self) -> bool {
    self.pending_sync
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn product_price_follows_mode() {
    let mut product = CachedProduct {
      id: "p1".into(),
      name: "Gloss Black".into(),
      price_per_sqft: Some(8.5),
      flat_price: Some(1200.0),
      pricing_mode: PricingMode::PerSqft,
      category: "wrap".into(),
      is_active: true,
      display_order: 1,
      synced_at: None,
    };
    assert_eq!(product.price_for(100.0), 850.0);

    product.pricing_mode = PricingMode::Flat;
    assert_eq!(product.price_for(100.0), 1200.0);
  }

  #[test]
  fn local_ids_are_detected() {
    assert!(is_local_id("local-9f2c"));
    assert!(is_local_id(""));
    assert!(!is_local_id("3c1e6a"));
  }

  #[test]
  fn quote_serializes_camel_case_pending_flag() {
    let value = serde_json::json!({
      "id": "q1",
      "customerName": "Dana",
      "customerEmail": null,
      "vehicleYear": "2021",
      "vehicleMake": "Ford",
      "vehicleModel": "Transit",
      "sqft": 240.0,
      "productId": null,
      "productName": null,
      "totalPrice": 2040.0,
      "status": "draft",
      "createdAt": 1,
      "updatedAt": 1,
      "syncedAt": null
    });
    let quote: CachedQuote = serde_json::from_value(value).unwrap_or_else(|e| panic!("{e}"));
    assert!(!quote.pending_sync);
    assert!(!quote.is_pending());
  }
}
