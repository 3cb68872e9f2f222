//! Serde-deserializable types matching server table rows.
//!
//! These types are separate from the cached shapes to allow lenient
//! deserialization (numbers sent as strings, ids sent as numbers) while
//! keeping the cached types focused on what the app reads offline.

use chrono::DateTime;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::model::{
  CachedCustomer, CachedOrder, CachedProduct, CachedQuote, CachedVehicle, PanelMeasurements,
  PricingMode,
};

// ============================================================================
// Lenient field decoders
// ============================================================================

/// Coerce a JSON value to a number, accepting numeric strings.
pub fn coerce_f64(value: &Value) -> Option<f64> {
  match value {
    Value::Number(n) => n.as_f64(),
    Value::String(s) => s.trim().parse().ok(),
    _ => None,
  }
}

/// Coerce a JSON value to a string, accepting numbers.
pub fn coerce_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
  D: Deserializer<'de>,
{
  let v = Option::<Value>::deserialize(deserializer)?;
  Ok(v.as_ref().and_then(coerce_f64))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let v = Option::<Value>::deserialize(deserializer)?;
  Ok(v.as_ref().and_then(coerce_string))
}

fn required_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  let v = Value::deserialize(deserializer)?;
  coerce_string(&v).ok_or_else(|| serde::de::Error::custom("row id must be a string or number"))
}

/// Parse an ISO 8601 timestamp to epoch millis.
fn iso_to_millis(s: Option<&str>) -> Option<i64> {
  s.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    .map(|dt| dt.timestamp_millis())
}

// ============================================================================
// Vehicles
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiVehicle {
  #[serde(deserialize_with = "required_id")]
  pub id: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub make: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub model: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub year: Option<String>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub side_width: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub side_height: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub side_sqft: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub back_width: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub back_height: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub back_sqft: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub hood_width: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub hood_length: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub hood_sqft: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub roof_width: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub roof_length: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub roof_sqft: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub total_sqft: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub corrected_sqft: Option<f64>,
}

impl From<ApiVehicle> for CachedVehicle {
  fn from(v: ApiVehicle) -> Self {
    CachedVehicle {
      id: v.id,
      make: v.make.unwrap_or_default(),
      model: v.model.unwrap_or_default(),
      year: v.year,
      panels: PanelMeasurements {
        side_width: v.side_width,
        side_height: v.side_height,
        side_sqft: v.side_sqft,
        back_width: v.back_width,
        back_height: v.back_height,
        back_sqft: v.back_sqft,
        hood_width: v.hood_width,
        hood_length: v.hood_length,
        hood_sqft: v.hood_sqft,
        roof_width: v.roof_width,
        roof_length: v.roof_length,
        roof_sqft: v.roof_sqft,
      },
      total_sqft: v.total_sqft,
      corrected_sqft: v.corrected_sqft,
      synced_at: None,
    }
  }
}

// ============================================================================
// Products
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiProduct {
  #[serde(deserialize_with = "required_id")]
  pub id: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub product_name: Option<String>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub price_per_sqft: Option<f64>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub flat_price: Option<f64>,
  pub pricing_type: Option<String>,
  pub category: Option<String>,
  #[serde(default)]
  pub is_active: Option<bool>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub display_order: Option<f64>,
}

impl From<ApiProduct> for CachedProduct {
  fn from(p: ApiProduct) -> Self {
    let pricing_mode = match p.pricing_type.as_deref() {
      Some("flat") => PricingMode::Flat,
      _ => PricingMode::PerSqft,
    };
    CachedProduct {
      id: p.id,
      name: p.product_name.unwrap_or_default(),
      price_per_sqft: p.price_per_sqft,
      flat_price: p.flat_price,
      pricing_mode,
      category: p.category.unwrap_or_else(|| "uncategorized".to_string()),
      is_active: p.is_active.unwrap_or(true),
      display_order: p.display_order.map(|n| n as i64).unwrap_or(0),
      synced_at: None,
    }
  }
}

// ============================================================================
// Customers
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiCustomer {
  #[serde(deserialize_with = "required_id")]
  pub id: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub name: Option<String>,
  pub email: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub phone: Option<String>,
  pub company: Option<String>,
  pub source: Option<String>,
  #[serde(default)]
  pub tags: Option<Vec<String>>,
}

impl From<ApiCustomer> for CachedCustomer {
  fn from(c: ApiCustomer) -> Self {
    CachedCustomer {
      id: c.id,
      name: c.name.unwrap_or_default(),
      email: c.email,
      phone: c.phone,
      company: c.company,
      source: c.source,
      tags: c.tags.unwrap_or_default(),
      synced_at: None,
    }
  }
}

// ============================================================================
// Quotes
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiQuote {
  #[serde(deserialize_with = "required_id")]
  pub id: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub customer_name: Option<String>,
  pub customer_email: Option<String>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub vehicle_year: Option<String>,
  pub vehicle_make: Option<String>,
  pub vehicle_model: Option<String>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub sqft: Option<f64>,
  #[serde(default, deserialize_with = "lenient_string")]
  pub product_id: Option<String>,
  pub product_name: Option<String>,
  #[serde(default, deserialize_with = "lenient_f64")]
  pub total_price: Option<f64>,
  pub status: Option<String>,
  pub created_at: Option<String>,
  pub updated_at: Option<String>,
}

impl From<ApiQuote> for CachedQuote {
  fn from(q: ApiQuote) -> Self {
    let created_at = iso_to_millis(q.created_at.as_deref()).unwrap_or(0);
    CachedQuote {
      id: q.id,
      customer_name: q.customer_name.unwrap_or_default(),
      customer_email: q.customer_email,
      vehicle_year: q.vehicle_year,
      vehicle_make: q.vehicle_make,
      vehicle_model: q.vehicle_model,
      sqft: q.sqft,
      product_id: q.product_id,
      product_name: q.product_name,
      total_price: q.total_price.unwrap_or(0.0),
      status: q.status.unwrap_or_else(|| "draft".to_string()),
      created_at,
      updated_at: iso_to_millis(q.updated_at.as_deref()).unwrap_or(created_at),
      synced_at: None,
      pending_sync: false,
    }
  }
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiOrder {
  #[serde(deserialize_with = "required_id")]
  pub id: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub order_number: Option<String>,
  pub customer_name: Option<String>,
  pub customer_email: Option<String>,
  pub product_type: Option<String>,
  pub status: Option<String>,
  pub priority: Option<String>,
  pub vehicle_info: Option<Value>,
  pub timeline: Option<Value>,
  pub created_at: Option<String>,
}

impl From<ApiOrder> for CachedOrder {
  fn from(o: ApiOrder) -> Self {
    CachedOrder {
      order_number: o.order_number.unwrap_or_else(|| o.id.clone()),
      id: o.id,
      customer_name: o.customer_name,
      customer_email: o.customer_email,
      product_type: o.product_type,
      status: o.status.unwrap_or_else(|| "pending".to_string()),
      priority: o.priority,
      vehicle: o.vehicle_info,
      timeline: o.timeline,
      created_at: o.created_at,
      synced_at: None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn coerces_numeric_strings() {
    assert_eq!(coerce_f64(&json!("12.5")), Some(12.5));
    assert_eq!(coerce_f64(&json!(3)), Some(3.0));
    assert_eq!(coerce_f64(&json!("n/a")), None);
    assert_eq!(coerce_string(&json!(42)), Some("42".to_string()));
  }

  #[test]
  fn vehicle_row_maps_panels() {
    let row: ApiVehicle = serde_json::from_value(json!({
      "id": 7,
      "make": "Ford",
      "model": "Transit",
      "year": 2020,
      "side_width": "180",
      "side_sqft": 95.5,
      "total_sqft": "310.2"
    }))
    .unwrap();
    let v = CachedVehicle::from(row);
    assert_eq!(v.id, "7");
    assert_eq!(v.year.as_deref(), Some("2020"));
    assert_eq!(v.panels.side_width, Some(180.0));
    assert_eq!(v.panels.side_sqft, Some(95.5));
    assert_eq!(v.total_sqft, Some(310.2));
    assert_eq!(v.panels.roof_sqft, None);
  }

  #[test]
  fn product_row_maps_pricing_mode() {
    let row: ApiProduct = serde_json::from_value(json!({
      "id": "p1",
      "product_name": "Chrome Delete",
      "flat_price": "450",
      "pricing_type": "flat",
      "category": "add-on",
      "display_order": 3
    }))
    .unwrap();
    let p = CachedProduct::from(row);
    assert_eq!(p.pricing_mode, PricingMode::Flat);
    assert_eq!(p.flat_price, Some(450.0));
    assert!(p.is_active);
    assert_eq!(p.display_order, 3);
  }

  #[test]
  fn quote_row_parses_timestamps() {
    let row: ApiQuote = serde_json::from_value(json!({
      "id": "q1",
      "customer_name": "Dana",
      "total_price": "1999.99",
      "status": "sent",
      "created_at": "2024-03-01T12:00:00Z"
    }))
    .unwrap();
    let q = CachedQuote::from(row);
    assert_eq!(q.total_price, 1999.99);
    assert_eq!(q.created_at, 1_709_294_400_000);
    assert_eq!(q.updated_at, q.created_at);
    assert!(!q.pending_sync);
  }

  #[test]
  fn null_text_fields_decode_to_defaults() {
    let quote: ApiQuote =
      serde_json::from_value(json!({"id": "q1", "customer_name": null, "status": "sent"})).unwrap();
    let quote = CachedQuote::from(quote);
    assert_eq!(quote.customer_name, "");
    assert_eq!(quote.status, "sent");

    let vehicle: ApiVehicle =
      serde_json::from_value(json!({"id": "v1", "make": null, "model": null})).unwrap();
    let vehicle = CachedVehicle::from(vehicle);
    assert_eq!((vehicle.make.as_str(), vehicle.model.as_str()), ("", ""));

    let product: ApiProduct =
      serde_json::from_value(json!({"id": "p1", "product_name": null, "is_active": null})).unwrap();
    let product = CachedProduct::from(product);
    assert_eq!(product.name, "");
    assert!(product.is_active);

    let inactive: ApiProduct = serde_json::from_value(json!({"id": "p2", "is_active": false})).unwrap();
    assert!(!CachedProduct::from(inactive).is_active);

    let customer: ApiCustomer = serde_json::from_value(json!({"id": "c1", "name": null})).unwrap();
    assert_eq!(CachedCustomer::from(customer).name, "");
  }

  #[test]
  fn order_number_falls_back_to_id() {
    let row: ApiOrder = serde_json::from_value(json!({"id": 55, "status": "in_production"})).unwrap();
    let o = CachedOrder::from(row);
    assert_eq!(o.order_number, "55");
    assert_eq!(o.status, "in_production");
  }
}
