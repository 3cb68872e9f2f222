//! Read-side helpers over the local store.
//!
//! Everything here is answered from the store's indexes (or a scan of one
//! collection), so it works the same online and offline.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::error::Result;
use crate::model::{CachedCustomer, CachedOrder, CachedProduct, CachedQuote, CachedVehicle};
use crate::store::Store;

#[derive(Clone)]
pub struct Queries {
  store: Arc<Store>,
}

impl Queries {
  pub fn new(store: Arc<Store>) -> Self {
    Self { store }
  }

  // ==========================================================================
  // Vehicles
  // ==========================================================================

  pub fn vehicles_by_make(&self, make: &str) -> Result<Vec<CachedVehicle>> {
    self.store.get_all_by_index("make", &json!(make))
  }

  /// Uses the composite (make, model) index.
  pub fn vehicles_by_make_model(&self, make: &str, model: &str) -> Result<Vec<CachedVehicle>> {
    self.store.get_all_by_index("make_model", &json!([make, model]))
  }

  /// Distinct makes, sorted.
  pub fn vehicle_makes(&self) -> Result<Vec<String>> {
    let mut makes: Vec<String> = self
      .store
      .get_all::<CachedVehicle>()?
      .into_iter()
      .map(|v| v.make)
      .collect();
    makes.sort();
    makes.dedup();
    Ok(makes)
  }

  // ==========================================================================
  // Products
  // ==========================================================================

  /// Active products in a category, in display order.
  pub fn products_by_category(&self, category: &str) -> Result<Vec<CachedProduct>> {
    let products = self.store.get_all_by_index("category", &json!(category))?;
    Ok(active_in_display_order(products))
  }

  /// All active products, in display order.
  pub fn active_products(&self) -> Result<Vec<CachedProduct>> {
    Ok(active_in_display_order(self.store.get_all()?))
  }

  // ==========================================================================
  // Customers
  // ==========================================================================

  /// Exact email lookup. Emails are compared as stored.
  pub fn customer_by_email(&self, email: &str) -> Result<Option<CachedCustomer>> {
    let mut found: Vec<CachedCustomer> = self.store.get_all_by_index("email", &json!(email))?;
    Ok(if found.is_empty() { None } else { Some(found.remove(0)) })
  }

  pub fn customers_by_name(&self, name: &str) -> Result<Vec<CachedCustomer>> {
    self.store.get_all_by_index("name", &json!(name))
  }

  /// Case-insensitive substring match on name or email.
  ///
  /// A blank term matches every customer.
  pub fn search_customers(&self, term: &str) -> Result<Vec<CachedCustomer>> {
    let needle = term.trim().to_lowercase();
    let customers: Vec<CachedCustomer> = self.store.get_all()?;
    if needle.is_empty() {
      return Ok(customers);
    }

    Ok(
      customers
        .into_iter()
        .filter(|c| {
          c.name.to_lowercase().contains(&needle)
            || c
              .email
              .as_deref()
              .is_some_and(|e| e.to_lowercase().contains(&needle))
        })
        .collect(),
    )
  }

  // ==========================================================================
  // Quotes
  // ==========================================================================

  /// Quotes with the given status, newest first.
  pub fn quotes_by_status(&self, status: &str) -> Result<Vec<CachedQuote>> {
    let mut quotes: Vec<CachedQuote> = self.store.get_all_by_index("status", &json!(status))?;
    quotes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(quotes)
  }

  /// Quotes saved locally that the server has not confirmed yet.
  pub fn pending_quotes(&self) -> Result<Vec<CachedQuote>> {
    self.store.get_all_by_index("pending_sync", &Value::Bool(true))
  }

  pub fn quote(&self, id: &str) -> Result<Option<CachedQuote>> {
    self.store.get(id)
  }

  // ==========================================================================
  // Orders
  // ==========================================================================

  pub fn orders_by_status(&self, status: &str) -> Result<Vec<CachedOrder>> {
    self.store.get_all_by_index("status", &json!(status))
  }

  pub fn order_by_number(&self, order_number: &str) -> Result<Option<CachedOrder>> {
    let mut found: Vec<CachedOrder> = self
      .store
      .get_all_by_index("order_number", &json!(order_number))?;
    Ok(if found.is_empty() { None } else { Some(found.remove(0)) })
  }
}

fn active_in_display_order(products: Vec<CachedProduct>) -> Vec<CachedProduct> {
  let mut active: Vec<CachedProduct> = products.into_iter().filter(|p| p.is_active).collect();
  active.sort_by(|a, b| a.display_order.cmp(&b.display_order).then_with(|| a.name.cmp(&b.name)));
  active
}
