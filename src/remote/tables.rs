//! Server tables pulled into each cached collection.

use crate::store::Collection;

/// A snapshot read of one server table.
///
/// Filters use PostgREST operator syntax (`("active", "eq.true")`); the pull
/// is always a bounded full-collection refresh, never a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableQuery {
  pub table: &'static str,
  pub filters: Vec<(&'static str, String)>,
  pub order: Option<&'static str>,
  pub limit: usize,
}

impl TableQuery {
  pub fn new(table: &'static str) -> Self {
    Self {
      table,
      filters: Vec::new(),
      order: None,
      limit: 500,
    }
  }

  pub fn filter(mut self, column: &'static str, op: impl Into<String>) -> Self {
    self.filters.push((column, op.into()));
    self
  }

  pub fn order(mut self, order: &'static str) -> Self {
    self.order = Some(order);
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = limit;
    self
  }
}

/// Server table backing an outbound collection.
pub fn server_table(collection: Collection) -> Option<&'static str> {
  match collection {
    Collection::Vehicles => Some("vehicles"),
    Collection::Products => Some("products"),
    Collection::Customers => Some("customers"),
    Collection::Quotes => Some("quotes"),
    Collection::Orders => Some("orders"),
    Collection::Outbox | Collection::SyncMeta => None,
  }
}

/// Snapshot query used to refresh a cached collection.
pub fn pull_query(collection: Collection) -> Option<TableQuery> {
  let query = match collection {
    Collection::Vehicles => TableQuery::new("vehicles")
      .order("make.asc,model.asc")
      .limit(500),
    Collection::Products => TableQuery::new("products")
      .filter("is_active", "eq.true")
      .order("display_order.asc")
      .limit(500),
    Collection::Customers => TableQuery::new("customers")
      .order("created_at.desc")
      .limit(500),
    Collection::Quotes => TableQuery::new("quotes")
      .filter("is_hidden", "eq.false")
      .order("created_at.desc")
      .limit(200),
    Collection::Orders => TableQuery::new("orders")
      .filter("payment_status", "eq.paid")
      .order("created_at.desc")
      .limit(200),
    Collection::Outbox | Collection::SyncMeta => return None,
  };
  Some(query)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn every_record_collection_has_a_pull_query() {
    for c in Collection::RECORDS {
      let q = pull_query(c).unwrap();
      assert!(q.limit > 0 && q.limit <= 500);
      assert_eq!(Some(q.table), server_table(c));
    }
    assert!(pull_query(Collection::Outbox).is_none());
  }
}
