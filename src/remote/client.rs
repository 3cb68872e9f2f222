use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{RequestBuilder, Response};
use serde_json::Value;
use tracing::debug;
use url::Url;

use super::tables::TableQuery;
use crate::config::Config;
use crate::error::{Result, SyncError};

/// Server read/write interface used by the sync engine.
///
/// Methods return boxed futures so the engine can hold the backend as a
/// trait object and swap in mocks for testing.
pub trait Backend: Send + Sync {
  /// Fetch a bounded snapshot of a table.
  fn fetch<'a>(&'a self, query: &'a TableQuery) -> BoxFuture<'a, Result<Vec<Value>>>;

  /// Insert a row; returns the stored row (with its server id).
  fn insert<'a>(&'a self, table: &'a str, row: Value) -> BoxFuture<'a, Result<Value>>;

  /// Update the row with the given id; returns the stored row.
  fn update<'a>(&'a self, table: &'a str, id: &'a str, row: Value) -> BoxFuture<'a, Result<Value>>;

  /// Delete the row with the given id.
  fn delete<'a>(&'a self, table: &'a str, id: &'a str) -> BoxFuture<'a, Result<()>>;

  /// Cheap reachability check.
  fn ping(&self) -> BoxFuture<'_, Result<()>>;
}

/// PostgREST-style HTTP backend
#[derive(Clone)]
pub struct RestBackend {
  http: reqwest::Client,
  base: Url,
  api_key: String,
}

impl RestBackend {
  pub fn new(server_url: &str, api_key: String, timeout: Duration) -> Result<Self> {
    let mut base = Url::parse(server_url)
      .map_err(|e| SyncError::NetworkUnreachable(format!("invalid server url {}: {}", server_url, e)))?;
    if !base.path().ends_with('/') {
      base.set_path(&format!("{}/", base.path()));
    }
    let base = base
      .join("rest/v1/")
      .map_err(|e| SyncError::NetworkUnreachable(format!("invalid server url {}: {}", server_url, e)))?;

    let http = reqwest::Client::builder().timeout(timeout).build()?;

    Ok(Self { http, base, api_key })
  }

  /// Build a backend from configuration and the API key in the environment.
  pub fn from_config(config: &Config) -> color_eyre::Result<Self> {
    let api_key = Config::get_api_key()?;
    Ok(Self::new(
      &config.server.url,
      api_key,
      config.sync.request_timeout(),
    )?)
  }

  fn table_url(&self, table: &str) -> Result<Url> {
    self
      .base
      .join(table)
      .map_err(|e| SyncError::NetworkUnreachable(format!("invalid table {}: {}", table, e)))
  }

  fn row_url(&self, table: &str, id: &str) -> Result<Url> {
    let mut url = self.table_url(table)?;
    url.query_pairs_mut().append_pair("id", &format!("eq.{}", id));
    Ok(url)
  }

  fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
    request
      .header("apikey", &self.api_key)
      .bearer_auth(&self.api_key)
  }

  async fn send(&self, request: RequestBuilder) -> Result<Response> {
    let response = self.authorized(request).send().await?;
    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SyncError::Remote {
      status: status.as_u16(),
      body,
    })
  }
}

/// First row of a `return=representation` response.
fn first_row(rows: Value) -> Value {
  match rows {
    Value::Array(mut rows) if !rows.is_empty() => rows.swap_remove(0),
    Value::Array(_) => Value::Null,
    other => other,
  }
}

impl Backend for RestBackend {
  fn fetch<'a>(&'a self, query: &'a TableQuery) -> BoxFuture<'a, Result<Vec<Value>>> {
    Box::pin(async move {
      let mut url = self.table_url(query.table)?;
      {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("select", "*");
        for (column, op) in &query.filters {
          pairs.append_pair(column, op);
        }
        if let Some(order) = query.order {
          pairs.append_pair("order", order);
        }
        pairs.append_pair("limit", &query.limit.to_string());
      }

      debug!(%url, "fetching table snapshot");
      let response = self.send(self.http.get(url)).await?;
      Ok(response.json::<Vec<Value>>().await?)
    })
  }

  fn insert<'a>(&'a self, table: &'a str, row: Value) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
      let url = self.table_url(table)?;
      let request = self
        .http
        .post(url)
        .header("Prefer", "return=representation")
        .json(&row);
      let response = self.send(request).await?;
      Ok(first_row(response.json().await?))
    })
  }

  fn update<'a>(&'a self, table: &'a str, id: &'a str, row: Value) -> BoxFuture<'a, Result<Value>> {
    Box::pin(async move {
      let url = self.row_url(table, id)?;
      let request = self
        .http
        .patch(url)
        .header("Prefer", "return=representation")
        .json(&row);
      let response = self.send(request).await?;
      Ok(first_row(response.json().await?))
    })
  }

  fn delete<'a>(&'a self, table: &'a str, id: &'a str) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
      let url = self.row_url(table, id)?;
      self.send(self.http.delete(url)).await?;
      Ok(())
    })
  }

  fn ping(&self) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
      let response = self.authorized(self.http.get(self.base.clone())).send().await?;
      if response.status().is_server_error() {
        return Err(SyncError::Remote {
          status: response.status().as_u16(),
          body: "health check failed".to_string(),
        });
      }
      Ok(())
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn backend(url: &str) -> RestBackend {
    RestBackend::new(url, "key".to_string(), Duration::from_secs(1)).unwrap()
  }

  #[test]
  fn base_url_points_at_rest_root() {
    assert_eq!(backend("https://shop.example.co").base.as_str(), "https://shop.example.co/rest/v1/");
    assert_eq!(backend("https://example.co/api").base.as_str(), "https://example.co/api/rest/v1/");
  }

  #[test]
  fn row_url_filters_by_id() {
    let url = backend("https://example.co").row_url("quotes", "abc").unwrap();
    assert_eq!(url.as_str(), "https://example.co/rest/v1/quotes?id=eq.abc");
  }

  #[test]
  fn invalid_url_is_rejected() {
    assert!(RestBackend::new("not a url", "key".into(), Duration::from_secs(1)).is_err());
  }

  #[test]
  fn first_row_unwraps_representation() {
    assert_eq!(first_row(json!([{"id": 1}, {"id": 2}])), json!({"id": 1}));
    assert_eq!(first_row(json!([])), Value::Null);
    assert_eq!(first_row(json!({"id": 3})), json!({"id": 3}));
  }
}
