//! Pull and push flows of the sync engine.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::handlers::{quotes_handler, PushHandler, PushReceipt};
use super::{DrainReport, PullReport, SkipReason, SyncEvent, SyncStatus};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::loader;
use crate::network::NetworkMonitor;
use crate::now_millis;
use crate::outbox::{self, Action, Outbox, OutboxEntry};
use crate::remote::{pull_query, Backend};
use crate::store::{self, Collection, Store};

/// Meta key holding the time of the last completed pull.
pub const LAST_SYNC_KEY: &str = "lastSync";

/// Clears the in-flight flag when a drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl<'a> DrainGuard<'a> {
  fn acquire(flag: &'a AtomicBool) -> Option<Self> {
    flag
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| DrainGuard(flag))
  }
}

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

/// Orchestrates pulling server state and draining the outbox.
pub struct SyncEngine {
  store: Arc<Store>,
  outbox: Outbox,
  backend: Arc<dyn Backend>,
  monitor: Arc<NetworkMonitor>,
  handlers: RwLock<HashMap<Collection, PushHandler>>,
  draining: AtomicBool,
  config: SyncConfig,
  events: broadcast::Sender<SyncEvent>,
}

impl SyncEngine {
  /// Create an engine with the quotes push handler registered.
  pub fn new(
    store: Arc<Store>,
    backend: Arc<dyn Backend>,
    monitor: Arc<NetworkMonitor>,
    config: SyncConfig,
  ) -> Self {
    let (events, _) = broadcast::channel(64);
    let mut handlers: HashMap<Collection, PushHandler> = HashMap::new();
    handlers.insert(Collection::Quotes, quotes_handler());

    Self {
      outbox: Outbox::new(Arc::clone(&store)),
      store,
      backend,
      monitor,
      handlers: RwLock::new(handlers),
      draining: AtomicBool::new(false),
      config,
      events,
    }
  }

  /// Register (or replace) the push handler for a collection.
  pub fn register_push_handler(&self, collection: Collection, handler: PushHandler) {
    let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
    handlers.insert(collection, handler);
  }

  fn handler_for(&self, collection: Collection) -> Option<PushHandler> {
    let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
    handlers.get(&collection).cloned()
  }

  pub fn store(&self) -> &Arc<Store> {
    &self.store
  }

  pub fn outbox(&self) -> &Outbox {
    &self.outbox
  }

  pub fn monitor(&self) -> &Arc<NetworkMonitor> {
    &self.monitor
  }

  pub fn config(&self) -> &SyncConfig {
    &self.config
  }

  pub fn is_online(&self) -> bool {
    self.monitor.is_online()
  }

  pub fn is_draining(&self) -> bool {
    self.draining.load(Ordering::Acquire)
  }

  /// Subscribe to sync outcomes.
  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.events.subscribe()
  }

  fn emit(&self, event: SyncEvent) {
    // No subscribers is fine
    let _ = self.events.send(event);
  }

  /// Bound a server call by the configured request timeout.
  async fn call<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
    let timeout = self.config.request_timeout();
    match tokio::time::timeout(timeout, fut).await {
      Ok(result) => result,
      Err(_) => Err(SyncError::NetworkUnreachable(format!(
        "request timed out after {}s",
        timeout.as_secs()
      ))),
    }
  }

  /// Ping the server once and record the result on the monitor.
  pub async fn probe(&self, timeout: Duration) -> bool {
    let online = matches!(
      tokio::time::timeout(timeout, self.backend.ping()).await,
      Ok(Ok(()))
    );
    self.monitor.set_online(online);
    online
  }

  // ==========================================================================
  // Pull
  // ==========================================================================

  /// Refresh every cached collection from the server.
  ///
  /// A no-op when offline. Network failures for one entity type are logged
  /// and the remaining types still sync; storage failures abort the pull.
  pub async fn sync_from_server(&self) -> Result<PullReport> {
    if !self.is_online() {
      debug!("offline, skipping pull");
      return Ok(PullReport::skipped());
    }

    let now = now_millis();
    let mut report = PullReport::default();

    for collection in Collection::RECORDS {
      let Some(query) = pull_query(collection) else {
        continue;
      };

      let rows = match self.call(self.backend.fetch(&query)).await {
        Ok(rows) => rows,
        Err(e) => {
          warn!(%collection, error = %e, "pull failed for entity type");
          report.failed.push((collection, e.to_string()));
          continue;
        }
      };

      let stats = loader::cache_rows(&self.store, collection, rows, now)?;
      report.cached.push((collection, stats));
    }

    self.store.set_meta(LAST_SYNC_KEY, &json!(now), now)?;
    report.completed_at = Some(now);

    info!(
      cached = report.cached.len(),
      failed = report.failed.len(),
      "pull complete"
    );
    self.emit(SyncEvent::PullCompleted {
      at: now,
      failed: report.failed.iter().map(|(c, _)| *c).collect(),
    });
    Ok(report)
  }

  /// Time of the last completed pull, in epoch millis.
  pub fn last_sync(&self) -> Result<Option<i64>> {
    Ok(
      self
        .store
        .get_meta(LAST_SYNC_KEY)?
        .and_then(|entry| entry.value.as_i64()),
    )
  }

  // ==========================================================================
  // Push
  // ==========================================================================

  /// Drain the outbox, oldest entry first.
  ///
  /// Skipped when offline or when another drain is in flight. A failing entry
  /// gets its retry counter bumped and the drain moves on; entries that used
  /// up their budget are left in place untouched. Later entries for a record
  /// whose earlier entry did not go through are deferred to keep per-record
  /// order.
  pub async fn sync_pending_changes(&self) -> Result<DrainReport> {
    if !self.is_online() {
      debug!("offline, skipping drain");
      return Ok(DrainReport::skipped(SkipReason::Offline));
    }
    let Some(_guard) = DrainGuard::acquire(&self.draining) else {
      debug!("drain already in flight");
      return Ok(DrainReport::skipped(SkipReason::AlreadyRunning));
    };

    let max_retries = self.config.max_retries;
    let mut report = DrainReport::default();

    // Records with an earlier entry that did not go through this drain
    let mut blocked: HashSet<(Collection, String)> = HashSet::new();

    for listed in self.outbox.list_pending()? {
      // Re-read: an earlier push in this drain may have re-keyed the entry
      let Some(entry) = self.outbox.get(listed.id)? else {
        continue;
      };
      let record = (entry.collection, entry.record_key.clone());
      if blocked.contains(&record) {
        report.deferred.push(entry.id);
        continue;
      }
      if !entry.is_attemptable(max_retries) {
        report.exhausted.push(entry.id);
        blocked.insert(record);
        continue;
      }
      report.attempted += 1;

      let id = entry.id;
      let collection = entry.collection;
      match self.push_entry(entry.clone()).await {
        Ok(receipt) => {
          self.confirm(&entry, &receipt)?;
          debug!(id, %collection, action = %entry.action, "pushed outbox entry");
          report.pushed.push(id);
        }
        Err(e) => {
          warn!(id, %collection, error = %e, "push failed");
          let outcome = self
            .outbox
            .increment_retry(id, max_retries, &e.to_string(), now_millis())?;
          report.failed.push(id);
          blocked.insert(record);
          if outcome.dead_lettered {
            report.dead_lettered.push(id);
            self.emit(SyncEvent::NeedsAttention {
              entry_id: id,
              collection,
              error: e.to_string(),
            });
          }
        }
      }
    }

    if report.attempted > 0 {
      info!(
        pushed = report.pushed.len(),
        failed = report.failed.len(),
        dead_lettered = report.dead_lettered.len(),
        "drain complete"
      );
    }
    self.emit(SyncEvent::DrainCompleted {
      pushed: report.pushed.len(),
      failed: report.failed.len(),
      dead_lettered: report.dead_lettered.len(),
    });
    Ok(report)
  }

  async fn push_entry(&self, entry: OutboxEntry) -> Result<PushReceipt> {
    let Some(handler) = self.handler_for(entry.collection) else {
      return Err(SyncError::NoPushHandler(entry.collection.to_string()));
    };
    self.call(handler(Arc::clone(&self.backend), entry)).await
  }

  /// Remove an accepted entry and reconcile the local record, atomically.
  fn confirm(&self, entry: &OutboxEntry, receipt: &PushReceipt) -> Result<()> {
    self.store.with_transaction(|tx| {
      outbox::delete_entry(tx, entry.id)?;
      if entry.action == Action::Delete {
        return Ok(());
      }

      let server_id = receipt
        .server_id
        .as_deref()
        .filter(|id| *id != entry.record_key);
      let key = server_id.unwrap_or(&entry.record_key);
      if let Some(new_key) = server_id {
        outbox::rekey_entries(tx, entry.collection, &entry.record_key, new_key)?;
      }
      let still_pending = outbox::count_for_record(tx, entry.collection, key)? > 0;
      store::confirm_record(tx, entry.collection, &entry.record_key, server_id, still_pending)?;
      Ok(())
    })
  }

  /// Re-enable dead-lettered entries whose backoff elapsed.
  pub fn revive_dead_letters(&self) -> Result<Vec<i64>> {
    self
      .outbox
      .revive_due(now_millis(), self.config.dead_letter_backoff_ms())
  }

  /// Snapshot of sync health for display.
  pub fn status(&self) -> Result<SyncStatus> {
    Ok(SyncStatus {
      online: self.is_online(),
      last_sync: self.last_sync()?,
      pending: self.outbox.len()?,
      dead_lettered: self.outbox.dead_lettered_count()?,
    })
  }
}

/// Drain the outbox on every offline-to-online transition.
///
/// Subscribes before returning so no transition after this call is missed.
pub fn spawn_connectivity_listener(engine: Arc<SyncEngine>) -> JoinHandle<()> {
  let mut events = engine.monitor().subscribe();
  tokio::spawn(async move {
    loop {
      let online = match events.recv().await {
        Ok(event) => event.online,
        Err(broadcast::error::RecvError::Lagged(_)) => engine.is_online(),
        Err(broadcast::error::RecvError::Closed) => break,
      };
      if !online {
        continue;
      }

      info!("back online, draining outbox");
      if let Err(e) = engine.sync_pending_changes().await {
        warn!(error = %e, "drain after reconnect failed");
      }
    }
  })
}
