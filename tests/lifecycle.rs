mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{context, quote, wait_for_empty_outbox, MockBackend};
use wrapsync::config::SyncConfig;
use wrapsync::model::CachedQuote;
use wrapsync::remote::Backend;
use wrapsync::store::{Store, SCHEMA_VERSION};
use wrapsync::SyncContext;

#[tokio::test(start_paused = true)]
async fn scheduler_start_and_stop_are_idempotent() {
  let backend = MockBackend::new();
  let ctx = context(&backend);
  let every = ctx.engine().config().interval();

  assert!(ctx.scheduler().start(Arc::clone(ctx.engine()), every));
  assert!(!ctx.scheduler().start(Arc::clone(ctx.engine()), every));
  assert!(ctx.scheduler().is_running());

  assert!(ctx.scheduler().stop());
  assert!(!ctx.scheduler().stop());
  assert!(!ctx.scheduler().is_running());
}

#[tokio::test(start_paused = true)]
async fn scheduler_drains_only_while_online() {
  let backend = MockBackend::new();
  let ctx = context(&backend);
  ctx.store().put(&quote("q1", "draft")).unwrap();
  ctx.writer().save_quote(quote("q1", "sent")).unwrap();

  let every = ctx.engine().config().interval();
  ctx.scheduler().start(Arc::clone(ctx.engine()), every);

  // Offline tick leaves the queue alone
  tokio::time::sleep(every + Duration::from_secs(1)).await;
  assert!(backend.calls().is_empty());
  assert_eq!(ctx.outbox().len().unwrap(), 1);

  ctx.monitor().set_online(true);
  tokio::time::sleep(every).await;
  assert_eq!(backend.calls(), vec!["update quotes q1"]);
  assert!(ctx.outbox().is_empty().unwrap());

  ctx.scheduler().stop();
}

#[tokio::test]
async fn started_context_probes_and_drains_then_shuts_down() {
  let backend = MockBackend::new();
  let ctx = context(&backend);
  ctx.store().put(&quote("q1", "draft")).unwrap();
  ctx.writer().save_quote(quote("q1", "sent")).unwrap();

  // The probe finds the server, the reconnect listener drains
  ctx.start();
  wait_for_empty_outbox(&ctx).await;
  assert!(ctx.monitor().is_online());
  assert!(ctx.scheduler().is_running());

  ctx.shutdown();
  ctx.shutdown();
  assert!(!ctx.scheduler().is_running());
}

#[tokio::test]
async fn contexts_are_isolated() {
  let backend = MockBackend::new();
  let a = context(&backend);
  let b = context(&backend);

  a.writer().save_quote(quote("", "draft")).unwrap();
  a.monitor().set_online(true);

  assert_eq!(a.outbox().len().unwrap(), 1);
  assert!(b.outbox().is_empty().unwrap());
  assert!(!b.monitor().is_online());
}

#[tokio::test]
async fn local_writes_survive_a_restart() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("cache.db");
  let backend = MockBackend::new();
  let dyn_backend: Arc<dyn Backend> = backend.clone();

  let saved = {
    let ctx = SyncContext::open(&path, Arc::clone(&dyn_backend), SyncConfig::default()).unwrap();
    ctx.writer().save_quote(quote("", "draft")).unwrap()
  };

  let ctx = SyncContext::open(&path, dyn_backend, SyncConfig::default()).unwrap();
  let read: CachedQuote = ctx.store().get(&saved.id).unwrap().unwrap();
  assert_eq!(read, saved);

  let pending = ctx.outbox().list_pending().unwrap();
  assert_eq!(pending.len(), 1);
  assert_eq!(pending[0].record_key, saved.id);

  ctx.monitor().set_online(true);
  let report = ctx.engine().sync_pending_changes().await.unwrap();
  assert_eq!(report.pushed.len(), 1);
  assert_eq!(backend.calls(), vec!["insert quotes"]);
}

#[test]
fn reopening_an_up_to_date_store_keeps_its_data() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("nested").join("cache.db");

  {
    let store = Store::open(&path).unwrap();
    store.put(&quote("q1", "draft")).unwrap();
  }

  let store = Store::open(&path).unwrap();
  assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);
  assert!(store.get::<CachedQuote>("q1").unwrap().is_some());
}
