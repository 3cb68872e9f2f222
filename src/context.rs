//! Session context owning the store, outbox, monitor, engine and scheduler.
//!
//! Each context is independent: tests build as many as they like, the binary
//! builds one per session and tears it down on exit.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::network::{spawn_probe, NetworkMonitor};
use crate::outbox::Outbox;
use crate::query::Queries;
use crate::remote::Backend;
use crate::store::Store;
use crate::sync::{spawn_connectivity_listener, Scheduler, SyncEngine};
use crate::writer::LocalWriter;

/// Background tasks started by [`SyncContext::start`].
#[derive(Default)]
struct Tasks {
  probe: Option<JoinHandle<()>>,
  listener: Option<JoinHandle<()>>,
}

pub struct SyncContext {
  engine: Arc<SyncEngine>,
  backend: Arc<dyn Backend>,
  scheduler: Scheduler,
  tasks: Mutex<Tasks>,
}

impl SyncContext {
  /// Open the store at `path` and build a context around it.
  pub fn open(path: &Path, backend: Arc<dyn Backend>, config: SyncConfig) -> Result<Self> {
    let store = Arc::new(Store::open(path)?);
    Ok(Self::with_store(store, backend, config))
  }

  /// Build a context around an already opened store. Starts offline.
  pub fn with_store(store: Arc<Store>, backend: Arc<dyn Backend>, config: SyncConfig) -> Self {
    let monitor = Arc::new(NetworkMonitor::new(false));
    let engine = Arc::new(SyncEngine::new(store, Arc::clone(&backend), monitor, config));
    Self {
      engine,
      backend,
      scheduler: Scheduler::new(),
      tasks: Mutex::new(Tasks::default()),
    }
  }

  pub fn engine(&self) -> &Arc<SyncEngine> {
    &self.engine
  }

  pub fn store(&self) -> &Arc<Store> {
    self.engine.store()
  }

  pub fn outbox(&self) -> &Outbox {
    self.engine.outbox()
  }

  pub fn monitor(&self) -> &Arc<NetworkMonitor> {
    self.engine.monitor()
  }

  pub fn scheduler(&self) -> &Scheduler {
    &self.scheduler
  }

  pub fn writer(&self) -> LocalWriter {
    LocalWriter::new(Arc::clone(self.store()))
  }

  pub fn queries(&self) -> Queries {
    Queries::new(Arc::clone(self.store()))
  }

  /// Start the connectivity probe, the reconnect listener and the scheduler.
  ///
  /// Calling it again while running does nothing.
  pub fn start(&self) {
    let config = self.engine.config().clone();
    let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());

    if tasks.listener.is_none() {
      tasks.listener = Some(spawn_connectivity_listener(Arc::clone(&self.engine)));
    }
    if tasks.probe.is_none() {
      tasks.probe = Some(spawn_probe(
        Arc::clone(self.monitor()),
        Arc::clone(&self.backend),
        config.probe_interval(),
        config.request_timeout(),
      ));
    }
    self.scheduler.start(Arc::clone(&self.engine), config.interval());
  }

  /// Stop every background task. Safe to call more than once.
  pub fn shutdown(&self) {
    let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
    let mut stopped = self.scheduler.stop();
    for handle in [tasks.probe.take(), tasks.listener.take()].into_iter().flatten() {
      handle.abort();
      stopped = true;
    }
    if stopped {
      info!("sync context shut down");
    }
  }
}

impl Drop for SyncContext {
  fn drop(&mut self) {
    self.shutdown();
  }
}
