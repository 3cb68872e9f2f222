use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::engine::SyncEngine;

/// Recurring push drain.
///
/// Each tick, while online, re-enables dead-lettered entries whose backoff
/// elapsed and drains the outbox. The drain is awaited inside the tick, so a
/// slow drain delays the next tick instead of overlapping it.
#[derive(Default)]
pub struct Scheduler {
  task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
  pub fn new() -> Self {
    Self::default()
  }

  /// Start ticking every `every`. Returns false (and does nothing) if already running.
  pub fn start(&self, engine: Arc<SyncEngine>, every: Duration) -> bool {
    let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
    if task.as_ref().is_some_and(|t| !t.is_finished()) {
      return false;
    }

    info!(interval_secs = every.as_secs(), "sync scheduler started");
    *task = Some(tokio::spawn(async move {
      let mut ticker = time::interval_at(Instant::now() + every, every);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        if !engine.is_online() {
          debug!("offline, scheduled drain skipped");
          continue;
        }

        if let Err(e) = engine.revive_dead_letters() {
          warn!(error = %e, "failed to revive dead-lettered entries");
        }
        if let Err(e) = engine.sync_pending_changes().await {
          warn!(error = %e, "scheduled drain failed");
        }
      }
    }));
    true
  }

  /// Stop ticking. Returns false if it was not running.
  pub fn stop(&self) -> bool {
    let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
    match task.take() {
      Some(handle) => {
        handle.abort();
        info!("sync scheduler stopped");
        true
      }
      None => false,
    }
  }

  pub fn is_running(&self) -> bool {
    let task = self.task.lock().unwrap_or_else(|e| e.into_inner());
    task.as_ref().is_some_and(|t| !t.is_finished())
  }
}

impl Drop for Scheduler {
  fn drop(&mut self) {
    if let Ok(mut task) = self.task.lock() {
      if let Some(handle) = task.take() {
        handle.abort();
      }
    }
  }
}
