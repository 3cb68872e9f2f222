//! Connectivity tracking.
//!
//! The monitor is the single source of truth for online/offline state. It
//! knows nothing about syncing: transitions are published as
//! [`ConnectivityChanged`] events and subscribers decide what to do.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::remote::Backend;

/// Emitted on every online/offline transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectivityChanged {
  pub online: bool,
}

pub struct NetworkMonitor {
  state: watch::Sender<bool>,
  events: broadcast::Sender<ConnectivityChanged>,
}

impl NetworkMonitor {
  pub fn new(initially_online: bool) -> Self {
    let (state, _) = watch::channel(initially_online);
    let (events, _) = broadcast::channel(16);
    Self { state, events }
  }

  pub fn is_online(&self) -> bool {
    *self.state.borrow()
  }

  /// Record the current connectivity. Returns true when this was a transition.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.state.send_if_modified(|current| {
      if *current == online {
        return false;
      }
      *current = online;
      true
    });

    if changed {
      info!(online, "connectivity changed");
      // No subscribers is fine
      let _ = self.events.send(ConnectivityChanged { online });
    }
    changed
  }

  /// Subscribe to connectivity transitions.
  pub fn subscribe(&self) -> broadcast::Receiver<ConnectivityChanged> {
    self.events.subscribe()
  }

  /// Watch the current state.
  pub fn watch(&self) -> watch::Receiver<bool> {
    self.state.subscribe()
  }
}

impl Default for NetworkMonitor {
  fn default() -> Self {
    Self::new(false)
  }
}

/// Spawn a task that pings the backend and feeds the monitor.
///
/// A ping that errors or exceeds `timeout` counts as offline.
pub fn spawn_probe(
  monitor: Arc<NetworkMonitor>,
  backend: Arc<dyn Backend>,
  every: Duration,
  timeout: Duration,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
      ticker.tick().await;
      let online = matches!(time::timeout(timeout, backend.ping()).await, Ok(Ok(())));
      debug!(online, "connectivity probe");
      monitor.set_online(online);
    }
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn set_online_reports_transitions_only() {
    let monitor = NetworkMonitor::new(false);
    assert!(!monitor.is_online());
    assert!(monitor.set_online(true));
    assert!(!monitor.set_online(true));
    assert!(monitor.is_online());
    assert!(monitor.set_online(false));
  }

  #[tokio::test]
  async fn subscribers_receive_typed_events() {
    let monitor = NetworkMonitor::new(false);
    let mut events = monitor.subscribe();

    monitor.set_online(true);
    monitor.set_online(true);
    monitor.set_online(false);

    assert_eq!(events.recv().await.unwrap(), ConnectivityChanged { online: true });
    assert_eq!(events.recv().await.unwrap(), ConnectivityChanged { online: false });
    assert!(events.try_recv().is_err());
  }

  #[tokio::test]
  async fn watch_sees_latest_state() {
    let monitor = NetworkMonitor::new(true);
    let rx = monitor.watch();
    monitor.set_online(false);
    assert!(!*rx.borrow());
  }
}
