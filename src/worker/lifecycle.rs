//! Worker state machine and the registration that drives it.

use color_eyre::Result;
use std::fmt;
use tracing::{info, warn};

use super::handlers::OfflineWorker;
use super::message::LifecycleSignal;
use crate::cache::{CacheStorage, Served};
use crate::net::{Network, Request};

/// Lifecycle states of a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Unregistered,
  /// Install handler is running
  Installing,
  /// Installed, waiting for the active worker to release control
  Installed,
  /// Activate handler is running
  Activating,
  /// Controlling clients and receiving fetch events
  Active,
  /// Install failed, or replaced by a newer worker
  Redundant,
}

impl WorkerState {
  /// Check if this state receives fetch events
  pub fn can_intercept_fetch(&self) -> bool {
    matches!(self, WorkerState::Active)
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkerState::Unregistered => write!(f, "unregistered"),
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Activating => write!(f, "activating"),
      WorkerState::Active => write!(f, "active"),
      WorkerState::Redundant => write!(f, "redundant"),
    }
  }
}

/// Registration for one scope: at most one active and one waiting worker.
///
/// Handlers return [`LifecycleSignal`]s; the registration applies them.
pub struct Registration<S: CacheStorage, N: Network> {
  active: Option<OfflineWorker<S, N>>,
  waiting: Option<OfflineWorker<S, N>>,
  clients_claimed: bool,
}

impl<S: CacheStorage + 'static, N: Network> Default for Registration<S, N> {
  fn default() -> Self {
    Self::new()
  }
}

impl<S: CacheStorage + 'static, N: Network> Registration<S, N> {
  pub fn new() -> Self {
    Self {
      active: None,
      waiting: None,
      clients_claimed: false,
    }
  }

  pub fn active(&self) -> Option<&OfflineWorker<S, N>> {
    self.active.as_ref()
  }

  pub fn waiting(&self) -> Option<&OfflineWorker<S, N>> {
    self.waiting.as_ref()
  }

  /// State of the most recent worker in this registration.
  pub fn state(&self) -> WorkerState {
    if self.waiting.is_some() {
      WorkerState::Installed
    } else if self.active.is_some() {
      WorkerState::Active
    } else {
      WorkerState::Unregistered
    }
  }

  /// Whether the active worker has claimed the open clients.
  pub fn clients_claimed(&self) -> bool {
    self.clients_claimed
  }

  /// Install `worker` and, if it asks to (or nothing is active yet), activate it.
  ///
  /// Used both for first registration and for updates after a version
  /// change. A worker whose install fails is discarded as redundant and the
  /// current active worker keeps control.
  pub async fn register(&mut self, worker: OfflineWorker<S, N>) -> Result<WorkerState> {
    let version = worker.config().version.clone();
    info!(cache = %version, state = %WorkerState::Installing, "Worker state changed");

    let signal = match worker.install().await {
      Ok(signal) => signal,
      Err(e) => {
        warn!(cache = %version, state = %WorkerState::Redundant, "Worker state changed");
        return Err(e);
      }
    };

    if let Some(previous) = self.waiting.replace(worker) {
      info!(cache = %previous.config().version, state = %WorkerState::Redundant, "Worker state changed");
    }
    info!(cache = %version, state = %WorkerState::Installed, "Worker state changed");

    if signal == LifecycleSignal::SkipWaiting || self.active.is_none() {
      self.activate_waiting().await?;
    }

    Ok(self.state())
  }

  /// Promote the waiting worker to active.
  ///
  /// The worker becomes active even if its activate handler fails; the
  /// error is still returned.
  pub async fn activate_waiting(&mut self) -> Result<bool> {
    let Some(worker) = self.waiting.take() else {
      return Ok(false);
    };
    let version = worker.config().version.clone();
    info!(cache = %version, state = %WorkerState::Activating, "Worker state changed");

    let outcome = worker.activate().await;

    if let Some(previous) = self.active.replace(worker) {
      info!(cache = %previous.config().version, state = %WorkerState::Redundant, "Worker state changed");
    }
    self.clients_claimed = false;
    info!(cache = %version, state = %WorkerState::Active, "Worker state changed");

    if outcome? == LifecycleSignal::ClaimClients {
      self.clients_claimed = true;
    }
    Ok(true)
  }

  /// Deliver a message to the waiting worker, or the active one if none waits.
  pub async fn post_message(&mut self, payload: &serde_json::Value) -> Result<Option<LifecycleSignal>> {
    let signal = match self.waiting.as_ref().or(self.active.as_ref()) {
      Some(worker) => worker.message(payload),
      None => return Ok(None),
    };

    if signal == Some(LifecycleSignal::SkipWaiting) {
      self.activate_waiting().await?;
    }
    Ok(signal)
  }

  /// Route a fetch event to the active worker.
  ///
  /// `None` means the request was not intercepted.
  pub async fn fetch(&self, request: &Request) -> Result<Option<Served>> {
    match &self.active {
      Some(worker) => worker.fetch(request).await,
      None => Ok(None),
    }
  }

  /// Route a background-sync event to the active worker.
  pub async fn sync(&self, tag: &str) -> Result<()> {
    match &self.active {
      Some(worker) => worker.sync(tag).await,
      None => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, ResponseSource};
  use crate::net::Destination;
  use crate::worker::handlers::tests::{site, worker_with};
  use serde_json::json;
  use std::sync::Arc;

  #[tokio::test]
  async fn test_register_installs_and_activates() {
    let storage = Arc::new(MemoryStorage::new());
    let mut registration = Registration::new();
    assert_eq!(registration.state(), WorkerState::Unregistered);

    let state = registration
      .register(worker_with("v2-1-8", storage.clone(), site()))
      .await
      .unwrap();

    assert_eq!(state, WorkerState::Active);
    assert!(state.can_intercept_fetch());
    assert!(registration.clients_claimed());
    assert!(registration.waiting().is_none());
    assert_eq!(storage.keys().unwrap(), vec!["v2-1-8"]);
  }

  #[tokio::test]
  async fn test_version_bump_replaces_old_generation() {
    let storage = Arc::new(MemoryStorage::new());
    let network = site();
    let mut registration = Registration::new();

    registration
      .register(worker_with("v2-1-7", storage.clone(), network.clone()))
      .await
      .unwrap();
    registration
      .register(worker_with("v2-1-8", storage.clone(), network))
      .await
      .unwrap();

    assert_eq!(
      registration.active().map(|w| w.config().version.as_str()),
      Some("v2-1-8")
    );
    assert_eq!(storage.keys().unwrap(), vec!["v2-1-8"]);
  }

  #[tokio::test]
  async fn test_failed_update_keeps_previous_worker() {
    let storage = Arc::new(MemoryStorage::new());
    let mut registration = Registration::new();
    registration
      .register(worker_with("v2-1-7", storage.clone(), site()))
      .await
      .unwrap();

    let broken = site();
    broken.set_offline(true);
    assert!(registration
      .register(worker_with("v2-1-8", storage.clone(), broken))
      .await
      .is_err());

    assert_eq!(registration.state(), WorkerState::Active);
    assert_eq!(
      registration.active().map(|w| w.config().version.as_str()),
      Some("v2-1-7")
    );
    // Failed generation holds no entries; the old one is untouched
    assert!(storage.entries("v2-1-8").unwrap().is_empty());
    assert!(!storage.entries("v2-1-7").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_fetch_routes_to_active_worker_only() {
    let storage = Arc::new(MemoryStorage::new());
    let mut registration = Registration::new();
    let request = Request::parse("http://localhost:8080/index.html")
      .unwrap()
      .with_destination(Destination::Document);

    assert!(registration.fetch(&request).await.unwrap().is_none());

    registration
      .register(worker_with("v1", storage, site()))
      .await
      .unwrap();
    let served = registration.fetch(&request).await.unwrap().unwrap();
    assert_eq!(served.source, ResponseSource::Cache);

    registration.sync("background-sync").await.unwrap();
  }

  #[tokio::test]
  async fn test_messages_without_waiting_worker() {
    let mut registration: Registration<MemoryStorage, _> = Registration::new();
    assert_eq!(
      registration
        .post_message(&json!({ "type": "SKIP_WAITING" }))
        .await
        .unwrap(),
      None
    );

    registration
      .register(worker_with("v1", Arc::new(MemoryStorage::new()), site()))
      .await
      .unwrap();
    let signal = registration
      .post_message(&json!({ "type": "SKIP_WAITING" }))
      .await
      .unwrap();
    assert_eq!(signal, Some(LifecycleSignal::SkipWaiting));
    assert_eq!(registration.state(), WorkerState::Active);
  }
}
