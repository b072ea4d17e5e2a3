//! Lifecycle event handlers for the offline worker.

use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::message::{ControlMessage, LifecycleSignal};
use crate::cache::{CacheLayer, CacheStorage, Served};
use crate::config::Config;
use crate::net::{Network, Request};

/// Static configuration handed to the worker at construction.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  /// Name of the current cache generation
  pub version: String,
  /// Requests fetched and stored at install time
  pub precache: Vec<Request>,
  /// Cache key of the offline fallback document
  pub offline_key: String,
  /// Background-sync tag this worker recognises
  pub sync_tag: String,
}

impl WorkerConfig {
  pub fn from_config(config: &Config) -> Result<Self> {
    Ok(Self {
      version: config.precache.version.clone(),
      precache: config.precache_requests()?,
      offline_key: config.offline_key()?,
      sync_tag: config.sync_tag.clone(),
    })
  }
}

/// One instance of the offline worker: the four lifecycle handlers plus the
/// sync hook, bound to a cache generation and a network.
pub struct OfflineWorker<S: CacheStorage, N: Network> {
  config: WorkerConfig,
  cache: CacheLayer<S>,
  network: Arc<N>,
}

impl<S: CacheStorage + 'static, N: Network> OfflineWorker<S, N> {
  pub fn new(config: WorkerConfig, cache: CacheLayer<S>, network: Arc<N>) -> Self {
    Self {
      config,
      cache,
      network,
    }
  }

  pub fn config(&self) -> &WorkerConfig {
    &self.config
  }

  pub fn cache(&self) -> &CacheLayer<S> {
    &self.cache
  }

  /// Install: precache every manifest resource into the current generation.
  ///
  /// Fails as a whole if any resource cannot be fetched; nothing is stored
  /// in that case. Asks to skip waiting on success.
  pub async fn install(&self) -> Result<LifecycleSignal> {
    info!(cache = %self.config.version, "Installing");

    let network = Arc::clone(&self.network);
    let stored = self
      .cache
      .precache(&self.config.version, &self.config.precache, |request| {
        let network = Arc::clone(&network);
        async move { network.fetch(&request).await }
      })
      .await
      .map_err(|e| {
        error!(cache = %self.config.version, error = %e, "Cache failed");
        e.wrap_err(format!("Failed to precache {}", self.config.version))
      })?;

    info!(cache = %self.config.version, entries = stored, "Cached all files");
    Ok(LifecycleSignal::SkipWaiting)
  }

  /// Activate: delete every other cache generation, then claim clients.
  pub async fn activate(&self) -> Result<LifecycleSignal> {
    info!(cache = %self.config.version, "Activating");

    let deleted = self.cache.delete_except(&self.config.version)?;
    debug!(count = deleted.len(), "Old caches cleared");

    info!("Claiming clients");
    Ok(LifecycleSignal::ClaimClients)
  }

  /// Fetch: answer document requests cache-first.
  ///
  /// Returns `None` for requests this worker does not intercept; the host
  /// sends those to the network unmodified.
  pub async fn fetch(&self, request: &Request) -> Result<Option<Served>> {
    if !request.is_document() {
      return Ok(None);
    }

    let served = self
      .cache
      .fetch_document(
        &self.config.version,
        request,
        &self.config.offline_key,
        move || self.network.fetch(request),
      )
      .await?;

    Ok(Some(served))
  }

  /// Background sync. Reserved; the recognised tag is only logged.
  pub async fn sync(&self, tag: &str) -> Result<()> {
    if tag == self.config.sync_tag {
      info!(tag, "Background sync");
    } else {
      debug!(tag, "Ignoring unknown sync tag");
    }
    Ok(())
  }

  /// Message: a `SKIP_WAITING` control message asks for immediate activation.
  pub fn message(&self, payload: &serde_json::Value) -> Option<LifecycleSignal> {
    match ControlMessage::from_payload(payload) {
      Some(ControlMessage::SkipWaiting) => Some(LifecycleSignal::SkipWaiting),
      None => {
        debug!(%payload, "Ignoring message");
        None
      }
    }
  }
}
