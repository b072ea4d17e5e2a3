//! Cache layer that orchestrates caching logic with network fetching.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::storage::CacheStorage;
use super::traits::Served;
use crate::net::{Request, Response};

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the worker's event handlers and the network,
/// providing cache-first reads, write-behind stores and the offline fallback.
pub struct CacheLayer<S: CacheStorage> {
  storage: Arc<S>,
  /// Handles of detached write-behind stores, kept only for `flush`
  pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<S: CacheStorage + 'static> CacheLayer<S> {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: S) -> Self {
    Self::from_shared(Arc::new(storage))
  }

  /// Create a cache layer over storage that is shared with other owners.
  pub fn from_shared(storage: Arc<S>) -> Self {
    Self {
      storage,
      pending: Arc::new(Mutex::new(Vec::new())),
    }
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Fetch every request and store all responses in `cache_name`.
  ///
  /// Nothing is written unless every fetch resolves with a 2xx status.
  /// Returns the number of entries stored.
  pub async fn precache<F, Fut>(
    &self,
    cache_name: &str,
    requests: &[Request],
    fetcher: F,
  ) -> Result<usize>
  where
    F: Fn(Request) -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    self.storage.open(cache_name)?;

    let entries = try_join_all(requests.iter().map(|request| {
      let key = request.cache_key();
      let response = fetcher(request.clone());
      async move {
        let response = response.await?;
        if !response.is_ok() {
          return Err(eyre!(
            "Precache request for {} failed with status {}",
            key,
            response.status
          ));
        }
        Ok((key, response))
      }
    }))
    .await?;

    self.storage.put_all(cache_name, &entries)?;
    Ok(entries.len())
  }

  /// Serve a document request with a cache-first strategy.
  ///
  /// 1. Check cache - if present, return it (no revalidation)
  /// 2. Otherwise fetch from network; a 200 is stored behind the caller's back
  /// 3. On network failure, return the cached `fallback_key` (offline mode)
  pub async fn fetch_document<F, Fut>(
    &self,
    cache_name: &str,
    request: &Request,
    fallback_key: &str,
    fetcher: F,
  ) -> Result<Served>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Response>>,
  {
    let key = request.cache_key();

    if let Some(cached) = self.storage.match_request(cache_name, &key)? {
      debug!(url = %key, "Serving from cache");
      return Ok(Served::from_cache(cached));
    }

    debug!(url = %key, "Fetching from network");
    match fetcher().await {
      Ok(response) => {
        if response.status == 200 {
          self.write_behind(cache_name, &key, response.clone())?;
        }
        Ok(Served::from_network(response))
      }
      Err(err) => {
        warn!(url = %key, error = %err, "Network failed, serving offline page");
        match self.storage.match_request(cache_name, fallback_key)? {
          Some(cached) => Ok(Served::offline(cached)),
          None => Err(err.wrap_err(format!(
            "No offline page {} cached for failed request {}",
            fallback_key, key
          ))),
        }
      }
    }
  }

  /// Delete every cache generation except `keep`. Returns the deleted names.
  pub fn delete_except(&self, keep: &str) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for name in self.storage.keys()? {
      if name != keep {
        info!(cache = %name, "Clearing old cache");
        self.storage.delete(&name)?;
        deleted.push(name);
      }
    }
    Ok(deleted)
  }

  /// Wait for all write-behind stores started so far.
  pub async fn flush(&self) -> Result<()> {
    let pending = {
      let mut guard = self
        .pending
        .lock()
        .map_err(|e| eyre!("Lock poisoned: {}", e))?;
      std::mem::take(&mut *guard)
    };

    for handle in pending {
      if let Err(e) = handle.await {
        error!(error = %e, "Write-behind task did not complete");
      }
    }
    Ok(())
  }

  /// Store a response without making the caller wait for it.
  ///
  /// The store is detached: it completes even if this layer is dropped first.
  fn write_behind(&self, cache_name: &str, key: &str, response: Response) -> Result<()> {
    let storage = Arc::clone(&self.storage);
    let cache_name = cache_name.to_string();
    let key = key.to_string();

    let mut pending = self
      .pending
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    // Reap stores that already finished
    pending.retain(|handle| !handle.is_finished());

    pending.push(tokio::spawn(async move {
      let (name, url) = (cache_name.clone(), key.clone());
      let stored = tokio::task::spawn_blocking(move || {
        storage
          .open(&name)
          .and_then(|_| storage.put(&name, &url, &response))
      })
      .await
      .map_err(|e| eyre!("Write-behind store panicked: {}", e))
      .and_then(|stored| stored);

      match stored {
        Ok(()) => debug!(url = %key, cache = %cache_name, "Stored network response"),
        Err(e) => error!(url = %key, cache = %cache_name, error = %e, "Failed to store network response"),
      }
    }));

    Ok(())
  }
}

impl<S: CacheStorage> Clone for CacheLayer<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      pending: Arc::clone(&self.pending),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, ResponseSource};
  use crate::net::Destination;
  use std::sync::atomic::{AtomicUsize, Ordering};

  const CACHE: &str = "v1";
  const OFFLINE: &str = "https://app.test/index.html";

  fn document(url: &str) -> Request {
    Request::parse(url)
      .unwrap()
      .with_destination(Destination::Document)
  }

  fn layer() -> CacheLayer<MemoryStorage> {
    CacheLayer::new(MemoryStorage::new())
  }

  #[tokio::test]
  async fn test_cache_hit_skips_network() {
    let layer = layer();
    let request = document("https://app.test/about.html");
    layer
      .storage()
      .put(CACHE, &request.cache_key(), &Response::new(request.url.as_str(), 200, "cached"))
      .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let served = layer
      .fetch_document(CACHE, &request, OFFLINE, move || async move {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Response::new("https://app.test/about.html", 200, "fresh"))
      })
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::Cache);
    assert_eq!(served.response.body.as_ref(), b"cached");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_miss_returns_network_and_stores_200() {
    let layer = layer();
    let request = document("https://app.test/about.html");

    let served = layer
      .fetch_document(CACHE, &request, OFFLINE, || async {
        Ok(Response::new("https://app.test/about.html", 200, "fresh"))
      })
      .await
      .unwrap();
    assert_eq!(served.source, ResponseSource::Network);
    assert_eq!(served.response.body.as_ref(), b"fresh");

    layer.flush().await.unwrap();
    let stored = layer
      .storage()
      .match_request(CACHE, &request.cache_key())
      .unwrap()
      .expect("response was not stored");
    assert_eq!(stored.response.body, served.response.body);
  }

  #[tokio::test]
  async fn test_store_happens_after_response_is_returned() {
    let layer = layer();
    let request = document("https://app.test/about.html");

    layer
      .fetch_document(CACHE, &request, OFFLINE, || async {
        Ok(Response::new("https://app.test/about.html", 200, "fresh"))
      })
      .await
      .unwrap();

    // Current-thread runtime: the store cannot have run before we yield
    assert!(layer
      .storage()
      .match_request(CACHE, &request.cache_key())
      .unwrap()
      .is_none());

    layer.flush().await.unwrap();
    assert!(layer
      .storage()
      .match_request(CACHE, &request.cache_key())
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_store_survives_dropping_the_layer() {
    let storage = Arc::new(MemoryStorage::new());
    let layer = CacheLayer::from_shared(Arc::clone(&storage));
    let request = document("https://app.test/about.html");

    layer
      .fetch_document(CACHE, &request, OFFLINE, || async {
        Ok(Response::new("https://app.test/about.html", 200, "fresh"))
      })
      .await
      .unwrap();
    drop(layer);

    let mut stored = false;
    for _ in 0..100 {
      tokio::time::sleep(std::time::Duration::from_millis(10)).await;
      if storage.match_request(CACHE, &request.cache_key()).unwrap().is_some() {
        stored = true;
        break;
      }
    }
    assert!(stored, "write-behind store was lost when the layer was dropped");
  }

  #[tokio::test]
  async fn test_non_200_is_returned_but_not_stored() {
    let layer = layer();
    let request = document("https://app.test/missing.html");

    for status in [404, 500, 201] {
      let served = layer
        .fetch_document(CACHE, &request, OFFLINE, move || async move {
          Ok(Response::new("https://app.test/missing.html", status, "nope"))
        })
        .await
        .unwrap();
      assert_eq!(served.response.status, status);
    }

    layer.flush().await.unwrap();
    assert!(layer
      .storage()
      .match_request(CACHE, &request.cache_key())
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_network_failure_serves_offline_page() {
    let layer = layer();
    layer
      .storage()
      .put(CACHE, OFFLINE, &Response::new(OFFLINE, 200, "offline shell"))
      .unwrap();

    let served = layer
      .fetch_document(CACHE, &document("https://app.test/docs/"), OFFLINE, || async {
        Err(eyre!("connection refused"))
      })
      .await
      .unwrap();

    assert_eq!(served.source, ResponseSource::OfflineFallback);
    assert_eq!(served.response.body.as_ref(), b"offline shell");
  }

  #[tokio::test]
  async fn test_network_failure_without_offline_page_is_an_error() {
    let layer = layer();
    let result = layer
      .fetch_document(CACHE, &document("https://app.test/docs/"), OFFLINE, || async {
        Err(eyre!("connection refused"))
      })
      .await;

    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_precache_stores_every_request() {
    let layer = layer();
    let requests = vec![
      document("https://app.test/"),
      document("https://app.test/index.html"),
    ];

    let stored = layer
      .precache(CACHE, &requests, |request| async move {
        Ok(Response::new(request.url.as_str(), 200, request.url.path().to_string()))
      })
      .await
      .unwrap();

    assert_eq!(stored, 2);
    assert_eq!(
      layer.storage().entries(CACHE).unwrap(),
      vec!["https://app.test/", "https://app.test/index.html"]
    );
  }

  #[tokio::test]
  async fn test_precache_failure_writes_nothing() {
    let layer = layer();
    let requests = vec![
      document("https://app.test/"),
      document("https://app.test/missing.html"),
    ];

    let result = layer
      .precache(CACHE, &requests, |request| async move {
        let status = if request.url.path() == "/missing.html" { 404 } else { 200 };
        Ok(Response::new(request.url.as_str(), status, "body"))
      })
      .await;

    assert!(result.is_err());
    assert!(layer.storage().entries(CACHE).unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_delete_except_keeps_current() {
    let layer = layer();
    for name in ["v2-1-6", "v2-1-7", "v2-1-8"] {
      layer.storage().open(name).unwrap();
    }

    let deleted = layer.delete_except("v2-1-8").unwrap();

    assert_eq!(deleted, vec!["v2-1-6", "v2-1-7"]);
    assert_eq!(layer.storage().keys().unwrap(), vec!["v2-1-8"]);
  }
}
