//! Core types for the caching system.

use chrono::{DateTime, Utc};

use crate::net::Response;

/// A response snapshot as stored in a cache generation.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  /// The stored response
  pub response: Response,
  /// When the response was written
  pub cached_at: DateTime<Utc>,
}

/// Response handed back for an intercepted request, with where it came from.
#[derive(Debug, Clone)]
pub struct Served {
  /// The actual response
  pub response: Response,
  /// Where the response came from
  pub source: ResponseSource,
  /// When the response was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl Served {
  /// Fresh response from the network.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  /// Stored entry for the request itself.
  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
      cached_at: Some(cached.cached_at),
    }
  }

  /// Stored offline document, served because the network failed.
  pub fn offline(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::OfflineFallback,
      cached_at: Some(cached.cached_at),
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Entry found in the current cache generation
  Cache,
  /// Live network response
  Network,
  /// Network unavailable, serving the cached offline document
  OfflineFallback,
}

impl std::fmt::Display for ResponseSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ResponseSource::Cache => write!(f, "cache"),
      ResponseSource::Network => write!(f, "network"),
      ResponseSource::OfflineFallback => write!(f, "offline"),
    }
  }
}
