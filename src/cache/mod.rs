//! Caching layer for document responses and offline support.
//!
//! This module provides:
//! - Named cache generations of request key to response snapshot
//! - Cache-first lookups with write-behind stores of network responses
//! - Atomic precaching of a fixed resource list
//! - An offline fallback document when the network is unavailable

mod layer;
mod storage;
mod traits;

pub use layer::CacheLayer;
pub use storage::{CacheStorage, MemoryStorage, SqliteStorage};
pub use traits::{CachedResponse, ResponseSource, Served};
