//! Cache-first offline agent for a single-page application.
//!
//! Precaches a fixed manifest on install, drops stale cache generations on
//! activate, and answers document requests from the cache, then the network,
//! then a cached offline page.

pub mod cache;
pub mod config;
pub mod logging;
pub mod net;
pub mod worker;
