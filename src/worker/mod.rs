//! The offline worker: install/activate/fetch/message handlers, the sync
//! hook, and the registration that walks a worker through its lifecycle.
//!
//! Handlers are plain async functions over explicit configuration. Each
//! returns the work the host must wait for, plus an optional
//! [`LifecycleSignal`] the [`Registration`] applies once it completes.

mod handlers;
mod lifecycle;
mod message;

pub use handlers::{OfflineWorker, WorkerConfig};
pub use lifecycle::{Registration, WorkerState};
pub use message::{ControlMessage, LifecycleSignal};
