//! Request/response types and the network seam.

mod client;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{Destination, Request, Response};
