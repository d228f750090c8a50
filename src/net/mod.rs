//! Network seam: request/response types and the transport trait.

mod abort;
mod client;
#[cfg(test)]
pub mod testing;
mod types;

pub use abort::{AbortController, AbortSignal};
pub use client::HttpNetwork;
pub use types::{Method, Request, Response, ResponseType};

use color_eyre::Result;
use std::future::Future;

/// Transport used by every component that talks to the origin.
///
/// `Err` means the request never produced a response (offline, DNS, reset).
/// HTTP error statuses are returned as `Ok` responses.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}
