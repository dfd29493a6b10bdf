//! Network access for the cache layer.
//!
//! This module provides the `Fetcher` seam the strategies talk to, and
//! `HttpFetcher`, the reqwest-backed implementation the host adapter uses.
//! Each strategy makes exactly one `fetch` call per request; retries and
//! timeouts belong to the fetcher, not to the strategies.

pub mod client;
pub mod error;

use std::sync::Arc;

use async_trait::async_trait;

use crate::http::{Request, Response};

pub use client::HttpFetcher;
pub use error::FetchError;

/// Sends a request to the network.
///
/// An `Err` means no response could be obtained at all. A response with a
/// 4xx/5xx status is still `Ok`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

#[async_trait]
impl<F: Fetcher + ?Sized> Fetcher for Arc<F> {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        (**self).fetch(request).await
    }
}
