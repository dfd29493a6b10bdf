//! Offline cache layer for the Xenohuru tourism site.
//!
//! Every request the page issues is classified by host and origin and
//! resolved by one of three strategies:
//!
//! - API host: network only, with a structured 503 JSON body when offline
//! - other origins (CDNs, image hosts): network first, cached copy when offline
//! - the site itself: cache first, network on miss
//!
//! A single versioned cache store is precached on install and every other
//! store is deleted on activate. See [`worker::ServiceWorker`].

pub mod cache;
pub mod config;
pub mod fetch;
pub mod http;
pub mod router;
pub mod strategy;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{ActiveVersion, CacheStorage, CachedResponse, DiskStorage, MemoryStorage, StorageError};
pub use config::{ConfigError, PrecachePolicy, WorkerConfig};
pub use fetch::{FetchError, Fetcher, HttpFetcher};
pub use http::{Method, Request, Response};
pub use router::{classify, RequestClass, Router};
pub use strategy::{offline_response, OfflinePayload};
pub use worker::{ActivateOutcome, InstallOutcome, ServiceWorker, WorkerError, WorkerState};
