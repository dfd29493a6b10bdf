//! The offline cache manager.
//!
//! `ServiceWorker` is what a host adapter drives. It exposes the three host
//! callbacks as plain methods:
//!
//! - `on_install`: precache the manifest into the store named by the version tag
//! - `on_activate`: delete every other store and record the active version
//! - `on_fetch`: route one request to its strategy and return the response
//!
//! The host is responsible for substituting the returned response for the
//! real network response; nothing here has a side channel to the page.

mod error;
mod lifecycle;

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{blocking, CacheStorage, StorageError};
use crate::config::{ConfigError, PrecachePolicy, WorkerConfig};
use crate::fetch::{FetchError, Fetcher};
use crate::http::{Request, Response};
use crate::router::{RequestClass, Router};
use crate::strategy;

pub use error::WorkerError;
pub use lifecycle::WorkerState;

use lifecycle::StateCell;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub cache_name: String,
    /// Entries written to the store.
    pub cached: usize,
    /// Manifest URLs left out under the best-effort policy.
    pub skipped: Vec<String>,
    /// Always true: a new version supersedes the running one without waiting
    /// for its clients to go away.
    pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateOutcome {
    pub cache_name: String,
    pub deleted: Vec<String>,
    /// Always true: open clients are controlled immediately.
    pub claim_clients: bool,
}

pub struct ServiceWorker<F, S> {
    config: WorkerConfig,
    router: Router,
    precache: Vec<Url>,
    fetcher: F,
    storage: Arc<S>,
    state: StateCell,
}

impl<F: Fetcher, S: CacheStorage + 'static> ServiceWorker<F, S> {
    pub fn new(config: WorkerConfig, fetcher: F, storage: S) -> Result<Self, ConfigError> {
        config.validate()?;
        let router = config.router()?;
        let precache = config.precache_urls()?;
        Ok(Self {
            config,
            router,
            precache,
            fetcher,
            storage: Arc::new(storage),
            state: StateCell::default(),
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn cache_name(&self) -> &str {
        &self.config.cache_name
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn classify(&self, url: &Url) -> RequestClass {
        self.router.classify(url)
    }

    /// Rebuild lifecycle state from storage for a fresh process: `Active` if
    /// the active slot names this version and its store exists, `Installed` if
    /// only the store exists, `Uninstalled` otherwise. Backends only create a
    /// store once a whole install batch is written, so a store never comes
    /// from a failed install.
    pub fn resume(&self) -> Result<WorkerState, WorkerError> {
        let name = self.cache_name();
        let state = if !self.storage.has(name)? {
            WorkerState::Uninstalled
        } else if self
            .storage
            .active_version()?
            .is_some_and(|active| active.version == name)
        {
            WorkerState::Active
        } else {
            WorkerState::Installed
        };
        self.state.restore(state)?;
        debug!(cache = name, state = %state, "Resumed worker state from storage");
        Ok(state)
    }

    pub async fn on_install(&self) -> Result<InstallOutcome, WorkerError> {
        self.state.transition(WorkerState::Installing)?;
        info!(
            cache = self.cache_name(),
            assets = self.precache.len(),
            "Installing and pre-caching assets"
        );

        match self.precache_manifest().await {
            Ok(outcome) => {
                self.state.transition(WorkerState::Installed)?;
                info!(cache = self.cache_name(), cached = outcome.cached, "Installed");
                Ok(outcome)
            }
            Err(e) => {
                warn!(cache = self.cache_name(), error = %e, "Install failed, version will not activate");
                self.state.transition(WorkerState::Redundant)?;
                Err(e)
            }
        }
    }

    /// Fetch the whole manifest, then write it in one batch. Under the strict
    /// policy a single fetch failure returns before anything is written, and
    /// a failed batch write leaves no store, so a failed install leaves no
    /// store behind.
    async fn precache_manifest(&self) -> Result<InstallOutcome, WorkerError> {
        let requests: Vec<Request> = self.precache.iter().cloned().map(Request::get).collect();
        let results = join_all(requests.iter().map(|r| self.fetcher.fetch(r))).await;

        let mut entries = Vec::with_capacity(requests.len());
        let mut skipped = Vec::new();
        for (request, result) in requests.iter().zip(results) {
            let reason = match result {
                Ok(response) if response.is_ok() => {
                    entries.push((request.cache_key(), response));
                    continue;
                }
                Ok(response) => format!("unexpected status {}", response.status),
                Err(e) => e.to_string(),
            };

            match self.config.precache_policy {
                PrecachePolicy::Strict => {
                    return Err(WorkerError::Installation {
                        url: request.url.to_string(),
                        reason,
                    });
                }
                PrecachePolicy::BestEffort => {
                    warn!(url = %request.url, reason = %reason, "Skipping precache entry");
                    skipped.push(request.url.to_string());
                }
            }
        }

        let cached = entries.len();
        let name = self.config.cache_name.clone();
        blocking(&self.storage, move |s| s.put_all(&name, &entries)).await?;

        Ok(InstallOutcome {
            cache_name: self.config.cache_name.clone(),
            cached,
            skipped,
            skip_waiting: true,
        })
    }

    pub async fn on_activate(&self) -> Result<ActivateOutcome, WorkerError> {
        self.state.transition(WorkerState::Activating)?;
        info!(cache = self.cache_name(), "Activating and cleaning old caches");

        let current = self.config.cache_name.clone();
        match blocking(&self.storage, move |s| purge_stale_caches(s, &current)).await {
            Ok(deleted) => {
                self.state.transition(WorkerState::Active)?;
                Ok(ActivateOutcome {
                    cache_name: self.config.cache_name.clone(),
                    deleted,
                    claim_clients: true,
                })
            }
            Err(e) => {
                warn!(cache = self.cache_name(), error = %e, "Activation failed");
                self.state.transition(WorkerState::Redundant)?;
                Err(e.into())
            }
        }
    }

    /// Retire an active worker once a newer version has taken over.
    pub fn supersede(&self) -> Result<(), WorkerError> {
        let from = self.state();
        if from != WorkerState::Active {
            return Err(WorkerError::InvalidState {
                from,
                to: WorkerState::Redundant,
            });
        }
        self.state.transition(WorkerState::Redundant)?;
        Ok(())
    }

    pub async fn on_fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.handle(request).await
    }

    /// Resolve one request. A worker that is not active does not control the
    /// page, so its requests go straight to the network.
    pub async fn handle(&self, request: &Request) -> Result<Response, FetchError> {
        if self.state() != WorkerState::Active {
            debug!(url = %request.url, state = %self.state(), "Not controlling, passing request through");
            return self.fetcher.fetch(request).await;
        }

        let class = self.classify(&request.url);
        debug!(url = %request.url, class = %class, strategy = class.strategy_name(), "Routing request");

        let cache_name = self.cache_name();
        match class {
            RequestClass::Api => Ok(strategy::network_only(&self.fetcher, request).await),
            RequestClass::CrossOrigin => {
                strategy::network_first(&self.fetcher, &self.storage, cache_name, request).await
            }
            RequestClass::SameOrigin => {
                strategy::cache_first(&self.fetcher, &self.storage, cache_name, request).await
            }
        }
    }
}

/// Delete every store but `current`, then record it in the active slot.
fn purge_stale_caches<S>(storage: &S, current: &str) -> Result<Vec<String>, StorageError>
where
    S: CacheStorage + ?Sized,
{
    storage.open(current)?;

    let mut deleted = Vec::new();
    for name in storage.cache_names()? {
        if name == current {
            continue;
        }
        info!(cache = %name, "Deleting old cache");
        if storage.delete(&name)? {
            deleted.push(name);
        }
    }

    storage.set_active_version(current)?;
    Ok(deleted)
}
