//! Versioned cache stores for offline access.
//!
//! A cache namespace holds any number of named stores plus one named slot
//! recording which version last completed activation. Each store maps a
//! request key (method + URL) to a full response. Entries never expire; a
//! store only goes away when activation of a newer version deletes it.
//!
//! Backends:
//! - `MemoryStorage`: process-local, used by tests and embedders
//! - `DiskStorage`: one directory per store, one file per entry

pub mod disk;
pub mod memory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::Response;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cache storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode or decode cache data: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Corrupt cache entry: {0}")]
    Corrupt(String),

    #[error("Cache storage lock poisoned")]
    Poisoned,

    #[error("Cache storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A response as it sits in a cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub response: Response,
    pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Includes negative ages from clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// Contents of the active version slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveVersion {
    pub version: String,
    pub activated_at: DateTime<Utc>,
}

impl ActiveVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            activated_at: Utc::now(),
        }
    }
}

/// Storage backend for the cache namespace.
///
/// Implementations must make each single-key `put`/`match_request`/`delete`
/// atomic with respect to concurrent callers. Nothing stronger is required:
/// two writers racing on the same key may leave either value.
pub trait CacheStorage: Send + Sync {
    /// Create the store if it does not exist yet.
    fn open(&self, cache_name: &str) -> Result<(), StorageError>;

    fn has(&self, cache_name: &str) -> Result<bool, StorageError>;

    /// Names of every existing store, sorted.
    fn cache_names(&self) -> Result<Vec<String>, StorageError>;

    /// Remove a store and all its entries. Returns false if it did not exist.
    fn delete(&self, cache_name: &str) -> Result<bool, StorageError>;

    fn match_request(&self, cache_name: &str, key: &str)
        -> Result<Option<CachedResponse>, StorageError>;

    /// Insert or replace one entry, creating the store if needed.
    fn put(&self, cache_name: &str, key: &str, response: &Response) -> Result<(), StorageError>;

    /// Keys of every entry in a store, sorted. Empty if the store is absent.
    fn keys(&self, cache_name: &str) -> Result<Vec<String>, StorageError>;

    fn active_version(&self) -> Result<Option<ActiveVersion>, StorageError>;

    fn set_active_version(&self, version: &str) -> Result<(), StorageError>;

    /// Insert a batch of entries. On error the store must be left as it was
    /// before the call; in particular a store that did not exist must still
    /// not exist. The default only meets that when `put` cannot fail.
    fn put_all(&self, cache_name: &str, entries: &[(String, Response)]) -> Result<(), StorageError> {
        self.open(cache_name)?;
        for (key, response) in entries {
            self.put(cache_name, key, response)?;
        }
        Ok(())
    }
}

/// Run a storage call on the blocking thread pool. Backends are synchronous
/// and may do file I/O, which must stay off the async worker threads.
pub(crate) async fn blocking<S, T, F>(storage: &Arc<S>, f: F) -> Result<T, StorageError>
where
    S: CacheStorage + ?Sized + 'static,
    T: Send + 'static,
    F: FnOnce(&S) -> Result<T, StorageError> + Send + 'static,
{
    let storage = Arc::clone(storage);
    tokio::task::spawn_blocking(move || f(&*storage)).await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cached_response_age_display_just_now() {
        let cached = CachedResponse::new(Response::new(200));
        assert_eq!(cached.age_display(), "just now");
    }

    #[test]
    fn test_cached_response_age_display_rounding() {
        let mut cached = CachedResponse::new(Response::new(200));

        cached.cached_at = Utc::now() - Duration::minutes(5);
        assert_eq!(cached.age_display(), "5m ago");

        cached.cached_at = Utc::now() - Duration::minutes(95);
        assert_eq!(cached.age_display(), "2h ago");

        cached.cached_at = Utc::now() - Duration::minutes(70);
        assert_eq!(cached.age_display(), "1h ago");

        cached.cached_at = Utc::now() - Duration::hours(36);
        assert_eq!(cached.age_display(), "2d ago");
    }

    #[test]
    fn test_cached_response_clock_skew() {
        let mut cached = CachedResponse::new(Response::new(200));
        cached.cached_at = Utc::now() + Duration::minutes(10);
        assert_eq!(cached.age_display(), "just now");
    }

    #[tokio::test]
    async fn test_blocking_runs_off_the_runtime_thread() {
        let storage = Arc::new(MemoryStorage::new());
        let caller = std::thread::current().id();

        let ran_on = blocking(&storage, |s| {
            s.put("v1", "GET http://a/", &Response::new(200))?;
            Ok(std::thread::current().id())
        })
        .await
        .unwrap();

        assert_ne!(ran_on, caller);
        assert_eq!(storage.keys("v1").unwrap(), vec!["GET http://a/".to_string()]);
    }
}
