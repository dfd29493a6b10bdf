//! In-process cache namespace.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{ActiveVersion, CacheStorage, CachedResponse, StorageError};
use crate::http::Response;

#[derive(Debug, Default)]
struct Namespace {
    stores: BTreeMap<String, BTreeMap<String, CachedResponse>>,
    active: Option<ActiveVersion>,
}

/// Cache namespace held in memory behind a single `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<Namespace>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Namespace>, StorageError> {
        self.inner.read().map_err(|_| StorageError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Namespace>, StorageError> {
        self.inner.write().map_err(|_| StorageError::Poisoned)
    }
}

impl CacheStorage for MemoryStorage {
    fn open(&self, cache_name: &str) -> Result<(), StorageError> {
        self.write()?.stores.entry(cache_name.to_string()).or_default();
        Ok(())
    }

    fn has(&self, cache_name: &str) -> Result<bool, StorageError> {
        Ok(self.read()?.stores.contains_key(cache_name))
    }

    fn cache_names(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.read()?.stores.keys().cloned().collect())
    }

    fn delete(&self, cache_name: &str) -> Result<bool, StorageError> {
        Ok(self.write()?.stores.remove(cache_name).is_some())
    }

    fn match_request(
        &self,
        cache_name: &str,
        key: &str,
    ) -> Result<Option<CachedResponse>, StorageError> {
        Ok(self
            .read()?
            .stores
            .get(cache_name)
            .and_then(|store| store.get(key))
            .cloned())
    }

    fn put(&self, cache_name: &str, key: &str, response: &Response) -> Result<(), StorageError> {
        self.write()?
            .stores
            .entry(cache_name.to_string())
            .or_default()
            .insert(key.to_string(), CachedResponse::new(response.clone()));
        Ok(())
    }

    fn keys(&self, cache_name: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .read()?
            .stores
            .get(cache_name)
            .map(|store| store.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn active_version(&self) -> Result<Option<ActiveVersion>, StorageError> {
        Ok(self.read()?.active.clone())
    }

    fn set_active_version(&self, version: &str) -> Result<(), StorageError> {
        self.write()?.active = Some(ActiveVersion::new(version));
        Ok(())
    }

    /// Single write lock for the whole batch, so readers never observe half
    /// of a precache.
    fn put_all(&self, cache_name: &str, entries: &[(String, Response)]) -> Result<(), StorageError> {
        let mut ns = self.write()?;
        let store = ns.stores.entry(cache_name.to_string()).or_default();
        for (key, response) in entries {
            store.insert(key.clone(), CachedResponse::new(response.clone()));
        }
        Ok(())
    }
}
