//! On-disk cache namespace.
//!
//! Layout under the root directory:
//!
//! ```text
//! active.json                      active version slot
//! stores/<hex(name)>/              one directory per store
//! stores/<hex(name)>/<sha256(key)>.entry
//! stores/.<hex(name)>.<pid>.staging/  batch being written by `put_all`
//! ```
//!
//! An entry file is one line of compact JSON metadata (key, status, headers,
//! cached_at) followed by a newline and the raw body bytes. Every file is
//! written to a temporary sibling and renamed into place, so a reader sees
//! either the old entry or the new one, never a partial write.
//!
//! A batch is written into a staging directory and renamed over the store
//! directory only once every entry is on disk. A store directory therefore
//! exists only after a batch completed, and a failed batch leaves nothing
//! behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{ActiveVersion, CacheStorage, CachedResponse, StorageError};
use crate::http::Response;

const STORES_DIR: &str = "stores";
const ACTIVE_FILE: &str = "active.json";
const ENTRY_EXT: &str = "entry";

#[derive(Debug, Serialize, Deserialize)]
struct EntryHeader {
    key: String,
    status: u16,
    headers: BTreeMap<String, String>,
    cached_at: DateTime<Utc>,
}

pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(root.join(STORES_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn stores_dir(&self) -> PathBuf {
        self.root.join(STORES_DIR)
    }

    /// Store names are hex-encoded so any name maps to a safe, reversible
    /// directory name.
    fn store_dir(&self, cache_name: &str) -> PathBuf {
        self.stores_dir().join(hex::encode(cache_name))
    }

    /// Not valid hex, so `cache_names` never reports it as a store.
    pub(crate) fn staging_dir(&self, cache_name: &str) -> PathBuf {
        self.stores_dir().join(format!(
            ".{}.{}.staging",
            hex::encode(cache_name),
            std::process::id()
        ))
    }

    pub(crate) fn entry_file_name(key: &str) -> String {
        format!("{}.{}", hex::encode(Sha256::digest(key.as_bytes())), ENTRY_EXT)
    }

    fn entry_path(&self, cache_name: &str, key: &str) -> PathBuf {
        self.store_dir(cache_name).join(Self::entry_file_name(key))
    }

    fn stage_entries(staging: &Path, entries: &[(String, Response)]) -> Result<(), StorageError> {
        fs::create_dir_all(staging)?;
        for (key, response) in entries {
            let bytes = Self::encode_entry(key, &CachedResponse::new(response.clone()))?;
            Self::write_atomic(&staging.join(Self::entry_file_name(key)), &bytes)?;
        }
        Ok(())
    }

    /// Move a complete staging directory into place. An existing store keeps
    /// its other entries and has the staged ones renamed into it one by one.
    fn commit_staging(staging: &Path, target: &Path) -> Result<(), StorageError> {
        match fs::rename(staging, target) {
            Ok(()) => return Ok(()),
            Err(_) if target.is_dir() => {}
            Err(e) => return Err(e.into()),
        }
        for entry in fs::read_dir(staging)? {
            let entry = entry?;
            fs::rename(entry.path(), target.join(entry.file_name()))?;
        }
        fs::remove_dir(staging)?;
        Ok(())
    }

    fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
        let tmp = path.with_extension(format!("{:016x}.tmp", rand::random::<u64>()));
        fs::write(&tmp, contents)?;
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn encode_entry(key: &str, cached: &CachedResponse) -> Result<Vec<u8>, StorageError> {
        let header = EntryHeader {
            key: key.to_string(),
            status: cached.response.status,
            headers: cached.response.headers.clone(),
            cached_at: cached.cached_at,
        };
        let mut bytes = serde_json::to_vec(&header)?;
        bytes.push(b'\n');
        bytes.extend_from_slice(&cached.response.body);
        Ok(bytes)
    }

    fn decode_entry(bytes: &[u8]) -> Result<(String, CachedResponse), StorageError> {
        let split = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| StorageError::Corrupt("missing header terminator".to_string()))?;
        let header: EntryHeader = serde_json::from_slice(&bytes[..split])?;
        let cached = CachedResponse {
            response: Response {
                status: header.status,
                headers: header.headers,
                body: bytes[split + 1..].to_vec(),
            },
            cached_at: header.cached_at,
        };
        Ok((header.key, cached))
    }

    fn read_entry(path: &Path) -> Result<Option<(String, CachedResponse)>, StorageError> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(Self::decode_entry(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl CacheStorage for DiskStorage {
    fn open(&self, cache_name: &str) -> Result<(), StorageError> {
        fs::create_dir_all(self.store_dir(cache_name))?;
        Ok(())
    }

    fn has(&self, cache_name: &str) -> Result<bool, StorageError> {
        Ok(self.store_dir(cache_name).is_dir())
    }

    fn cache_names(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        for dir in fs::read_dir(self.stores_dir())? {
            let dir = dir?;
            if !dir.file_type()?.is_dir() {
                continue;
            }
            let encoded = dir.file_name();
            let decoded = encoded
                .to_str()
                .and_then(|s| hex::decode(s).ok())
                .and_then(|bytes| String::from_utf8(bytes).ok());
            match decoded {
                Some(name) => names.push(name),
                None => debug!(dir = ?encoded, "Skipping unrecognized directory in cache root"),
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete(&self, cache_name: &str) -> Result<bool, StorageError> {
        match fs::remove_dir_all(self.store_dir(cache_name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn match_request(
        &self,
        cache_name: &str,
        key: &str,
    ) -> Result<Option<CachedResponse>, StorageError> {
        match Self::read_entry(&self.entry_path(cache_name, key))? {
            Some((stored_key, cached)) if stored_key == key => Ok(Some(cached)),
            Some((stored_key, _)) => Err(StorageError::Corrupt(format!(
                "entry for {} holds key {}",
                key, stored_key
            ))),
            None => Ok(None),
        }
    }

    fn put(&self, cache_name: &str, key: &str, response: &Response) -> Result<(), StorageError> {
        self.open(cache_name)?;
        let cached = CachedResponse::new(response.clone());
        let bytes = Self::encode_entry(key, &cached)?;
        Self::write_atomic(&self.entry_path(cache_name, key), &bytes)
    }

    fn put_all(&self, cache_name: &str, entries: &[(String, Response)]) -> Result<(), StorageError> {
        let staging = self.staging_dir(cache_name);
        let result = Self::stage_entries(&staging, entries)
            .and_then(|()| Self::commit_staging(&staging, &self.store_dir(cache_name)));
        if let Err(e) = &result {
            debug!(cache = cache_name, error = %e, "Batch write failed, discarding staged entries");
            if let Err(e) = fs::remove_dir_all(&staging) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %staging.display(), error = %e, "Failed to remove staging directory");
                }
            }
        }
        result
    }

    fn keys(&self, cache_name: &str) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(self.store_dir(cache_name)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            // A concurrent delete may remove the file between listing and reading
            if let Some((key, _)) = Self::read_entry(&path)? {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn active_version(&self) -> Result<Option<ActiveVersion>, StorageError> {
        match fs::read_to_string(self.root.join(ACTIVE_FILE)) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_active_version(&self, version: &str) -> Result<(), StorageError> {
        let contents = serde_json::to_string_pretty(&ActiveVersion::new(version))?;
        Self::write_atomic(&self.root.join(ACTIVE_FILE), contents.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, DiskStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path().to_path_buf()).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_put_and_match_preserves_response() {
        let (_dir, storage) = storage();
        let response = Response::new(200)
            .with_header("Content-Type", "text/css")
            .with_body(b"body { margin: 0 }\n\nline".to_vec());

        storage
            .put("twenzetu-safari-v2", "GET http://localhost/css/styles.css", &response)
            .unwrap();

        let hit = storage
            .match_request("twenzetu-safari-v2", "GET http://localhost/css/styles.css")
            .unwrap()
            .unwrap();
        assert_eq!(hit.response, response);
    }

    #[test]
    fn test_miss_on_absent_store_and_key() {
        let (_dir, storage) = storage();
        assert!(storage.match_request("v1", "GET http://a/").unwrap().is_none());

        storage.open("v1").unwrap();
        assert!(storage.match_request("v1", "GET http://a/").unwrap().is_none());
    }

    #[test]
    fn test_cache_names_round_trip_odd_names() {
        let (_dir, storage) = storage();
        storage.open("v1").unwrap();
        storage.open("site/v2 beta").unwrap();

        assert_eq!(
            storage.cache_names().unwrap(),
            vec!["site/v2 beta".to_string(), "v1".to_string()]
        );
    }

    #[test]
    fn test_delete_removes_entries() {
        let (_dir, storage) = storage();
        storage.put("v1", "GET http://a/", &Response::new(200)).unwrap();

        assert!(storage.delete("v1").unwrap());
        assert!(!storage.has("v1").unwrap());
        assert!(storage.keys("v1").unwrap().is_empty());
        assert!(!storage.delete("v1").unwrap());
    }

    #[test]
    fn test_keys_ignore_temp_files() {
        let (_dir, storage) = storage();
        storage.put("v1", "GET http://a/x", &Response::new(200)).unwrap();
        storage.put("v1", "GET http://a/y", &Response::new(200)).unwrap();
        fs::write(storage.store_dir("v1").join("stray.1234.tmp"), b"junk").unwrap();

        assert_eq!(
            storage.keys("v1").unwrap(),
            vec!["GET http://a/x".to_string(), "GET http://a/y".to_string()]
        );
    }

    #[test]
    fn test_state_survives_reopen() {
        let (dir, storage) = storage();
        storage.put("v2", "GET http://a/", &Response::new(200).with_body("x")).unwrap();
        storage.set_active_version("v2").unwrap();
        drop(storage);

        let reopened = DiskStorage::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(reopened.active_version().unwrap().unwrap().version, "v2");
        assert_eq!(reopened.keys("v2").unwrap(), vec!["GET http://a/".to_string()]);
    }

    /// Puts a directory where the entry file for `key` would be staged, so
    /// writing that entry fails.
    fn block_staged_entry(storage: &DiskStorage, cache_name: &str, key: &str) {
        let staging = storage.staging_dir(cache_name);
        fs::create_dir_all(staging.join(DiskStorage::entry_file_name(key))).unwrap();
    }

    #[test]
    fn test_failed_batch_leaves_no_store() {
        let (_dir, storage) = storage();
        block_staged_entry(&storage, "v2", "GET http://a/b.css");

        let entries = vec![
            ("GET http://a/a.html".to_string(), Response::new(200).with_body("<html>")),
            ("GET http://a/b.css".to_string(), Response::new(200).with_body("body{}")),
        ];
        assert!(matches!(storage.put_all("v2", &entries), Err(StorageError::Io(_))));

        assert!(!storage.has("v2").unwrap());
        assert!(storage.cache_names().unwrap().is_empty());
        assert!(storage.keys("v2").unwrap().is_empty());
        assert!(!storage.staging_dir("v2").exists());
    }

    #[test]
    fn test_batch_creates_store_even_when_empty() {
        let (_dir, storage) = storage();
        storage.put_all("v2", &[]).unwrap();

        assert!(storage.has("v2").unwrap());
        assert_eq!(storage.cache_names().unwrap(), vec!["v2".to_string()]);
    }

    #[test]
    fn test_longest_cache_name_fits_on_disk() {
        let (_dir, storage) = storage();
        let name = "v".repeat(crate::config::MAX_CACHE_NAME_LEN);
        let entries = vec![("GET http://a/".to_string(), Response::new(200))];

        storage.put_all(&name, &entries).unwrap();
        assert_eq!(storage.cache_names().unwrap(), vec![name]);
    }

    #[test]
    fn test_batch_merges_into_existing_store() {
        let (_dir, storage) = storage();
        storage.put("v2", "GET http://a/old", &Response::new(200).with_body("old")).unwrap();
        storage.put("v2", "GET http://a/x", &Response::new(200).with_body("x1")).unwrap();

        let entries = vec![("GET http://a/x".to_string(), Response::new(200).with_body("x2"))];
        storage.put_all("v2", &entries).unwrap();

        assert_eq!(
            storage.keys("v2").unwrap(),
            vec!["GET http://a/old".to_string(), "GET http://a/x".to_string()]
        );
        let hit = storage.match_request("v2", "GET http://a/x").unwrap().unwrap();
        assert_eq!(hit.response.body, b"x2");
        assert!(!storage.staging_dir("v2").exists());
    }

    #[test]
    fn test_corrupt_entry_is_reported() {
        let (_dir, storage) = storage();
        storage.open("v1").unwrap();
        fs::write(storage.entry_path("v1", "GET http://a/"), b"no header line").unwrap();

        assert!(matches!(
            storage.match_request("v1", "GET http://a/"),
            Err(StorageError::Corrupt(_))
        ));
    }
}
