//! Worker configuration.
//!
//! The three recognized options are the cache version tag, the API host and
//! the precache manifest. Bumping `cache_name` is the only way to replace the
//! whole static cache: the next activation deletes every store with another
//! name.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::{Host, Url};

use crate::router::Router;

pub const DEFAULT_CACHE_NAME: &str = "twenzetu-safari-v2";

pub const DEFAULT_API_HOST: &str = "cf89615f228bb45cc805447510de80.pythonanywhere.com";

pub const DEFAULT_ORIGIN: &str = "http://localhost:8080";

/// Longest accepted version tag, in bytes. The disk backend hex-encodes it
/// into a directory name, which must stay under the 255-byte limit of
/// common filesystems.
pub const MAX_CACHE_NAME_LEN: usize = 100;

/// Static shell of the site, relative to the page origin.
pub const DEFAULT_PRECACHE: &[&str] = &[
    "/",
    "/index.html",
    "/attractions.html",
    "/attraction.html",
    "/regions.html",
    "/about.html",
    "/sponsor.html",
    "/css/styles.css",
    "/js/scripts.js",
    "/js/home.js",
    "/js/attractions.js",
    "/js/attraction.js",
    "/js/regions.js",
    "/js/about.js",
    "/js/api.js",
    "/js/mockdata.js",
    "/manifest.json",
];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid URL in configuration: {0}")]
    Url(#[from] url::ParseError),
}

/// What install does when a manifest entry cannot be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecachePolicy {
    /// Any failure aborts the install and nothing is stored.
    #[default]
    Strict,
    /// Failures are logged and skipped; everything else is stored.
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Version tag; also the name of the one cache store that survives activation.
    pub cache_name: String,
    /// Bare hostname of the REST backend.
    pub api_host: String,
    /// Origin the site is served from, e.g. `https://xenohuru.example`.
    pub origin: String,
    /// Paths (or absolute URLs) fetched and stored at install time.
    pub precache: Vec<String>,
    pub precache_policy: PrecachePolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: DEFAULT_CACHE_NAME.to_string(),
            api_host: DEFAULT_API_HOST.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            precache: DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
            precache_policy: PrecachePolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn page_origin(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.origin)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "origin must be http or https, got {}",
                self.origin
            )));
        }
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(ConfigError::Invalid(format!(
                "origin must not carry a path, query or fragment: {}",
                self.origin
            )));
        }
        Ok(url)
    }

    /// Manifest entries resolved against the page origin, in manifest order.
    pub fn precache_urls(&self) -> Result<Vec<Url>, ConfigError> {
        let origin = self.page_origin()?;
        self.precache
            .iter()
            .map(|path| origin.join(path).map_err(ConfigError::from))
            .collect()
    }

    pub fn router(&self) -> Result<Router, ConfigError> {
        Ok(Router::new(&self.api_host, &self.page_origin()?))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_name.trim().is_empty() {
            return Err(ConfigError::Invalid("cache_name must not be empty".to_string()));
        }
        if self.cache_name.len() > MAX_CACHE_NAME_LEN {
            return Err(ConfigError::Invalid(format!(
                "cache_name is {} bytes, at most {} allowed",
                self.cache_name.len(),
                MAX_CACHE_NAME_LEN
            )));
        }
        if self.api_host.contains("://") || self.api_host.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "api_host must be a bare hostname, got {}",
                self.api_host
            )));
        }
        Host::parse(&self.api_host)
            .map_err(|e| ConfigError::Invalid(format!("api_host {}: {}", self.api_host, e)))?;
        self.precache_urls()?;
        Ok(())
    }
}
