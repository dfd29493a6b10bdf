//! The three request strategies.
//!
//! Each strategy makes at most one network attempt. Cache read errors count as
//! misses and cache write errors are logged; neither fails the request.
//! Storage calls run on the blocking pool.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{blocking, CacheStorage};
use crate::fetch::{FetchError, Fetcher};
use crate::http::{Request, Response};

pub const OFFLINE_STATUS: u16 = 503;

pub const OFFLINE_ERROR: &str = "offline";

pub const OFFLINE_MESSAGE: &str = "API unavailable - using cached data";

/// Body of the synthesized response for an unreachable API. Client code
/// branches on `error == "offline"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflinePayload {
    pub error: String,
    pub message: String,
}

impl OfflinePayload {
    pub fn is_offline(&self) -> bool {
        self.error == OFFLINE_ERROR
    }
}

/// 503 with `{"error":"offline","message":...}` and a JSON content type.
pub fn offline_response() -> Response {
    let body = serde_json::json!({
        "error": OFFLINE_ERROR,
        "message": OFFLINE_MESSAGE,
    });
    Response::new(OFFLINE_STATUS)
        .with_header("Content-Type", "application/json")
        .with_body(body.to_string())
}

/// API requests: network only, never touches the cache. Upstream 4xx/5xx pass
/// through; only a missing response is replaced by the offline JSON.
pub async fn network_only<F>(fetcher: &F, request: &Request) -> Response
where
    F: Fetcher + ?Sized,
{
    match fetcher.fetch(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %request.url, error = %e, "API request failed (offline)");
            offline_response()
        }
    }
}

/// Cross-origin requests: network first, cached copy only when the network
/// produced no response at all.
pub async fn network_first<F, S>(
    fetcher: &F,
    storage: &Arc<S>,
    cache_name: &str,
    request: &Request,
) -> Result<Response, FetchError>
where
    F: Fetcher + ?Sized,
    S: CacheStorage + ?Sized + 'static,
{
    match fetcher.fetch(request).await {
        Ok(response) => {
            store(storage, cache_name, request, &response).await;
            Ok(response)
        }
        Err(e) => {
            warn!(url = %request.url, error = %e, "Cross-origin network failed, checking cache");
            match lookup(storage, cache_name, request).await {
                Some(cached) => Ok(cached),
                None => Err(e),
            }
        }
    }
}

/// Same-origin requests: cache first, network on miss.
pub async fn cache_first<F, S>(
    fetcher: &F,
    storage: &Arc<S>,
    cache_name: &str,
    request: &Request,
) -> Result<Response, FetchError>
where
    F: Fetcher + ?Sized,
    S: CacheStorage + ?Sized + 'static,
{
    if let Some(cached) = lookup(storage, cache_name, request).await {
        return Ok(cached);
    }

    match fetcher.fetch(request).await {
        Ok(response) => {
            store(storage, cache_name, request, &response).await;
            Ok(response)
        }
        Err(e) => {
            warn!(url = %request.url, error = %e, "Network fetch failed with no cached copy");
            Err(e)
        }
    }
}

async fn lookup<S>(storage: &Arc<S>, cache_name: &str, request: &Request) -> Option<Response>
where
    S: CacheStorage + ?Sized + 'static,
{
    if !request.is_cacheable() {
        return None;
    }
    let name = cache_name.to_string();
    let key = request.cache_key();
    match blocking(storage, move |s| s.match_request(&name, &key)).await {
        Ok(Some(cached)) => {
            debug!(url = %request.url, cache = cache_name, "Cache hit");
            Some(cached.response)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(url = %request.url, error = %e, "Cache read failed, treating as miss");
            None
        }
    }
}

async fn store<S>(storage: &Arc<S>, cache_name: &str, request: &Request, response: &Response)
where
    S: CacheStorage + ?Sized + 'static,
{
    if !request.is_cacheable() || !response.is_cacheable() {
        return;
    }
    let name = cache_name.to_string();
    let key = request.cache_key();
    let response = response.clone();
    if let Err(e) = blocking(storage, move |s| s.put(&name, &key, &response)).await {
        warn!(url = %request.url, error = %e, "Failed to store response in cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::http::Method;
    use crate::testing::ScriptedFetcher;

    const CACHE: &str = "twenzetu-safari-v2";

    fn ok(body: &str) -> Response {
        Response::new(200).with_body(body)
    }

    #[test]
    fn test_offline_response_shape() {
        let response = offline_response();
        assert_eq!(response.status, 503);
        assert_eq!(response.header("Content-Type"), Some("application/json"));

        let value: serde_json::Value = response.json().unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["error"], "offline");
        assert!(object["message"].as_str().unwrap().contains("API unavailable"));

        let payload: OfflinePayload = response.json().unwrap();
        assert!(payload.is_offline());
    }

    #[tokio::test]
    async fn test_network_only_passes_upstream_errors_through() {
        let request = Request::parse("https://api.example.com/attractions/missing/").unwrap();
        let fetcher = ScriptedFetcher::new().respond(request.url.as_str(), Response::new(404));

        let response = network_only(&fetcher, &request).await;
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_network_only_synthesizes_offline_json() {
        let request = Request::parse("https://api.example.com/regions/").unwrap();
        let fetcher = ScriptedFetcher::new();

        let response = network_only(&fetcher, &request).await;
        assert_eq!(response, offline_response());
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_network_first_caches_only_200() {
        let storage = Arc::new(MemoryStorage::new());
        let good = Request::parse("https://cdn.example.com/lib.js").unwrap();
        let missing = Request::parse("https://cdn.example.com/gone.js").unwrap();
        let fetcher = ScriptedFetcher::new()
            .respond(good.url.as_str(), ok("lib"))
            .respond(missing.url.as_str(), Response::new(404).with_body("not found"));

        assert_eq!(network_first(&fetcher, &storage, CACHE, &good).await.unwrap().status, 200);
        assert_eq!(network_first(&fetcher, &storage, CACHE, &missing).await.unwrap().status, 404);

        assert_eq!(storage.keys(CACHE).unwrap(), vec![good.cache_key()]);
    }

    #[tokio::test]
    async fn test_network_first_prefers_fresh_network_copy() {
        let storage = Arc::new(MemoryStorage::new());
        let request = Request::parse("https://cdn.example.com/lib.js").unwrap();
        storage.put(CACHE, &request.cache_key(), &ok("stale")).unwrap();
        let fetcher = ScriptedFetcher::new().respond(request.url.as_str(), ok("fresh"));

        let response = network_first(&fetcher, &storage, CACHE, &request).await.unwrap();
        assert_eq!(response.body, b"fresh");
        let cached = storage.match_request(CACHE, &request.cache_key()).unwrap().unwrap();
        assert_eq!(cached.response.body, b"fresh");
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let storage = Arc::new(MemoryStorage::new());
        let request = Request::parse("https://images.unsplash.com/serengeti.jpg").unwrap();
        storage.put(CACHE, &request.cache_key(), &ok("jpeg")).unwrap();
        let fetcher = ScriptedFetcher::new();

        let response = network_first(&fetcher, &storage, CACHE, &request).await.unwrap();
        assert_eq!(response.body, b"jpeg");
    }

    #[tokio::test]
    async fn test_network_first_propagates_failure_on_miss() {
        let storage = Arc::new(MemoryStorage::new());
        let request = Request::parse("https://images.unsplash.com/kilimanjaro.jpg").unwrap();
        let fetcher = ScriptedFetcher::new().fail(request.url.as_str(), "dns lookup failed");

        let err = network_first(&fetcher, &storage, CACHE, &request).await.unwrap_err();
        assert_eq!(err, FetchError::Network("dns lookup failed".to_string()));
    }

    #[tokio::test]
    async fn test_cache_first_short_circuits() {
        let storage = Arc::new(MemoryStorage::new());
        let request = Request::parse("http://localhost:8080/index.html").unwrap();
        storage.put(CACHE, &request.cache_key(), &ok("<html>")).unwrap();
        let fetcher = ScriptedFetcher::new().respond(request.url.as_str(), ok("newer"));

        let response = cache_first(&fetcher, &storage, CACHE, &request).await.unwrap();
        assert_eq!(response.body, b"<html>");
        assert_eq!(fetcher.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cache_first_does_not_cache_errors() {
        let storage = Arc::new(MemoryStorage::new());
        let request = Request::parse("http://localhost:8080/missing.html").unwrap();
        let fetcher = ScriptedFetcher::new().respond(request.url.as_str(), Response::new(404));

        let response = cache_first(&fetcher, &storage, CACHE, &request).await.unwrap();
        assert_eq!(response.status, 404);
        assert!(storage.keys(CACHE).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_get_bypasses_cache() {
        let storage = Arc::new(MemoryStorage::new());
        let url = url::Url::parse("http://localhost:8080/contact").unwrap();
        let get = Request::get(url.clone());
        storage.put(CACHE, &get.cache_key(), &ok("cached form")).unwrap();

        let post = Request::new(Method::Post, url.clone());
        let fetcher = ScriptedFetcher::new().respond(url.as_str(), ok("posted"));

        let response = cache_first(&fetcher, &storage, CACHE, &post).await.unwrap();
        assert_eq!(response.body, b"posted");
        assert_eq!(storage.keys(CACHE).unwrap(), vec![get.cache_key()]);
    }
}
