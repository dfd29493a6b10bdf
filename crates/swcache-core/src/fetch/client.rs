//! HTTP fetcher backed by reqwest.
//!
//! This is what the host adapter plugs into the worker: it turns a `Request`
//! into a single reqwest call and collects the full body before returning, so
//! the response can be both cached and handed back to the caller.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::Client;
use tracing::debug;

use super::{FetchError, Fetcher};
use crate::http::{Request, Response};

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Response headers that are never exposed to page scripts, and so are never
/// passed back or cached.
const FORBIDDEN_RESPONSE_HEADERS: &[&str] = &["set-cookie", "set-cookie2"];

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn method(request: &Request) -> Result<reqwest::Method, FetchError> {
        reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))
    }

    /// Repeated headers are combined into one comma-separated value.
    /// Non-ASCII header values are dropped rather than mangled.
    fn collect_headers(map: &HeaderMap) -> BTreeMap<String, String> {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in map {
            if FORBIDDEN_RESPONSE_HEADERS.contains(&name.as_str()) {
                continue;
            }
            let Ok(value) = value.to_str() else {
                continue;
            };
            headers
                .entry(name.as_str().to_string())
                .and_modify(|combined| {
                    combined.push_str(", ");
                    combined.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
        headers
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let mut builder = self
            .client
            .request(Self::method(request)?, request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();

        let headers = Self::collect_headers(response.headers());

        let body = response.bytes().await?.to_vec();
        debug!(url = %request.url, status, bytes = body.len(), "Network response received");

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
