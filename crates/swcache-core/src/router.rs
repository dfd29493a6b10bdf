//! Request classification.
//!
//! Every intercepted request is put into exactly one class, first match wins:
//!
//! 1. hostname equals the API host: `Api`
//! 2. origin differs from the page origin: `CrossOrigin`
//! 3. otherwise: `SameOrigin`
//!
//! Comparisons are exact. `api.example.com` does not match
//! `staging.api.example.com`, and `http://site:8080` is a different origin
//! from `http://site`.

use std::fmt;

use url::{Origin, Url};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// Network only, synthesized offline JSON on failure
    Api,
    /// Network first, cache fallback
    CrossOrigin,
    /// Cache first, network fallback
    SameOrigin,
}

impl RequestClass {
    pub fn strategy_name(&self) -> &'static str {
        match self {
            Self::Api => "network-only",
            Self::CrossOrigin => "network-first",
            Self::SameOrigin => "cache-first",
        }
    }
}

impl fmt::Display for RequestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Api => "api",
            Self::CrossOrigin => "cross-origin",
            Self::SameOrigin => "same-origin",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Router {
    api_host: String,
    origin: Origin,
}

impl Router {
    pub fn new(api_host: &str, page_origin: &Url) -> Self {
        Self {
            // Url::host_str is already lowercased by the parser
            api_host: api_host.to_ascii_lowercase(),
            origin: page_origin.origin(),
        }
    }

    pub fn api_host(&self) -> &str {
        &self.api_host
    }

    pub fn classify(&self, url: &Url) -> RequestClass {
        if url.host_str() == Some(self.api_host.as_str()) {
            RequestClass::Api
        } else if url.origin() != self.origin {
            // Opaque origins (data:, blob: without a tuple origin) never compare equal
            RequestClass::CrossOrigin
        } else {
            RequestClass::SameOrigin
        }
    }
}

/// One-shot classification without building a `Router`.
pub fn classify(url: &Url, api_host: &str, page_origin: &Url) -> RequestClass {
    Router::new(api_host, page_origin).classify(url)
}
