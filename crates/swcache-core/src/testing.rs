//! Scripted network for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::fetch::{FetchError, Fetcher};
use crate::http::{Request, Response};

/// Answers from a fixed table keyed by absolute URL and records every call.
/// URLs with no entry fail as if the network were down.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Result<Response, FetchError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(self, url: &str, response: Response) -> Self {
        self.set(url, Ok(response));
        self
    }

    pub(crate) fn fail(self, url: &str, message: &str) -> Self {
        self.set(url, Err(FetchError::Network(message.to_string())));
        self
    }

    pub(crate) fn set(&self, url: &str, result: Result<Response, FetchError>) {
        self.routes.lock().unwrap().insert(url.to_string(), result);
    }

    /// Drop every route so all further fetches fail.
    pub(crate) fn go_offline(&self) {
        self.routes.lock().unwrap().clear();
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push(url.clone());
        self.routes
            .lock()
            .unwrap()
            .get(&url)
            .cloned()
            .unwrap_or_else(|| Err(FetchError::Network(format!("no route to {}", url))))
    }
}
