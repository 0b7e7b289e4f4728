//! Network-free `Fetcher` double for exercising the crawler and refresh loop deterministically.
//! Gated behind `cfg(any(test, feature = "testing"))` so downstream crates (`bulkapi-daemon`)
//! can write integration tests against `crawl`/`RefreshLoop` without a live site.

use async_trait::async_trait;
use bulkapi_core::{Error, Fetcher, RequestKey, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Maps a `RequestKey`'s URL to a canned `(status, body)` response. Unregistered URLs return
/// a 404 with an empty body, matching a real site's behavior for an unknown path.
pub struct MockFetcher {
    responses: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_json(mut self, url: impl Into<String>, body: &serde_json::Value) -> Self {
        self.register_json(url, body);
        self
    }

    pub fn register_json(&mut self, url: impl Into<String>, body: &serde_json::Value) {
        let encoded = serde_json::to_vec(body).expect("test fixture value must serialize");
        self.responses
            .lock()
            .unwrap()
            .insert(url.into(), (200, encoded));
    }

    pub fn register_status(&mut self, url: impl Into<String>, status: u16) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.into(), (status, Vec::new()));
    }

    /// URLs fetched so far, in call order, for assertions on crawl traversal.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, key: &RequestKey, _timeout: Duration) -> Result<(u16, Vec<u8>)> {
        self.calls.lock().unwrap().push(key.url.clone());
        match self.responses.lock().unwrap().get(&key.url) {
            Some((status, body)) => Ok((*status, body.clone())),
            None => Ok((404, Vec::new())),
        }
    }
}

/// A `Fetcher` that always fails, for exercising failure-isolation paths (spec.md §4.8:
/// a crawl or preview failure must abandon only that refresh cycle).
pub struct FailingFetcher;

#[async_trait]
impl Fetcher for FailingFetcher {
    async fn fetch(&self, _key: &RequestKey, _timeout: Duration) -> Result<(u16, Vec<u8>)> {
        Err(Error::Transport("simulated failure".to_string()))
    }
}
