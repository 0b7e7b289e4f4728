//! reqwest-backed `Fetcher` (spec.md §4.1): a single shared `reqwest::Client`, explicit
//! connect/read timeouts, and no retry logic (retries belong to the crawler/refresh loop, not
//! the fetcher).

use async_trait::async_trait;
use bulkapi_core::{Error, Fetcher, RequestKey, Result};
use std::time::Duration;

pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Builds a client that accepts invalid TLS certificates, matching spec.md §4.1's explicit
    /// note that upstream sites in this deployment are fetched over misconfigured TLS and that
    /// this is a deliberate, documented relaxation rather than an oversight.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Default for ReqwestFetcher {
    fn default() -> Self {
        Self::new().expect("default TLS backend must be constructible")
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, key: &RequestKey, timeout: Duration) -> Result<(u16, Vec<u8>)> {
        let method = reqwest::Method::from_bytes(key.method.as_bytes())
            .map_err(|e| Error::Transport(e.to_string()))?;
        let mut builder = self.client.request(method, &key.url).timeout(timeout);
        for (name, value) in &key.headers {
            builder = builder.header(name, value);
        }
        if !key.body.is_empty() {
            builder = builder.body(key.body.clone());
        }
        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok((status, bytes.to_vec()))
    }
}
