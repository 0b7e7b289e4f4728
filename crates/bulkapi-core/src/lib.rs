//! Backend-agnostic types and traits for the bulkapi crawl/cache/preview pipeline.
//!
//! This crate owns the data model (`RequestKey`, `BulkMap`, `ImageMap`, `CacheKind`), the
//! error taxonomy, and the `Fetcher`/`SiteModel` trait seams. It performs no IO itself;
//! `bulkapi-local` supplies the filesystem cache, the reqwest-backed fetcher, the crawler,
//! and the reference site policies.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

pub type ApiPath = String;
pub type ImageUrl = String;
pub type Base64EncodedImage = String;

/// Mapping from a site-relative API path to its decoded JSON payload — the output of one
/// crawl. Keys are unique; insertion order is not observable to consumers, so `BTreeMap` is
/// used for deterministic serialization rather than a hash map.
pub type BulkMap = BTreeMap<ApiPath, serde_json::Value>;

/// Mapping from an absolute image URL to its base64-encoded preview. An empty string means
/// "preview unavailable, do not retry until TTL".
pub type ImageMap = BTreeMap<ImageUrl, Base64EncodedImage>;

/// Default per-fetch timeout (spec.md §5: every network fetch has a finite timeout).
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Error taxonomy (kinds, not type names) — see spec.md §7.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("non-success status: {0}")]
    NonSuccessStatus(u16),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("cache corruption: {0}")]
    CacheCorruption(String),
    #[error("site policy error: {0}")]
    Policy(String),
    #[error("pipeline error: {0}")]
    Pipeline(String),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Immutable, hashable descriptor of one HTTP request. Two `RequestKey`s are equal iff all
/// four fields compare equal, with headers compared as a set — achieved here by storing
/// headers in a `BTreeSet` so the derived `PartialEq`/`Eq`/`Hash`/`Ord` are already
/// structural and canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
    pub url: String,
    pub method: String,
    pub headers: BTreeSet<(String, String)>,
    pub body: Vec<u8>,
}

impl RequestKey {
    /// Build a `GET` request key with no body.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: BTreeSet::new(),
            body: Vec::new(),
        }
    }

    /// Build a request key, adding the supplied headers (ordered by the caller but
    /// canonicalised to a set here, per spec.md §3).
    pub fn with_headers(
        url: impl Into<String>,
        method: impl Into<String>,
        headers: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            url: url.into(),
            method: method.into(),
            headers: headers.into_iter().collect(),
            body: Vec::new(),
        }
    }

    /// Build a request key whose body is a JSON-encoded value. If `body` would otherwise be
    /// empty, the value is UTF-8 JSON encoded and `Content-Type: application/json` is added
    /// to `headers` (spec.md §3).
    pub fn with_json_body(
        url: impl Into<String>,
        method: impl Into<String>,
        headers: impl IntoIterator<Item = (String, String)>,
        json: &serde_json::Value,
    ) -> Result<Self> {
        let body = serde_json::to_vec(json).map_err(|e| Error::Decode(e.to_string()))?;
        let mut headers: BTreeSet<(String, String)> = headers.into_iter().collect();
        headers.insert(("Content-Type".to_string(), "application/json".to_string()));
        Ok(Self {
            url: url.into(),
            method: method.into(),
            headers,
            body,
        })
    }

    /// A stable 64-bit fingerprint used as a filename root. SHA-256 over a canonical byte
    /// encoding of all four fields, truncated to its first 8 bytes (big-endian).
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(b"method:");
        hasher.update(self.method.as_bytes());
        hasher.update(b"\nurl:");
        hasher.update(self.url.as_bytes());
        hasher.update(b"\nheaders:");
        for (k, v) in &self.headers {
            hasher.update(k.as_bytes());
            hasher.update(b"=");
            hasher.update(v.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(b"\nbody:");
        hasher.update(&self.body);
        let digest = hasher.finalize();
        u64::from_be_bytes(digest[0..8].try_into().expect("sha256 digest >= 8 bytes"))
    }

    /// `fingerprint()` rendered as 16 lowercase hex characters, used as a filename root.
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint().to_be_bytes())
    }
}

/// Cache payload kind: determines on-disk encoding and filename suffix (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
    Json,
    Html,
    Text,
    Bytes,
}

impl CacheKind {
    pub fn suffix(self) -> &'static str {
        match self {
            CacheKind::Json => ".json.gz",
            CacheKind::Html => ".html.gz",
            CacheKind::Text => ".txt",
            CacheKind::Bytes => ".bin",
        }
    }
}

/// Signal from a cache producer meaning "return an empty result and do not record it"
/// (spec.md: `DoNotPersist`).
pub enum CacheOutcome<V> {
    Persist(V),
    DoNotPersist,
}

/// Execute one HTTP request described by a `RequestKey`, returning the raw status and body.
/// Never decodes, never retries — retry policy belongs to the caller (spec.md §4.1).
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &RequestKey, timeout: Duration) -> Result<(u16, Vec<u8>)>;
}

/// Per-site crawl policy (spec.md §4.4). Methods are pure functions of `(path, depth,
/// payload)` and MUST NOT perform I/O.
pub trait SiteModel: Send + Sync {
    /// Stable identifier used in output filenames.
    fn name(&self) -> &str;
    /// Absolute URL prefix.
    fn endpoint(&self) -> &str;
    /// `ApiPath` where the crawl begins.
    fn root_path(&self) -> &str;
    /// Request headers applied to every fetch.
    fn headers(&self) -> &BTreeMap<String, String>;
    /// How stale the bulk artifact may become before refresh.
    fn cache_period(&self) -> Duration;
    /// Whether to expand this node's children.
    fn continue_crawl(&self, path: &str, depth: u32, payload: &serde_json::Value) -> bool;
    /// Child paths discovered in `payload`, absolute or site-relative.
    fn extract_crawl_paths(&self, path: &str, payload: &serde_json::Value) -> Vec<ApiPath>;
}
