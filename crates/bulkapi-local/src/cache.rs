//! TTL-gated, request-keyed persistent memo of fetch results (spec.md §4.2).
//!
//! Layout: `<root>/<fp><suffix>`, flat — no subdirectory fan-out (spec.md §6). Writes are
//! atomic (`.tmp` + rename). Concurrent callers for the same fingerprint are coalesced onto a
//! single in-flight `produce` via a per-fingerprint async mutex, satisfying spec.md's
//! single-flight SHOULD.

use bulkapi_core::{CacheKind, CacheOutcome, Error, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::future::Future;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex as AsyncMutex;

#[derive(Clone)]
pub struct DiskCache {
    root: PathBuf,
    locks: Arc<StdMutex<HashMap<u64, Arc<AsyncMutex<()>>>>>,
}

impl DiskCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, fp_hex: &str, kind: CacheKind) -> PathBuf {
        self.root.join(format!("{fp_hex}{}", kind.suffix()))
    }

    fn is_expired(path: &Path, ttl: Duration) -> bool {
        match std::fs::metadata(path).and_then(|m| m.modified()) {
            Ok(mtime) => SystemTime::now()
                .duration_since(mtime)
                .unwrap_or(Duration::ZERO)
                > ttl,
            Err(_) => true,
        }
    }

    fn read_entry(path: &Path, kind: CacheKind) -> Result<Vec<u8>> {
        let raw = std::fs::read(path).map_err(|e| Error::CacheCorruption(e.to_string()))?;
        match kind {
            CacheKind::Json | CacheKind::Html => {
                let mut decoder = GzDecoder::new(&raw[..]);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| Error::CacheCorruption(e.to_string()))?;
                Ok(out)
            }
            CacheKind::Text | CacheKind::Bytes => Ok(raw),
        }
    }

    fn write_entry(path: &Path, kind: CacheKind, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::CacheCorruption(e.to_string()))?;
        }
        let encoded = match kind {
            CacheKind::Json | CacheKind::Html => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(bytes)
                    .map_err(|e| Error::CacheCorruption(e.to_string()))?;
                encoder
                    .finish()
                    .map_err(|e| Error::CacheCorruption(e.to_string()))?
            }
            CacheKind::Text | CacheKind::Bytes => bytes.to_vec(),
        };
        let tmp = path.with_extension(format!(
            "{}.tmp",
            path.extension().and_then(|e| e.to_str()).unwrap_or("")
        ));
        std::fs::write(&tmp, &encoded).map_err(|e| Error::CacheCorruption(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| Error::CacheCorruption(e.to_string()))?;
        Ok(())
    }

    async fn lock_for(&self, fingerprint: u64) -> Arc<AsyncMutex<()>> {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        map.entry(fingerprint)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn prune_lock(&self, fingerprint: u64, lock: &Arc<AsyncMutex<()>>) {
        let mut map = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // `lock` plus the map's own entry are the only two references once no other
        // in-flight caller is waiting on this fingerprint; drop it so the map doesn't grow
        // without bound across a long-running process.
        if Arc::strong_count(lock) <= 2 {
            map.remove(&fingerprint);
        }
    }

    /// Raw byte-level memoization. `produce` is invoked at most once per cache miss (modulo
    /// the single-flight relaxation documented above); a `DoNotPersist` outcome returns an
    /// empty byte vector and writes nothing to disk.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &bulkapi_core::RequestKey,
        kind: CacheKind,
        ttl: Duration,
        produce: F,
    ) -> Result<Vec<u8>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheOutcome<Vec<u8>>>>,
    {
        let fingerprint = key.fingerprint();
        let fp_hex = key.fingerprint_hex();
        let path = self.path_for(&fp_hex, kind);

        let lock = self.lock_for(fingerprint).await;
        let _guard = lock.lock().await;

        if path.exists() && !Self::is_expired(&path, ttl) {
            if let Ok(bytes) = Self::read_entry(&path, kind) {
                drop(_guard);
                self.prune_lock(fingerprint, &lock);
                return Ok(bytes);
            }
            // Corrupted entry: fall through and treat as a miss (spec.md §7: CacheCorruption).
        }

        let outcome = produce().await?;
        let result = match outcome {
            CacheOutcome::DoNotPersist => Vec::new(),
            CacheOutcome::Persist(bytes) => {
                Self::write_entry(&path, kind, &bytes)?;
                bytes
            }
        };
        drop(_guard);
        self.prune_lock(fingerprint, &lock);
        Ok(result)
    }

    /// JSON-typed convenience over `get_or_compute`. An empty byte result (DoNotPersist)
    /// decodes to `serde_json::Value::Null` — no valid serialized JSON value is ever empty,
    /// so there's no ambiguity between "persisted null" and "not persisted".
    pub async fn get_or_compute_json<F, Fut>(
        &self,
        key: &bulkapi_core::RequestKey,
        ttl: Duration,
        produce: F,
    ) -> Result<serde_json::Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheOutcome<serde_json::Value>>>,
    {
        let bytes = self
            .get_or_compute(key, CacheKind::Json, ttl, || async {
                match produce().await? {
                    CacheOutcome::DoNotPersist => Ok(CacheOutcome::DoNotPersist),
                    CacheOutcome::Persist(value) => {
                        let encoded = serde_json::to_vec(&value)
                            .map_err(|e| Error::Decode(e.to_string()))?;
                        Ok(CacheOutcome::Persist(encoded))
                    }
                }
            })
            .await?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Text-typed convenience over `get_or_compute`. An empty result (DoNotPersist, or an
    /// entry that failed UTF-8 decoding) is represented as `""`.
    pub async fn get_or_compute_text<F, Fut>(
        &self,
        key: &bulkapi_core::RequestKey,
        ttl: Duration,
        produce: F,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CacheOutcome<String>>>,
    {
        let bytes = self
            .get_or_compute(key, CacheKind::Text, ttl, || async {
                match produce().await? {
                    CacheOutcome::DoNotPersist => Ok(CacheOutcome::DoNotPersist),
                    CacheOutcome::Persist(text) => Ok(CacheOutcome::Persist(text.into_bytes())),
                }
            })
            .await?;
        Ok(String::from_utf8(bytes).unwrap_or_default())
    }
}
