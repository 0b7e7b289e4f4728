//! Image preview harvesting and resolution (spec.md §4.6): paths already present in a crawled
//! `BulkMap` are skipped when they match a path deny-list, and the image URLs harvested from
//! the rest are filtered by a URL-substring allowlist before being resolved through the disk
//! cache against an external preview microservice that returns base64-encoded bytes for a
//! POSTed `{"url": ...}` body.

use crate::walker::crawl_for_key;
use bulkapi_core::{
    BulkMap, CacheOutcome, Error, Fetcher, ImageMap, RequestKey, Result,
};
use regex::Regex;
use std::time::Duration;

/// Which crawled nodes are eligible to have their image URLs harvested and resolved: a
/// path-regex skip-list (mirroring the crawl-side stop rule for brand-group catchup pages)
/// paired with a URL-substring allowlist covering the domain tokens in use across this
/// deployment (`global`, `musicrad`, `bff-car`) per spec.md §4.6.
pub struct ImagePolicy {
    pub skip_path_patterns: Vec<Regex>,
    pub url_substrings: Vec<String>,
}

impl ImagePolicy {
    pub fn default_policy() -> Self {
        Self {
            skip_path_patterns: vec![
                Regex::new(r"^/catchup/brand_group/").expect("static regex"),
            ],
            url_substrings: vec![
                "images.".to_string(),
                "global".to_string(),
                "musicrad".to_string(),
                "bff-car".to_string(),
            ],
        }
    }

    fn path_skipped(&self, path: &str) -> bool {
        self.skip_path_patterns.iter().any(|re| re.is_match(path))
    }

    fn url_allowed(&self, url: &str) -> bool {
        self.url_substrings.iter().any(|s| url.contains(s.as_str()))
    }
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self::default_policy()
    }
}

/// Image-bearing JSON keys harvested via `crawl_for_key`: any value nested under a key
/// literally named `url`, per spec.md §4.6.
const IMAGE_KEY: &str = "url";

/// Harvest image URLs from paths in `bulk` allowed by `policy`, resolve each through the
/// preview service at `preview_endpoint` (cached through `cache`), and return the resulting
/// `ImageMap`. A resolution failure for one URL (network error, non-2xx, or the preview
/// service signaling "try again later") is recorded as `DoNotPersist` for that URL alone and
/// does not abort the batch (spec.md §4.8 failure isolation).
pub async fn image_previews(
    bulk: &BulkMap,
    policy: &ImagePolicy,
    preview_endpoint: &str,
    headers: &[(String, String)],
    cache: &crate::cache::DiskCache,
    fetcher: &dyn Fetcher,
    ttl: Duration,
    timeout: Duration,
) -> Result<ImageMap> {
    let mut out = ImageMap::new();
    for (path, payload) in bulk {
        if policy.path_skipped(path) {
            continue;
        }
        for (_, value) in crawl_for_key(payload, IMAGE_KEY) {
            let Some(url) = value.as_str() else { continue };
            if !policy.url_allowed(url) {
                continue;
            }
            if out.contains_key(url) {
                continue;
            }

            let request = RequestKey::with_json_body(
                preview_endpoint,
                "POST",
                headers.iter().cloned(),
                &serde_json::json!({ "url": url }),
            )?;

            let text = cache
                .get_or_compute_text(&request, ttl, || async {
                    match fetcher.fetch(&request, timeout).await {
                        Ok((status, body)) if (200..300).contains(&status) => {
                            match String::from_utf8(body) {
                                Ok(text) => Ok(CacheOutcome::Persist(text)),
                                Err(_) => Ok(CacheOutcome::DoNotPersist),
                            }
                        }
                        _ => Ok(CacheOutcome::DoNotPersist),
                    }
                })
                .await
                .unwrap_or_default();

            out.insert(url.to_string(), text);
        }
    }
    Ok(out)
}

/// Surfaced so callers constructing a request outside `image_previews` (e.g. tests) share the
/// same error conversion path as the main resolution loop.
pub fn preview_request(
    preview_endpoint: &str,
    headers: &[(String, String)],
    url: &str,
) -> Result<RequestKey> {
    RequestKey::with_json_body(
        preview_endpoint,
        "POST",
        headers.iter().cloned(),
        &serde_json::json!({ "url": url }),
    )
    .map_err(|e| Error::Pipeline(e.to_string()))
}
