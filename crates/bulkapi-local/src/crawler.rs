//! Bounded breadth-first crawl over a site's API tree (spec.md §4.5): a frontier of `(path,
//! depth)` pairs, first-insertion-wins depth tracking (a path rediscovered at a shallower
//! depth keeps its first-seen depth — "depth not lowered"), and termination once the frontier
//! is empty or every remaining path is already cached.
//!
//! Every fetch is routed through the `DiskCache` (spec.md's data-flow table: Crawler →
//! (SiteModel, Fetcher via DiskCache) → bulk mapping): a failed or non-2xx fetch becomes a
//! `DoNotPersist` cache outcome, which this crawler records as `Value::Null` for that path and
//! otherwise treats like any other leaf — a single bad page never aborts the crawl (spec.md
//! §4.5 edge cases, §7 `TransportError`/`NonSuccessStatus` policy).

use crate::cache::DiskCache;
use bulkapi_core::{ApiPath, BulkMap, CacheOutcome, Fetcher, RequestKey, Result, SiteModel};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

/// Crawl `site` starting at its `root_path`, fetching each node's JSON payload through `cache`
/// (so repeated crawls within `site.cache_period()` reuse prior fetches) and folding the result
/// into the returned `BulkMap`. A node whose `continue_crawl` returns `false` is still recorded
/// in the result but its children are not enqueued. A panic inside a `SiteModel` policy call is
/// caught (the policy contract requires pure, non-panicking functions, but a third-party site
/// policy is still untrusted input) and treated as though `continue_crawl` returned `false` for
/// that node — it is recorded with no children rather than aborting the whole crawl.
pub async fn crawl(
    site: &dyn SiteModel,
    fetcher: &dyn Fetcher,
    cache: &DiskCache,
    timeout: Duration,
) -> Result<BulkMap> {
    let mut frontier: HashMap<ApiPath, u32> = HashMap::new();
    frontier.insert(site.root_path().to_string(), 0);
    let mut bulk: BulkMap = BulkMap::new();

    loop {
        let Some((path, depth)) = pop_one(&mut frontier) else {
            break;
        };
        if bulk.contains_key(&path) {
            continue;
        }

        let url = absolute_url(site.endpoint(), &path);
        let key = RequestKey::with_headers(
            url,
            "GET",
            site.headers()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        let payload = cache
            .get_or_compute_json(&key, site.cache_period(), || async {
                match fetcher.fetch(&key, timeout).await {
                    Ok((status, body)) if (200..300).contains(&status) => {
                        match serde_json::from_slice::<serde_json::Value>(&body) {
                            Ok(value) => Ok(CacheOutcome::Persist(value)),
                            Err(_) => Ok(CacheOutcome::DoNotPersist),
                        }
                    }
                    _ => Ok(CacheOutcome::DoNotPersist),
                }
            })
            .await?;

        let should_continue = std::panic::catch_unwind(AssertUnwindSafe(|| {
            site.continue_crawl(&path, depth, &payload)
        }))
        .unwrap_or(false);

        if should_continue {
            let children = std::panic::catch_unwind(AssertUnwindSafe(|| {
                site.extract_crawl_paths(&path, &payload)
            }))
            .unwrap_or_default();
            for child in children {
                if !bulk.contains_key(&child) {
                    frontier.entry(child).or_insert(depth + 1);
                }
            }
        }

        bulk.insert(path, payload);

        // Pruning: drop any frontier entries already satisfied by `bulk`, matching spec.md's
        // `to_crawl.keys() & cache.keys()` step so re-discovered-but-cached paths don't linger.
        frontier.retain(|p, _| !bulk.contains_key(p));
    }

    Ok(bulk)
}

fn pop_one(frontier: &mut HashMap<ApiPath, u32>) -> Option<(ApiPath, u32)> {
    let path = frontier.keys().next().cloned()?;
    let depth = frontier.remove(&path).expect("key just observed present");
    Some((path, depth))
}

/// Resolve `path` against `endpoint` per standard URL-joining rules: an already-absolute
/// `path` (e.g. a `primary_action` link that names a full URL) is returned unchanged, and a
/// site-relative path replaces `endpoint`'s own path component. Falls back to a plain
/// concatenation if `endpoint` itself fails to parse as a URL (a malformed `SiteModel`
/// configuration — PolicyError territory, not worth aborting the crawl over).
fn absolute_url(endpoint: &str, path: &str) -> String {
    match url::Url::parse(endpoint).and_then(|base| base.join(path)) {
        Ok(resolved) => resolved.into(),
        Err(_) => format!("{}{}", endpoint.trim_end_matches('/'), path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingFetcher, MockFetcher};
    use serde_json::json;
    use std::collections::BTreeMap;

    struct StubSite {
        name: String,
        endpoint: String,
        root: String,
        headers: BTreeMap<String, String>,
        max_depth: u32,
    }

    impl SiteModel for StubSite {
        fn name(&self) -> &str {
            &self.name
        }
        fn endpoint(&self) -> &str {
            &self.endpoint
        }
        fn root_path(&self) -> &str {
            &self.root
        }
        fn headers(&self) -> &BTreeMap<String, String> {
            &self.headers
        }
        fn cache_period(&self) -> Duration {
            Duration::from_secs(3600)
        }
        fn continue_crawl(&self, _path: &str, depth: u32, _payload: &serde_json::Value) -> bool {
            depth < self.max_depth
        }
        fn extract_crawl_paths(&self, _path: &str, payload: &serde_json::Value) -> Vec<String> {
            payload
                .get("children")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn bfs_visits_every_reachable_node_exactly_once() {
        let endpoint = "https://example.com";
        let mut fetcher = MockFetcher::new();
        fetcher.register_json(
            format!("{endpoint}/root"),
            &json!({"children": ["/a", "/b"]}),
        );
        fetcher.register_json(format!("{endpoint}/a"), &json!({"children": ["/c"]}));
        fetcher.register_json(format!("{endpoint}/b"), &json!({"children": ["/c"]}));
        fetcher.register_json(format!("{endpoint}/c"), &json!({"children": []}));

        let site = StubSite {
            name: "stub".into(),
            endpoint: endpoint.into(),
            root: "/root".into(),
            headers: BTreeMap::new(),
            max_depth: 10,
        };

        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(tmp.path());
        let result = crawl(&site, &fetcher, &cache, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result.len(), 4, "c must be visited once despite two parents");
        assert!(result.contains_key("/root"));
        assert!(result.contains_key("/a"));
        assert!(result.contains_key("/b"));
        assert!(result.contains_key("/c"));
        assert_eq!(
            fetcher.calls().iter().filter(|u| u.ends_with("/c")).count(),
            1,
            "a shared child must be fetched only once"
        );
    }

    #[tokio::test]
    async fn continue_crawl_false_still_records_node_but_stops_expansion() {
        let endpoint = "https://example.com";
        let mut fetcher = MockFetcher::new();
        fetcher.register_json(format!("{endpoint}/root"), &json!({"children": ["/deep"]}));
        fetcher.register_json(format!("{endpoint}/deep"), &json!({"children": ["/never"]}));

        let site = StubSite {
            name: "stub".into(),
            endpoint: endpoint.into(),
            root: "/root".into(),
            headers: BTreeMap::new(),
            max_depth: 1,
        };

        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(tmp.path());
        let result = crawl(&site, &fetcher, &cache, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(result.contains_key("/root"));
        assert!(result.contains_key("/deep"));
        assert!(!result.contains_key("/never"));
    }

    #[tokio::test]
    async fn a_transport_failure_is_recorded_as_null_and_does_not_abort_the_crawl() {
        let site = StubSite {
            name: "stub".into(),
            endpoint: "https://example.com".into(),
            root: "/root".into(),
            headers: BTreeMap::new(),
            max_depth: 1,
        };
        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(tmp.path());
        let result = crawl(&site, &FailingFetcher, &cache, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result.get("/root"), Some(&serde_json::Value::Null));
    }

    #[tokio::test]
    async fn non_success_status_is_recorded_as_null_and_does_not_abort_the_crawl() {
        let endpoint = "https://example.com";
        let mut fetcher = MockFetcher::new();
        fetcher.register_status(format!("{endpoint}/root"), 500);
        let site = StubSite {
            name: "stub".into(),
            endpoint: endpoint.into(),
            root: "/root".into(),
            headers: BTreeMap::new(),
            max_depth: 1,
        };
        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(tmp.path());
        let result = crawl(&site, &fetcher, &cache, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result.get("/root"), Some(&serde_json::Value::Null));
    }

    #[tokio::test]
    async fn an_empty_root_payload_crawls_to_a_single_entry() {
        // spec.md §8 scenario 1: root returns `[]` with no further children.
        let endpoint = "https://example.com";
        let mut fetcher = MockFetcher::new();
        fetcher.register_json(format!("{endpoint}/root"), &json!([]));

        let site = StubSite {
            name: "stub".into(),
            endpoint: endpoint.into(),
            root: "/root".into(),
            headers: BTreeMap::new(),
            max_depth: 10,
        };

        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(tmp.path());
        let result = crawl(&site, &fetcher, &cache, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get("/root"), Some(&json!([])));
    }

    #[tokio::test]
    async fn a_cycle_back_to_an_already_fetched_path_does_not_loop_forever() {
        // spec.md §8 scenario 4: root links back to itself; the "already in bulk" check must
        // terminate the crawl with a single entry rather than re-enqueuing root forever.
        let endpoint = "https://example.com";
        let mut fetcher = MockFetcher::new();
        fetcher.register_json(format!("{endpoint}/root"), &json!({"children": ["/root"]}));

        let site = StubSite {
            name: "stub".into(),
            endpoint: endpoint.into(),
            root: "/root".into(),
            headers: BTreeMap::new(),
            max_depth: 10,
        };

        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(tmp.path());
        let result = crawl(&site, &fetcher, &cache, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.contains_key("/root"));
        assert_eq!(
            fetcher.calls().len(),
            1,
            "root must be fetched only once despite linking back to itself"
        );
    }

    #[tokio::test]
    async fn a_failed_fetch_does_not_create_a_cache_entry_so_the_next_crawl_retries() {
        let endpoint = "https://example.com";
        let site = StubSite {
            name: "stub".into(),
            endpoint: endpoint.into(),
            root: "/root".into(),
            headers: BTreeMap::new(),
            max_depth: 1,
        };
        let tmp = tempfile::tempdir().unwrap();
        let cache = DiskCache::new(tmp.path());

        crawl(&site, &FailingFetcher, &cache, Duration::from_secs(2))
            .await
            .unwrap();

        let mut fetcher = MockFetcher::new();
        fetcher.register_json(format!("{endpoint}/root"), &json!({"children": []}));
        let result = crawl(&site, &fetcher, &cache, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(result.get("/root"), Some(&json!({"children": []})));
    }
}
