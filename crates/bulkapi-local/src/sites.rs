//! Reference `SiteModel` implementations (spec.md §4.4), plus a name-keyed registry mirroring
//! design note §9's "registry of name → model" shape.

use crate::walker::{crawl_for_key, get_path};
use bulkapi_core::{ApiPath, SiteModel};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Crawls a features tree that is either a list of slugged (or directly-pathed) items or a
/// single node whose `primary_action.payload.link.href` names the next node to visit anywhere
/// in the payload. Stops expanding once a `playable_list` path has been seen past depth 2;
/// also stops under `/catchup/brand_group/` per spec.md §4.4.
pub struct FeatureCarSite {
    endpoint: String,
    headers: BTreeMap<String, String>,
}

impl FeatureCarSite {
    pub fn new() -> Self {
        Self {
            endpoint: "https://bff-car-guacamole.musicradio.com".to_string(),
            headers: BTreeMap::new(),
        }
    }
}

impl Default for FeatureCarSite {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteModel for FeatureCarSite {
    fn name(&self) -> &str {
        "bff_car"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn root_path(&self) -> &str {
        "/features"
    }

    fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    fn cache_period(&self) -> Duration {
        Duration::from_secs(3600)
    }

    fn continue_crawl(&self, path: &str, depth: u32, _payload: &serde_json::Value) -> bool {
        if path.contains("playable_list") && depth > 2 {
            return false;
        }
        if path.contains("/catchup/brand_group/") {
            return false;
        }
        true
    }

    fn extract_crawl_paths(&self, path: &str, payload: &serde_json::Value) -> Vec<ApiPath> {
        // A list payload whose first element carries a `slug` is a list of linkable items;
        // the same guard the original applies before indexing element 0, to avoid a panic on
        // an empty list.
        if let Some(items) = payload.as_array() {
            if let Some(first) = items.first() {
                if get_path(first, "slug").and_then(|s| s.as_str()).is_some() {
                    return items
                        .iter()
                        .filter_map(|item| get_path(item, "slug"))
                        .filter_map(|slug| slug.as_str())
                        .map(|slug| format!("{path}/{slug}"))
                        .collect();
                }
                if get_path(first, "path").is_some() {
                    return items
                        .iter()
                        .filter_map(|item| get_path(item, "path"))
                        .filter_map(|p| p.as_str())
                        .map(str::to_string)
                        .collect();
                }
            }
        }
        // Otherwise, follow every `primary_action.payload.link.href` found anywhere in the
        // payload (spec.md §4.4), not just at the top level.
        crawl_for_key(payload, "primary_action")
            .into_iter()
            .filter_map(|(_, primary_action)| get_path(primary_action, "payload.link.href"))
            .filter_map(|href| href.as_str())
            .filter(|href| !href.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Crawls a news feed whose entries link to articles: always continues the crawl (no depth or
/// path-based cutoff). Every `link` object anywhere in the payload (via `crawl_for_key`, not
/// just at the top level) is followed when that same link's own `type` is `"article"`.
pub struct ArticleFeedSite {
    endpoint: String,
    headers: BTreeMap<String, String>,
}

impl ArticleFeedSite {
    pub fn new() -> Self {
        let mut headers = BTreeMap::new();
        headers.insert(
            "accept".to_string(),
            "application/vnd.global.22+json".to_string(),
        );
        Self {
            endpoint: "https://bff-mobile-guacamole.musicradio.com".to_string(),
            headers,
        }
    }
}

impl Default for ArticleFeedSite {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteModel for ArticleFeedSite {
    fn name(&self) -> &str {
        "bff_mobile"
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn root_path(&self) -> &str {
        "/features/news/all-users"
    }

    fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    fn cache_period(&self) -> Duration {
        Duration::from_secs(3600)
    }

    fn continue_crawl(&self, _path: &str, _depth: u32, _payload: &serde_json::Value) -> bool {
        true
    }

    fn extract_crawl_paths(&self, _path: &str, payload: &serde_json::Value) -> Vec<ApiPath> {
        crawl_for_key(payload, "link")
            .into_iter()
            .filter(|(_, link)| get_path(link, "type").and_then(|t| t.as_str()) == Some("article"))
            .filter_map(|(_, link)| get_path(link, "href"))
            .filter_map(|href| href.as_str())
            .map(str::to_string)
            .collect()
    }
}

/// Name-keyed collection of configured sites, handed to the CLI/daemon so a deployment can
/// refresh an arbitrary subset by name without the daemon crate knowing any site's internals.
#[derive(Clone, Default)]
pub struct SiteRegistry {
    sites: BTreeMap<&'static str, Arc<dyn SiteModel>>,
}

impl SiteRegistry {
    pub fn new() -> Self {
        Self {
            sites: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, key: &'static str, site: Arc<dyn SiteModel>) -> &mut Self {
        self.sites.insert(key, site);
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn SiteModel>> {
        self.sites.get(key).cloned()
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.sites.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Arc<dyn SiteModel>)> {
        self.sites.iter().map(|(k, v)| (*k, v))
    }

    /// The two reference sites this deployment ships, registered under their site names.
    pub fn with_reference_sites() -> Self {
        let mut registry = Self::new();
        registry.register("bff_car", Arc::new(FeatureCarSite::new()));
        registry.register("bff_mobile", Arc::new(ArticleFeedSite::new()));
        registry
    }
}
