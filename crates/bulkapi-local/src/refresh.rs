//! Background refresh state machine (spec.md §4.8): IDLE → REFRESHING → SLEEPING, age-based
//! scheduling, a single-flight gate so overlapping triggers collapse onto one in-flight
//! refresh, and failure isolation — a failed cycle leaves the previous artifacts in place and
//! simply retries after a short backoff.

use crate::cache::DiskCache;
use crate::image::{image_previews, ImagePolicy};
use crate::writer::write_atomic;
use bulkapi_core::{BulkMap, Error, Fetcher, Result, SiteModel};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// How long to wait before retrying after a failed refresh cycle, distinct from (and normally
/// much shorter than) a site's `cache_period`.
const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Refreshing,
    Sleeping,
}

/// Drives one site's bulk-data and image-preview artifacts, writing `<base_dir>/<name>.json.gz`
/// and `<base_dir>/<name>-images.json.gz` and rotating the previous artifact on each successful
/// refresh. Every request this loop issues — crawl fetches and preview-service calls alike — is
/// memoised through one shared `DiskCache` rooted at `<base_dir>/cache` (spec.md §6's artifact
/// directory layout). Owns a capacity-1 semaphore so that `trigger` calls overlapping an
/// in-flight refresh simply wait for it rather than starting a second one (spec.md §5:
/// single-flight gate).
pub struct RefreshLoop {
    site: Arc<dyn SiteModel>,
    fetcher: Arc<dyn Fetcher>,
    base_dir: PathBuf,
    cache: DiskCache,
    image_policy: ImagePolicy,
    preview_endpoint: Option<String>,
    retry_period: Duration,
    gate: Arc<Semaphore>,
    state: std::sync::Mutex<RefreshState>,
    stop: AtomicBool,
}

impl RefreshLoop {
    pub fn new(
        site: Arc<dyn SiteModel>,
        fetcher: Arc<dyn Fetcher>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        let base_dir = base_dir.into();
        let cache = DiskCache::new(base_dir.join("cache"));
        Self {
            site,
            fetcher,
            base_dir,
            cache,
            image_policy: ImagePolicy::default_policy(),
            preview_endpoint: None,
            retry_period: DEFAULT_RETRY_PERIOD,
            gate: Arc::new(Semaphore::new(1)),
            state: std::sync::Mutex::new(RefreshState::Idle),
            stop: AtomicBool::new(false),
        }
    }

    pub fn with_preview_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.preview_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_retry_period(mut self, retry_period: Duration) -> Self {
        self.retry_period = retry_period;
        self
    }

    pub fn state(&self) -> RefreshState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: RefreshState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn bulk_artifact_path(&self) -> PathBuf {
        self.base_dir.join(format!("{}.json.gz", self.site.name()))
    }

    fn image_artifact_path(&self) -> PathBuf {
        self.base_dir
            .join(format!("{}-images.json.gz", self.site.name()))
    }

    fn age_of(path: &PathBuf) -> Option<Duration> {
        let mtime = std::fs::metadata(path).ok()?.modified().ok()?;
        std::time::SystemTime::now().duration_since(mtime).ok()
    }

    /// Whether an artifact of the given age (`None` if the artifact is missing) needs a
    /// refresh under `cache_period` (spec.md §4.8 state `IDLE`).
    fn is_stale(age: Option<Duration>, cache_period: Duration) -> bool {
        match age {
            Some(age) => age > cache_period,
            None => true,
        }
    }

    /// How long to sleep after a successful cycle that left the artifact at `age`: the
    /// remaining time until `cache_period` is reached, floored at `retry_period` so a cycle
    /// that raced another writer (or ran long) doesn't spin (spec.md §4.8 `SLEEPING(max(...))`).
    fn sleep_duration(age: Duration, cache_period: Duration, retry_period: Duration) -> Duration {
        cache_period.saturating_sub(age).max(retry_period)
    }

    /// Stop the loop after its current sleep/refresh cycle completes.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Run one refresh cycle unconditionally, regardless of current artifact age. On success,
    /// both artifacts are written; on any failure the artifacts are left untouched and the
    /// error is returned to the caller without panicking the loop.
    pub async fn refresh_once(&self) -> Result<()> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| Error::Pipeline(e.to_string()))?;
        self.set_state(RefreshState::Refreshing);

        let result = self.do_refresh().await;

        self.set_state(RefreshState::Idle);
        result
    }

    async fn do_refresh(&self) -> Result<()> {
        let timeout = bulkapi_core::DEFAULT_FETCH_TIMEOUT;
        let bulk: BulkMap = crate::crawler::crawl(
            self.site.as_ref(),
            self.fetcher.as_ref(),
            &self.cache,
            timeout,
        )
        .await?;

        write_atomic(
            &self.bulk_artifact_path(),
            &serde_json::to_value(&bulk).map_err(|e| Error::Decode(e.to_string()))?,
        )?;

        if let Some(endpoint) = &self.preview_endpoint {
            let headers: Vec<(String, String)> = self
                .site
                .headers()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let images = image_previews(
                &bulk,
                &self.image_policy,
                endpoint,
                &headers,
                &self.cache,
                self.fetcher.as_ref(),
                self.site.cache_period(),
                timeout,
            )
            .await?;
            write_atomic(
                &self.image_artifact_path(),
                &serde_json::to_value(&images).map_err(|e| Error::Decode(e.to_string()))?,
            )?;
        }

        Ok(())
    }

    /// The IDLE/REFRESHING/SLEEPING loop: refresh when the bulk artifact is missing or older
    /// than the site's `cache_period`, otherwise sleep for whichever is longer of the retry
    /// period and the remaining time until the artifact goes stale. Runs until `request_stop`
    /// is called; a failed refresh is logged and retried after `retry_period` rather than
    /// propagating out of the loop, so one bad cycle never takes the whole process down.
    pub async fn run(&self) -> Result<()> {
        while !self.stop.load(Ordering::SeqCst) {
            let sleep_for = self.tick().await;
            tokio::time::sleep(sleep_for).await;
        }
        Ok(())
    }

    /// One IDLE → (REFRESHING) → SLEEPING step: refresh if the bulk artifact is missing or
    /// older than `cache_period`, then return how long the caller should sleep before the next
    /// tick. Split out of `run` so the scheduling arithmetic (spec.md §8 scenario 6) can be
    /// exercised without an actual `tokio::time::sleep` in between.
    async fn tick(&self) -> Duration {
        let age = Self::age_of(&self.bulk_artifact_path());
        let stale = Self::is_stale(age, self.site.cache_period());

        if stale {
            if let Err(err) = self.refresh_once().await {
                tracing::warn!(
                    site = self.site.name(),
                    error = %err,
                    "refresh cycle failed; keeping previous artifacts"
                );
                self.set_state(RefreshState::Sleeping);
                return self.retry_period;
            }
        }

        self.set_state(RefreshState::Sleeping);
        let age = Self::age_of(&self.bulk_artifact_path()).unwrap_or(Duration::ZERO);
        Self::sleep_duration(age, self.site.cache_period(), self.retry_period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingFetcher, MockFetcher};
    use serde_json::json;
    use std::collections::BTreeMap;

    struct OneShotSite {
        headers: BTreeMap<String, String>,
    }

    impl SiteModel for OneShotSite {
        fn name(&self) -> &str {
            "oneshot"
        }
        fn endpoint(&self) -> &str {
            "https://example.com"
        }
        fn root_path(&self) -> &str {
            "/root"
        }
        fn headers(&self) -> &BTreeMap<String, String> {
            &self.headers
        }
        fn cache_period(&self) -> Duration {
            Duration::from_secs(3600)
        }
        fn continue_crawl(&self, _path: &str, _depth: u32, _payload: &serde_json::Value) -> bool {
            false
        }
        fn extract_crawl_paths(&self, _path: &str, _payload: &serde_json::Value) -> Vec<String> {
            Vec::new()
        }
    }

    #[tokio::test]
    async fn refresh_once_writes_a_bulk_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let mut fetcher = MockFetcher::new();
        fetcher.register_json("https://example.com/root", &json!({"ok": true}));

        let site = Arc::new(OneShotSite {
            headers: BTreeMap::new(),
        });
        let loop_ = RefreshLoop::new(site, Arc::new(fetcher), tmp.path());
        loop_.refresh_once().await.unwrap();

        assert!(tmp.path().join("oneshot.json.gz").exists());
        assert_eq!(loop_.state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn a_fetch_failure_does_not_abort_the_refresh_cycle() {
        // spec.md §4.5/§8 scenario 5: a fetch failure becomes an empty/null payload for that
        // path; the crawl (and therefore the refresh) still completes and an artifact is still
        // written.
        let tmp = tempfile::tempdir().unwrap();
        let site = Arc::new(OneShotSite {
            headers: BTreeMap::new(),
        });
        let loop_ = RefreshLoop::new(site, Arc::new(FailingFetcher), tmp.path());
        loop_.refresh_once().await.unwrap();
        assert!(tmp.path().join("oneshot.json.gz").exists());
        assert_eq!(loop_.state(), RefreshState::Idle);
    }

    #[tokio::test]
    async fn a_catastrophic_write_failure_fails_the_cycle_without_writing_an_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        // `base_dir` is itself a regular file, so every attempt to create a directory or write
        // a file under it fails — standing in for spec.md §7's `PipelineError` ("crawl or
        // preview step fails catastrophically").
        let base_dir = tmp.path().join("occupied");
        std::fs::write(&base_dir, b"not a directory").unwrap();

        let mut fetcher = MockFetcher::new();
        fetcher.register_json("https://example.com/root", &json!({"ok": true}));
        let site = Arc::new(OneShotSite {
            headers: BTreeMap::new(),
        });
        let loop_ = RefreshLoop::new(site, Arc::new(fetcher), &base_dir);
        assert!(loop_.refresh_once().await.is_err());
        assert_eq!(loop_.state(), RefreshState::Idle);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn a_second_catastrophically_failed_refresh_does_not_disturb_a_prior_artifact() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let mut fetcher = MockFetcher::new();
        fetcher.register_json("https://example.com/root", &json!({"ok": true}));
        let site = Arc::new(OneShotSite {
            headers: BTreeMap::new(),
        });
        let loop_ = RefreshLoop::new(site.clone(), Arc::new(fetcher), tmp.path());
        loop_.refresh_once().await.unwrap();
        let written = std::fs::read(tmp.path().join("oneshot.json.gz")).unwrap();

        // Strip write permission from the base directory so the second cycle's rename/write
        // of the bulk artifact fails, standing in for a catastrophic pipeline failure.
        let original_perms = std::fs::metadata(tmp.path()).unwrap().permissions();
        let mut readonly = original_perms.clone();
        readonly.set_mode(0o555);
        std::fs::set_permissions(tmp.path(), readonly).unwrap();

        let second_fetcher = {
            let mut f = MockFetcher::new();
            f.register_json("https://example.com/root", &json!({"ok": true}));
            f
        };
        let second_loop = RefreshLoop::new(site, Arc::new(second_fetcher), tmp.path());
        let result = second_loop.refresh_once().await;

        std::fs::set_permissions(tmp.path(), original_perms).unwrap();

        assert!(result.is_err(), "a write into a read-only directory must fail");
        let after = std::fs::read(tmp.path().join("oneshot.json.gz")).unwrap();
        assert_eq!(written, after, "failed cycle must not touch the existing artifact");
    }

    #[test]
    fn is_stale_treats_a_missing_artifact_as_infinitely_old() {
        assert!(RefreshLoop::is_stale(None, Duration::from_secs(60)));
        assert!(!RefreshLoop::is_stale(
            Some(Duration::from_secs(10)),
            Duration::from_secs(60)
        ));
        assert!(RefreshLoop::is_stale(
            Some(Duration::from_secs(61)),
            Duration::from_secs(60)
        ));
    }

    #[test]
    fn sleep_duration_is_floored_at_the_retry_period() {
        // plenty of cache life left: sleep the remainder.
        assert_eq!(
            RefreshLoop::sleep_duration(
                Duration::from_secs(10),
                Duration::from_secs(60),
                Duration::from_secs(5)
            ),
            Duration::from_secs(50)
        );
        // cache period already exceeded (a slow cycle): never sleep less than retry_period.
        assert_eq!(
            RefreshLoop::sleep_duration(
                Duration::from_secs(90),
                Duration::from_secs(60),
                Duration::from_secs(5)
            ),
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn a_stale_artifact_triggers_an_immediate_refresh_then_the_next_tick_sleeps() {
        // spec.md §8 scenario 6: back-date the artifact past `cache_period` so the first tick
        // refreshes it; the very next tick must then compute a sleep of at least
        // `retry_period` against the now-fresh artifact rather than refreshing again.
        let tmp = tempfile::tempdir().unwrap();
        let mut fetcher = MockFetcher::new();
        fetcher.register_json("https://example.com/root", &json!({"ok": true}));
        let site = Arc::new(OneShotSite {
            headers: BTreeMap::new(),
        });
        let retry_period = Duration::from_millis(20);
        let loop_ =
            RefreshLoop::new(site, Arc::new(fetcher), tmp.path()).with_retry_period(retry_period);

        // Pre-seed a stale artifact: older than cache_period (3600s).
        let artifact = tmp.path().join("oneshot.json.gz");
        std::fs::write(&artifact, b"stale-stub").unwrap();
        let stale_mtime = std::time::SystemTime::now() - Duration::from_secs(7200);
        filetime::set_file_mtime(&artifact, filetime::FileTime::from_system_time(stale_mtime))
            .unwrap();
        assert!(RefreshLoop::is_stale(
            RefreshLoop::age_of(&artifact),
            Duration::from_secs(3600)
        ));

        let first_sleep = loop_.tick().await;
        let refreshed = std::fs::read(&artifact).unwrap();
        assert_ne!(refreshed, b"stale-stub", "stale artifact must have been regenerated");

        let second_sleep = loop_.tick().await;
        assert!(
            second_sleep >= retry_period,
            "tick on a freshly-written artifact must not schedule an immediate re-refresh"
        );
        assert_eq!(
            std::fs::read(&artifact).unwrap(),
            refreshed,
            "a fresh artifact must not be refreshed again on the very next tick"
        );
    }
}
