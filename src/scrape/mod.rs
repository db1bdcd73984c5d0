//! Scrape orchestration: mode selection, cache lookup, fallback chain.

pub mod dynamic_fetcher;
pub mod heuristics;
pub mod static_fetcher;
pub mod types;

pub use dynamic_fetcher::DynamicFetcher;
pub use static_fetcher::StaticFetcher;
pub use types::{
    ImageFormat, ImageRef, ScrapeMode, ScrapeOptions, ScrapeRequest, ScrapeResult, Screenshot,
    ENGINE_DYNAMIC, ENGINE_STATIC,
};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cache::{self, ResultCache};
use crate::error::ScrapeError;
use crate::utils::constants::{CACHE_TTL, DYNAMIC_SAFETY_FLOOR};
use crate::utils::Deadline;

/// A scraping strategy. Implemented by [`StaticFetcher`] and
/// [`DynamicFetcher`]; the orchestrator consumes both polymorphically.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn scrape(
        &self,
        url: &str,
        opts: &ScrapeOptions,
        deadline: Deadline,
    ) -> Result<ScrapeResult, ScrapeError>;
}

/// Cache key for a `(url, mode)` pair. The raw URL is embedded unescaped;
/// requests differing only in media options share an entry.
pub fn cache_key(url: &str, mode: ScrapeMode) -> String {
    format!("scrape:{url}:{mode}")
}

/// Selects a strategy per request, consults the cache, and assembles the
/// final result. Stateless across requests: holds only immutable references
/// to its collaborators, so one instance serves the HTTP layer and the
/// embedded worker concurrently.
pub struct Orchestrator {
    static_fetcher: Arc<dyn Fetcher>,
    dynamic_fetcher: Option<Arc<dyn Fetcher>>,
    cache: Arc<dyn ResultCache>,
    cache_ttl: Duration,
}

impl Orchestrator {
    pub fn new(
        static_fetcher: Arc<dyn Fetcher>,
        dynamic_fetcher: Option<Arc<dyn Fetcher>>,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self {
            static_fetcher,
            dynamic_fetcher,
            cache,
            cache_ttl: CACHE_TTL,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Scrape `url` with the given mode.
    ///
    /// `url` must be pre-validated as absolute http/https. On success the
    /// result always carries an `engine` tag; cache hits additionally carry
    /// `cached="true"` with the original `scraped_at` untouched.
    pub async fn scrape(
        &self,
        url: &str,
        mode: ScrapeMode,
        opts: &ScrapeOptions,
        deadline: Deadline,
    ) -> Result<ScrapeResult, ScrapeError> {
        let key = cache_key(url, mode);

        if let Some(mut hit) = self.cache_lookup(&key).await {
            hit.mark_cached();
            debug!(url, %mode, "Cache hit");
            return Ok(hit);
        }

        let result = match mode {
            ScrapeMode::Static => self.static_fetcher.scrape(url, opts, deadline).await?,
            ScrapeMode::Dynamic => self.dynamic(url, opts, deadline).await?,
            ScrapeMode::Smart => self.smart(url, opts, deadline).await?,
        };

        self.cache_store(&key, &result).await;
        Ok(result)
    }

    /// Smart mode: static first, browser only when the HTML demands it.
    async fn smart(
        &self,
        url: &str,
        opts: &ScrapeOptions,
        deadline: Deadline,
    ) -> Result<ScrapeResult, ScrapeError> {
        match self.static_fetcher.scrape(url, opts, deadline).await {
            Ok(static_result) => {
                let html = static_result.html.as_deref().unwrap_or("");
                // An empty page from a 200 response is as good as an
                // unrendered shell.
                let fallback = html.is_empty() || heuristics::needs_dynamic(html);
                if !fallback {
                    return Ok(static_result);
                }
                if self.dynamic_fetcher.is_none() {
                    debug!(url, "Heuristic wants dynamic but no browser is configured");
                    return Ok(static_result);
                }
                debug!(url, "Smart fallback to dynamic");
                self.dynamic(url, opts, deadline).await
            }
            Err(static_err) => {
                if self.dynamic_fetcher.is_none() {
                    return Err(static_err);
                }
                debug!(url, error = %static_err, "Static failed, falling back to dynamic");
                self.dynamic(url, opts, deadline).await
            }
        }
    }

    async fn dynamic(
        &self,
        url: &str,
        opts: &ScrapeOptions,
        deadline: Deadline,
    ) -> Result<ScrapeResult, ScrapeError> {
        let Some(fetcher) = self.dynamic_fetcher.as_ref() else {
            return Err(ScrapeError::Config(
                "dynamic scraping requires a browser, which is not configured".into(),
            ));
        };

        // Not worth spinning up a tab for a request that is about to expire.
        if let Some(remaining) = deadline.remaining() {
            if remaining < DYNAMIC_SAFETY_FLOOR {
                return Err(ScrapeError::Timeout("dynamic fetch".into()));
            }
        }

        fetcher.scrape(url, opts, deadline).await
    }

    /// Cache read. Any failure (transport or payload decode) degrades to a
    /// miss; the cache must never fail a request.
    async fn cache_lookup(&self, key: &str) -> Option<ScrapeResult> {
        let bytes = match self.cache.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, "Cache get failed: {e}");
                return None;
            }
        };

        match cache::decompress(&bytes)
            .and_then(|json| serde_json::from_slice(&json).map_err(|e| ScrapeError::Cache(e.to_string())))
        {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(key, "Discarding undecodable cache entry: {e}");
                None
            }
        }
    }

    /// Cache write. Errors are logged and dropped.
    async fn cache_store(&self, key: &str, result: &ScrapeResult) {
        let payload = match serde_json::to_vec(result) {
            Ok(json) => match cache::compress(&json) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(key, "Cache encode failed: {e}");
                    return;
                }
            },
            Err(e) => {
                warn!(key, "Cache serialize failed: {e}");
                return;
            }
        };

        if let Err(e) = self.cache.set(key, payload, self.cache_ttl).await {
            warn!(key, "Cache set failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubFetcher {
        calls: AtomicUsize,
        response: Box<dyn Fn() -> Result<ScrapeResult, ScrapeError> + Send + Sync>,
    }

    impl StubFetcher {
        fn ok(engine: &'static str, html: &'static str) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                response: Box::new(move || {
                    let mut r =
                        ScrapeResult::new("https://example.com", format!("md from {engine}"), engine);
                    r.html = Some(html.to_string());
                    Ok(r)
                }),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                response: Box::new(|| Err(ScrapeError::ScrapeFailed(anyhow::anyhow!("boom")))),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn scrape(
            &self,
            _url: &str,
            _opts: &ScrapeOptions,
            _deadline: Deadline,
        ) -> Result<ScrapeResult, ScrapeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.response)()
        }
    }

    #[derive(Default)]
    struct MemoryCache {
        entries: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl ResultCache for MemoryCache {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ScrapeError> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        async fn set(
            &self,
            key: &str,
            value: Vec<u8>,
            _ttl: Duration,
        ) -> Result<(), ScrapeError> {
            self.entries.lock().unwrap().insert(key.to_string(), value);
            Ok(())
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl ResultCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, ScrapeError> {
            Err(ScrapeError::Cache("get refused".into()))
        }

        async fn set(
            &self,
            _key: &str,
            _value: Vec<u8>,
            _ttl: Duration,
        ) -> Result<(), ScrapeError> {
            Err(ScrapeError::Cache("set refused".into()))
        }
    }

    // Big enough to stay clear of both heuristic size thresholds.
    const PLAIN_ARTICLE: &str = "<html><body><h1>Title</h1><p>A perfectly ordinary static page with plenty of content to read. Nothing here hints at client-side rendering, and the page stands on its own without scripts.</p><p>More prose follows so the document is clearly not an application shell in any sense of the term. It is just an article.</p><p>Even more prose. Paragraph after paragraph of honest server-rendered content, the kind a static fetch captures perfectly well on the first try without any browser.</p><p>Closing thoughts and a footer.</p></body></html>";

    const SPA_SHELL: &str = r#"<!doctype html><html><head></head><body><div id="root"></div><script src="/app.js"></script></body></html>"#;

    #[test]
    fn cache_key_embeds_url_and_mode() {
        assert_eq!(
            cache_key("https://example.com/a?b=c", ScrapeMode::Smart),
            "scrape:https://example.com/a?b=c:smart"
        );
        assert_ne!(
            cache_key("https://example.com", ScrapeMode::Static),
            cache_key("https://example.com", ScrapeMode::Dynamic)
        );
    }

    #[tokio::test]
    async fn static_mode_never_touches_dynamic() {
        let static_fetcher = StubFetcher::ok(ENGINE_STATIC, SPA_SHELL);
        let dynamic_fetcher = StubFetcher::ok(ENGINE_DYNAMIC, "<html>rendered</html>");
        let orch = Orchestrator::new(
            static_fetcher.clone(),
            Some(dynamic_fetcher.clone()),
            Arc::new(MemoryCache::default()),
        );

        let result = orch
            .scrape(
                "https://example.com",
                ScrapeMode::Static,
                &ScrapeOptions::default(),
                Deadline::none(),
            )
            .await
            .unwrap();

        assert_eq!(result.engine(), Some(ENGINE_STATIC));
        assert_eq!(static_fetcher.calls(), 1);
        assert_eq!(dynamic_fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn dynamic_mode_never_touches_static() {
        let static_fetcher = StubFetcher::ok(ENGINE_STATIC, PLAIN_ARTICLE);
        let dynamic_fetcher = StubFetcher::ok(ENGINE_DYNAMIC, "<html>rendered</html>");
        let orch = Orchestrator::new(
            static_fetcher.clone(),
            Some(dynamic_fetcher.clone()),
            Arc::new(MemoryCache::default()),
        );

        let result = orch
            .scrape(
                "https://example.com",
                ScrapeMode::Dynamic,
                &ScrapeOptions::default(),
                Deadline::none(),
            )
            .await
            .unwrap();

        assert_eq!(result.engine(), Some(ENGINE_DYNAMIC));
        assert_eq!(static_fetcher.calls(), 0);
        assert_eq!(dynamic_fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn dynamic_mode_without_browser_is_a_config_error() {
        let orch = Orchestrator::new(
            StubFetcher::ok(ENGINE_STATIC, PLAIN_ARTICLE),
            None,
            Arc::new(MemoryCache::default()),
        );

        let err = orch
            .scrape(
                "https://example.com",
                ScrapeMode::Dynamic,
                &ScrapeOptions::default(),
                Deadline::none(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ScrapeError::Config(_)));
    }

    #[tokio::test]
    async fn smart_keeps_static_result_for_ordinary_pages() {
        let static_fetcher = StubFetcher::ok(ENGINE_STATIC, PLAIN_ARTICLE);
        let dynamic_fetcher = StubFetcher::ok(ENGINE_DYNAMIC, "<html>rendered</html>");
        let orch = Orchestrator::new(
            static_fetcher.clone(),
            Some(dynamic_fetcher.clone()),
            Arc::new(MemoryCache::default()),
        );

        let result = orch
            .scrape(
                "https://example.com",
                ScrapeMode::Smart,
                &ScrapeOptions::default(),
                Deadline::none(),
            )
            .await
            .unwrap();

        assert_eq!(result.engine(), Some(ENGINE_STATIC));
        assert_eq!(dynamic_fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn smart_falls_back_on_spa_shells_and_dynamic_wins() {
        let static_fetcher = StubFetcher::ok(ENGINE_STATIC, SPA_SHELL);
        let dynamic_fetcher = StubFetcher::ok(ENGINE_DYNAMIC, "<html>rendered</html>");
        let orch = Orchestrator::new(
            static_fetcher.clone(),
            Some(dynamic_fetcher.clone()),
            Arc::new(MemoryCache::default()),
        );

        let result = orch
            .scrape(
                "https://example.com",
                ScrapeMode::Smart,
                &ScrapeOptions::default(),
                Deadline::none(),
            )
            .await
            .unwrap();

        assert_eq!(result.engine(), Some(ENGINE_DYNAMIC));
        assert_eq!(static_fetcher.calls(), 1);
        assert_eq!(dynamic_fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn smart_treats_empty_html_as_needing_dynamic() {
        let static_fetcher = StubFetcher::ok(ENGINE_STATIC, "");
        let dynamic_fetcher = StubFetcher::ok(ENGINE_DYNAMIC, "<html>rendered</html>");
        let orch = Orchestrator::new(
            static_fetcher,
            Some(dynamic_fetcher.clone()),
            Arc::new(MemoryCache::default()),
        );

        let result = orch
            .scrape(
                "https://example.com",
                ScrapeMode::Smart,
                &ScrapeOptions::default(),
                Deadline::none(),
            )
            .await
            .unwrap();

        assert_eq!(result.engine(), Some(ENGINE_DYNAMIC));
        assert_eq!(dynamic_fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn smart_keeps_static_when_heuristic_fires_but_no_browser() {
        let static_fetcher = StubFetcher::ok(ENGINE_STATIC, SPA_SHELL);
        let orch = Orchestrator::new(
            static_fetcher.clone(),
            None,
            Arc::new(MemoryCache::default()),
        );

        let result = orch
            .scrape(
                "https://example.com",
                ScrapeMode::Smart,
                &ScrapeOptions::default(),
                Deadline::none(),
            )
            .await
            .unwrap();

        // Best effort: the static result is all there is to return.
        assert_eq!(result.engine(), Some(ENGINE_STATIC));
    }

    #[tokio::test]
    async fn smart_falls_back_when_static_errors() {
        let static_fetcher = StubFetcher::failing();
        let dynamic_fetcher = StubFetcher::ok(ENGINE_DYNAMIC, "<html>rendered</html>");
        let orch = Orchestrator::new(
            static_fetcher,
            Some(dynamic_fetcher.clone()),
            Arc::new(MemoryCache::default()),
        );

        let result = orch
            .scrape(
                "https://example.com",
                ScrapeMode::Smart,
                &ScrapeOptions::default(),
                Deadline::none(),
            )
            .await
            .unwrap();

        assert_eq!(result.engine(), Some(ENGINE_DYNAMIC));
    }

    #[tokio::test]
    async fn smart_propagates_static_error_without_browser() {
        let orch = Orchestrator::new(
            StubFetcher::failing(),
            None,
            Arc::new(MemoryCache::default()),
        );

        let err = orch
            .scrape(
                "https://example.com",
                ScrapeMode::Smart,
                &ScrapeOptions::default(),
                Deadline::none(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ScrapeError::ScrapeFailed(_)));
    }

    #[tokio::test]
    async fn cache_hit_is_marked_and_keeps_scraped_at() {
        let static_fetcher = StubFetcher::ok(ENGINE_STATIC, PLAIN_ARTICLE);
        let orch = Orchestrator::new(
            static_fetcher.clone(),
            None,
            Arc::new(MemoryCache::default()),
        );
        let opts = ScrapeOptions::default();

        let first = orch
            .scrape("https://example.com", ScrapeMode::Static, &opts, Deadline::none())
            .await
            .unwrap();
        assert!(first.metadata.get(types::META_CACHED).is_none());

        let second = orch
            .scrape("https://example.com", ScrapeMode::Static, &opts, Deadline::none())
            .await
            .unwrap();
        assert_eq!(second.metadata.get(types::META_CACHED).unwrap(), "true");
        assert_eq!(
            second.metadata.get(types::META_SCRAPED_AT),
            first.metadata.get(types::META_SCRAPED_AT)
        );
        // The fetcher ran exactly once; the second response came from cache.
        assert_eq!(static_fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn broken_cache_never_fails_the_request() {
        let static_fetcher = StubFetcher::ok(ENGINE_STATIC, PLAIN_ARTICLE);
        let orch = Orchestrator::new(static_fetcher.clone(), None, Arc::new(BrokenCache));

        for _ in 0..2 {
            let result = orch
                .scrape(
                    "https://example.com",
                    ScrapeMode::Static,
                    &ScrapeOptions::default(),
                    Deadline::none(),
                )
                .await
                .unwrap();
            assert_eq!(result.engine(), Some(ENGINE_STATIC));
        }
        // Every call recomputes because the cache is dead.
        assert_eq!(static_fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expiring_deadline_stops_dynamic_before_it_starts() {
        let static_fetcher = StubFetcher::ok(ENGINE_STATIC, SPA_SHELL);
        let dynamic_fetcher = StubFetcher::ok(ENGINE_DYNAMIC, "<html>rendered</html>");
        let orch = Orchestrator::new(
            static_fetcher,
            Some(dynamic_fetcher.clone()),
            Arc::new(MemoryCache::default()),
        );

        // Under the 2s floor by the time dynamic would begin.
        let err = orch
            .scrape(
                "https://example.com",
                ScrapeMode::Smart,
                &ScrapeOptions::default(),
                Deadline::within(Duration::from_millis(500)),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ScrapeError::Timeout(_)));
        assert_eq!(dynamic_fetcher.calls(), 0);
    }
}
