//! Shared headless browser with tab-per-request semantics.
//!
//! One browser process lives for the life of the service; each scrape that
//! needs rendering opens an isolated tab through [`BrowserPool::open_tab`]
//! and gets a [`TabGuard`] whose drop closes the tab on every exit path,
//! including cancellation and unwinds. A semaphore caps concurrent live
//! tabs; at capacity, acquisition blocks until a slot frees or the request
//! deadline expires.

mod launch;

pub use launch::{find_browser_executable, launch_browser};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::Browser;
use chromiumoxide::page::Page;
use tempfile::TempDir;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ScrapeError;
use crate::utils::constants::MAX_CONCURRENT_TABS;
use crate::utils::Deadline;

/// How long `open_tab` waits for a free slot when no request deadline caps
/// it sooner.
const TAB_ACQUIRE_CEILING: Duration = Duration::from_secs(30);

/// Poll interval while draining in-flight tabs at shutdown.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the shared browser.
#[derive(Debug, Clone)]
pub struct BrowserPoolConfig {
    /// Maximum concurrent live tabs.
    pub max_tabs: usize,
    /// Run the browser headless.
    pub headless: bool,
}

impl Default for BrowserPoolConfig {
    fn default() -> Self {
        Self {
            max_tabs: MAX_CONCURRENT_TABS,
            headless: true,
        }
    }
}

/// Process-wide owner of the single browser instance.
pub struct BrowserPool {
    config: BrowserPoolConfig,
    /// Taken at shutdown; `None` afterwards so late callers fail cleanly.
    browser: Mutex<Option<Browser>>,
    /// CDP event-loop task, aborted after the browser closes.
    handler: Mutex<Option<JoinHandle<()>>>,
    permits: Arc<Semaphore>,
    accepting: AtomicBool,
    /// Profile directory; removed from disk when the pool drops.
    _profile_dir: TempDir,
}

impl BrowserPool {
    /// Launch the browser and start the warm-up navigation.
    pub async fn start(config: BrowserPoolConfig) -> Result<Arc<Self>, ScrapeError> {
        let profile_dir = TempDir::with_prefix("smelter_chrome_")
            .map_err(|e| ScrapeError::BrowserUnavailable(format!("profile dir: {e}")))?;

        let (browser, handler) = launch_browser(config.headless, profile_dir.path().to_path_buf())
            .await
            .map_err(|e| ScrapeError::BrowserUnavailable(format!("{e:#}")))?;

        let pool = Arc::new(Self {
            permits: Arc::new(Semaphore::new(config.max_tabs)),
            config,
            browser: Mutex::new(Some(browser)),
            handler: Mutex::new(Some(handler)),
            accepting: AtomicBool::new(true),
            _profile_dir: profile_dir,
        });

        // Warm-up: the first tab pays renderer startup; do it in the
        // background so the first user request does not.
        let warmup = Arc::clone(&pool);
        tokio::spawn(async move {
            match warmup.open_tab(Deadline::within(Duration::from_secs(20))).await {
                Ok(tab) => {
                    debug!("Browser warm-up tab opened");
                    drop(tab);
                }
                Err(e) => warn!("Browser warm-up failed: {e}"),
            }
        });

        info!(max_tabs = pool.config.max_tabs, "Browser pool started");
        Ok(pool)
    }

    /// Open a fresh isolated tab.
    ///
    /// Blocks on the tab semaphore when at capacity. The returned guard
    /// closes the tab when dropped; callers never close tabs directly.
    pub async fn open_tab(&self, deadline: Deadline) -> Result<TabGuard, ScrapeError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(ScrapeError::BrowserUnavailable(
                "browser is shutting down".into(),
            ));
        }

        let budget = deadline.bounded(TAB_ACQUIRE_CEILING);
        let permit = match tokio::time::timeout(
            budget,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => {
                return Err(ScrapeError::BrowserUnavailable(
                    "browser is shutting down".into(),
                ))
            }
            Err(_elapsed) => return Err(ScrapeError::Timeout("tab acquisition".into())),
        };

        let browser = self.browser.lock().await;
        let Some(browser) = browser.as_ref() else {
            return Err(ScrapeError::BrowserUnavailable("browser not running".into()));
        };

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScrapeError::BrowserUnavailable(format!("new tab: {e}")))?;

        debug!(active = self.active_tabs(), "Opened tab");
        Ok(TabGuard {
            page: Some(page),
            _permit: permit,
        })
    }

    /// Number of currently live tabs.
    pub fn active_tabs(&self) -> usize {
        self.config.max_tabs - self.permits.available_permits()
    }

    /// Gracefully shut down: stop handing out tabs, wait for in-flight tabs
    /// up to `drain_deadline`, then close the browser process.
    pub async fn shutdown(&self, drain_deadline: Duration) -> Result<(), ScrapeError> {
        info!("Shutting down browser pool");
        self.accepting.store(false, Ordering::Release);
        self.permits.close();

        let drain_until = tokio::time::Instant::now() + drain_deadline;
        while self.active_tabs() > 0 && tokio::time::Instant::now() < drain_until {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        if self.active_tabs() > 0 {
            warn!(
                active = self.active_tabs(),
                "Drain deadline reached with tabs still open; closing browser anyway"
            );
        }

        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                warn!("Failed to close browser: {e}");
            }
            let _ = browser.wait().await;
        }

        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }

        info!("Browser pool shutdown complete");
        Ok(())
    }
}

/// Scoped tab acquisition. Holds the tab's semaphore permit; dropping the
/// guard closes the tab on a spawned task and frees the slot.
#[derive(Debug)]
pub struct TabGuard {
    page: Option<Page>,
    _permit: OwnedSemaphorePermit,
}

impl TabGuard {
    /// The tab's page handle.
    pub fn page(&self) -> &Page {
        // Invariant: `page` is only None inside drop.
        self.page.as_ref().expect("tab already released")
    }
}

impl Drop for TabGuard {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            // The permit is released when the guard finishes dropping; the
            // close itself must not block the caller's (possibly cancelled)
            // task, so it runs detached.
            tokio::spawn(async move {
                if let Err(e) = page.close().await {
                    debug!("Tab close failed (browser may be gone): {e}");
                }
            });
        }
    }
}
