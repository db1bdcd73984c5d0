// smelter: HTTP service turning web pages into LLM-ready Markdown.
//
// One process hosts the API, the shared headless browser, and (unless
// disabled) the embedded job worker, so browser startup and cache warmth
// are amortized across everything.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use smelter::browser::{BrowserPool, BrowserPoolConfig};
use smelter::cache::{NoopCache, RedisCache, ResultCache};
use smelter::config::{ServerMode, Settings};
use smelter::http::{create_router, AppState};
use smelter::jobs::{JobBroker, Worker};
use smelter::markdown::MarkdownConverter;
use smelter::scrape::{DynamicFetcher, Orchestrator, StaticFetcher};
use smelter::search::BraveSearch;
use smelter::utils::constants::SHUTDOWN_DEADLINE;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::from_env().context("configuration")?;
    init_tracing(&settings);
    info!(
        port = settings.port,
        mode = %settings.server_mode,
        "Starting smelter"
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .gzip(true)
        .build()
        .context("HTTP client")?;
    let converter = Arc::new(MarkdownConverter::new());

    // The browser is best-effort: without one, static and smart scrapes
    // still work and dynamic requests answer 503.
    let pool_config = BrowserPoolConfig::default();
    let tab_limit = pool_config.max_tabs;
    let browser_pool = match BrowserPool::start(pool_config).await {
        Ok(pool) => Some(pool),
        Err(e) => {
            warn!("Browser unavailable, dynamic scraping disabled: {e}");
            None
        }
    };

    // Redis is likewise optional; its absence disables the cache and the
    // async crawl endpoints but nothing else.
    let (cache, broker): (Arc<dyn ResultCache>, Option<JobBroker>) = match &settings.redis_url {
        Some(url) => match (RedisCache::connect(url).await, JobBroker::connect(url).await) {
            (Ok(cache), Ok(broker)) => (Arc::new(cache), Some(broker)),
            (cache_result, broker_result) => {
                if let Err(e) = &cache_result {
                    warn!("Redis cache unavailable: {e}");
                }
                if let Err(e) = &broker_result {
                    warn!("Job broker unavailable: {e}");
                }
                (Arc::new(NoopCache), None)
            }
        },
        None => {
            info!("REDIS_URL not set; cache and async crawling disabled");
            (Arc::new(NoopCache), None)
        }
    };

    let static_fetcher = Arc::new(StaticFetcher::new(client.clone(), Arc::clone(&converter)));
    let dynamic_fetcher = browser_pool.as_ref().map(|pool| {
        Arc::new(DynamicFetcher::new(
            Arc::clone(pool),
            Arc::clone(&converter),
            client.clone(),
        )) as Arc<dyn smelter::scrape::Fetcher>
    });
    let orchestrator = Arc::new(Orchestrator::new(static_fetcher, dynamic_fetcher, cache));

    // One concurrency limit in the system: the pool's tab semaphore. The
    // worker claims at most that many jobs at once.
    let worker = match (&broker, settings.disable_worker) {
        (Some(broker), false) => Some(Worker::spawn(
            broker.clone(),
            Arc::clone(&orchestrator),
            tab_limit,
        )),
        (Some(_), true) => {
            info!("Embedded worker disabled; jobs will be processed externally");
            None
        }
        (None, _) => None,
    };

    let search = settings
        .brave_search_api_key
        .clone()
        .map(|key| Arc::new(BraveSearch::new(client.clone(), key)));
    if search.is_none() {
        info!("BRAVE_SEARCH_API_KEY not set; search disabled");
    }

    let state = AppState {
        orchestrator,
        broker,
        search,
    };
    let router = create_router(state);

    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    info!("Shutting down");
    if let Some(worker) = worker {
        worker.shutdown(SHUTDOWN_DEADLINE).await;
    }
    if let Some(pool) = browser_pool {
        if let Err(e) = pool.shutdown(SHUTDOWN_DEADLINE).await {
            warn!("Browser shutdown error: {e}");
        }
    }
    info!("Bye");
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::new(settings.log_level.clone());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.server_mode == ServerMode::Release {
        builder.compact().init();
    } else {
        builder.init();
    }
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler means no orderly shutdown; park forever and
            // let the supervisor kill us.
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
