//! Shared configuration constants.
//!
//! Default values used throughout the codebase to ensure consistency and
//! avoid magic numbers. Anything a deployment is expected to tune lives in
//! [`crate::config::Settings`] instead.

use std::time::Duration;

/// Default timeout for a static HTTP fetch.
pub const STATIC_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Hard ceiling on a dynamic (browser) fetch. The effective timeout is
/// `min(DYNAMIC_FETCH_CEILING, remaining deadline)`.
pub const DYNAMIC_FETCH_CEILING: Duration = Duration::from_secs(60);

/// Minimum remaining deadline required before browser work is started.
/// Below this, starting a tab would only waste a slot on a doomed request.
pub const DYNAMIC_SAFETY_FLOOR: Duration = Duration::from_secs(2);

/// Maximum concurrent live tabs in the shared browser.
pub const MAX_CONCURRENT_TABS: usize = 10;

/// Maximum bytes accepted from a static fetch before the body is rejected.
pub const MAX_STATIC_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Default TTL for cached scrape results: 7 days.
pub const CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// How long a completed or failed job record remains retrievable.
/// Must stay at or above 24h so status polling keeps working.
pub const JOB_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default retry budget per job.
pub const JOB_MAX_RETRY: u32 = 3;

/// Per-job execution deadline enforced by the worker.
pub const JOB_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Base delay for exponential job retry backoff: `2^retried * base`.
pub const JOB_RETRY_BASE_DELAY: Duration = Duration::from_secs(30);

/// Upper bound the server waits for in-flight work during shutdown.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// Desktop User-Agent pool for static fetches, rotated per request.
///
/// Chrome releases a new stable roughly every 4 weeks; refresh these on the
/// same cadence as the browser launch UA below.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.83 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:134.0) Gecko/20100101 Firefox/134.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
];

/// User agent presented by the headless browser itself.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

/// Pick a User-Agent from the rotation pool.
pub fn random_user_agent() -> &'static str {
    use rand::Rng;
    let idx = rand::rng().random_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_pool_is_nonempty_and_desktop() {
        assert!(!USER_AGENTS.is_empty());
        for ua in USER_AGENTS {
            assert!(ua.starts_with("Mozilla/5.0"));
        }
    }

    #[test]
    fn random_user_agent_comes_from_pool() {
        for _ in 0..32 {
            assert!(USER_AGENTS.contains(&random_user_agent()));
        }
    }

    #[test]
    fn retention_permits_day_long_status_polls() {
        assert!(JOB_RETENTION >= Duration::from_secs(24 * 60 * 60));
    }
}
