//! Error taxonomy shared across the scrape, job, and HTTP layers.
//!
//! Fetchers and the broker return these variants up to the orchestrator;
//! the HTTP layer owns the mapping to status codes and never forwards the
//! underlying cause to clients.

use thiserror::Error;

/// Classified failure of a scrape or job operation.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Malformed input: invalid URL, unknown mode, bad body.
    #[error("invalid request: {0}")]
    BadRequest(String),

    /// A required collaborator is not configured (browser, broker, search key).
    #[error("configuration error: {0}")]
    Config(String),

    /// Network, non-2xx status, parse, or conversion failure.
    #[error("scrape failed: {0:#}")]
    ScrapeFailed(#[from] anyhow::Error),

    /// Deadline exceeded at a suspension point.
    #[error("{0} timed out")]
    Timeout(String),

    /// The shared browser cannot hand out a tab.
    #[error("browser unavailable: {0}")]
    BrowserUnavailable(String),

    /// Cache round-trip failure. Logged and swallowed by the orchestrator,
    /// never surfaced to callers.
    #[error("cache error: {0}")]
    Cache(String),

    /// Unknown job id.
    #[error("job not found")]
    NotFound,
}

impl ScrapeError {
    /// True when retrying the operation could plausibly succeed.
    /// The worker uses this to decide between re-scheduling and failing a job.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ScrapeFailed(_) | Self::Timeout(_) | Self::BrowserUnavailable(_)
        )
    }
}
