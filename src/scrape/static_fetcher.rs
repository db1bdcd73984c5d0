//! Static fetcher: one HTTP GET, no script execution.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use std::sync::Arc;
use tracing::debug;

use crate::error::ScrapeError;
use crate::markdown::MarkdownConverter;
use crate::utils::constants::{random_user_agent, MAX_STATIC_BODY_BYTES, STATIC_FETCH_TIMEOUT};
use crate::utils::{with_deadline, Deadline};

use super::types::{ScrapeOptions, ScrapeResult, ENGINE_STATIC};
use super::Fetcher;

/// Fetches a page with a single GET and converts the body to Markdown.
///
/// No retries: transient failures surface to the orchestrator, which may
/// fall back to the dynamic path in smart mode.
pub struct StaticFetcher {
    client: reqwest::Client,
    converter: Arc<MarkdownConverter>,
    max_body_bytes: usize,
}

impl StaticFetcher {
    pub fn new(client: reqwest::Client, converter: Arc<MarkdownConverter>) -> Self {
        Self {
            client,
            converter,
            max_body_bytes: MAX_STATIC_BODY_BYTES,
        }
    }

    /// Override the body-size cap.
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    async fn fetch(&self, url: &str) -> Result<ScrapeResult, ScrapeError> {
        let user_agent = random_user_agent();
        debug!(url, user_agent, "Static fetch");

        let response = self
            .client
            .get(url)
            .header(USER_AGENT, user_agent)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::ScrapeFailed(anyhow!(
                "GET {url} returned status {status}"
            )));
        }

        let mut body: Vec<u8> = Vec::new();
        let mut response = response;
        while let Some(chunk) = response.chunk().await.with_context(|| format!("read body of {url}"))? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(ScrapeError::ScrapeFailed(anyhow!(
                    "body of {url} exceeds {} bytes",
                    self.max_body_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        let html = String::from_utf8_lossy(&body).into_owned();
        let markdown = self.converter.convert(&html)?;

        let mut result = ScrapeResult::new(url, markdown, ENGINE_STATIC);
        result.html = Some(html);
        Ok(result)
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn scrape(
        &self,
        url: &str,
        _opts: &ScrapeOptions,
        deadline: Deadline,
    ) -> Result<ScrapeResult, ScrapeError> {
        with_deadline(deadline, STATIC_FETCH_TIMEOUT, "static fetch", self.fetch(url)).await
    }
}
