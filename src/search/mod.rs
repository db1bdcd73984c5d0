//! Web search via the Brave Search API.
//!
//! A thin proxy: the handler validates and clamps pagination, this client
//! performs the upstream call and reshapes the response. No scraping logic
//! lives here.

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScrapeError;

const BRAVE_SEARCH_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

/// Pagination bounds. `limit` is clamped into `[1, MAX_LIMIT]`, `offset`
/// to non-negative.
pub const MAX_LIMIT: i64 = 100;
pub const DEFAULT_LIMIT: i64 = 10;

/// Body of `POST /v1/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub offset: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// One search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub title: String,
    pub url: String,
    pub description: String,
}

/// Response of `POST /v1/search`.
///
/// `nextOffset` is always `offset + limit` regardless of how many results
/// the current page returned, so clients can page blindly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub count: usize,
    pub results: Vec<SearchResultItem>,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
    #[serde(rename = "nextOffset")]
    pub next_offset: i64,
}

/// Clamp client-supplied pagination into the supported window.
pub fn clamp_pagination(offset: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    let offset = offset.unwrap_or(0).max(0);
    let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    (offset, limit)
}

// Upstream response shape, reduced to the fields the proxy forwards.

#[derive(Debug, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveItem>,
}

#[derive(Debug, Deserialize)]
struct BraveItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

/// Brave Search API client.
pub struct BraveSearch {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl BraveSearch {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self {
            client,
            api_key,
            endpoint: BRAVE_SEARCH_ENDPOINT.to_string(),
        }
    }

    /// Point the client at a different endpoint. Tests use this to run
    /// against a local mock server.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Execute a search. `offset` and `limit` must already be clamped.
    pub async fn search(
        &self,
        query: &str,
        offset: i64,
        limit: i64,
    ) -> Result<SearchResponse, ScrapeError> {
        debug!(query, offset, limit, "Web search");

        let response = self
            .client
            .get(&self.endpoint)
            .header("X-Subscription-Token", &self.api_key)
            .header("Accept", "application/json")
            .query(&[
                ("q", query.to_string()),
                ("offset", offset.to_string()),
                ("count", limit.to_string()),
            ])
            .send()
            .await
            .context("search request")?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::ScrapeFailed(anyhow!(
                "search upstream returned status {status}"
            )));
        }

        let upstream: BraveResponse = response
            .json()
            .await
            .context("decode search response")?;

        let results: Vec<SearchResultItem> = upstream
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .take(limit as usize)
            .map(|item| SearchResultItem {
                title: item.title,
                url: item.url,
                description: item.description,
            })
            .collect();

        Ok(SearchResponse {
            query: query.to_string(),
            count: results.len(),
            has_more: results.len() as i64 >= limit,
            next_offset: offset + limit,
            results,
        })
    }
}
