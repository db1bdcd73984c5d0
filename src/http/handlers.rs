//! Endpoint handlers.

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::ScrapeError;
use crate::jobs::{CrawlJobPayload, EnqueueOptions};
use crate::scrape::ScrapeRequest;
use crate::search::{clamp_pagination, SearchRequest};
use crate::utils::Deadline;

use super::{AppState, ErrorBody};

/// Overall budget for one synchronous scrape request: room for the static
/// attempt plus a full dynamic fallback.
const REQUEST_DEADLINE: Duration = Duration::from_secs(90);

const MSG_INVALID_JSON: &str = "Invalid JSON body";
const MSG_INVALID_URL: &str = "Invalid URL";
const MSG_SCRAPE_FAILED: &str = "Scraping failed";
const MSG_CRAWL_UNAVAILABLE: &str = "Asynchronous crawling is not available";
const MSG_DYNAMIC_UNAVAILABLE: &str = "Dynamic scraping is not available";
const MSG_SEARCH_UNAVAILABLE: &str = "Search is not available";
const MSG_JOB_NOT_FOUND: &str = "Job not found";

/// Body of `POST /v1/crawl`.
#[derive(Debug, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    #[serde(default)]
    pub render: bool,
}

/// Body of the 202 crawl acknowledgement.
#[derive(Debug, Serialize)]
pub struct CrawlAccepted {
    pub id: String,
    pub url: String,
    pub render: bool,
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `POST /v1/scrape` - synchronous scrape.
pub async fn scrape(
    State(state): State<AppState>,
    body: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = body else {
        return bad_request(MSG_INVALID_JSON);
    };

    if validate_url(&request.url).is_err() {
        return bad_request(MSG_INVALID_URL);
    }

    let mode = request.resolved_mode();
    let opts = request.options();

    match state
        .orchestrator
        .scrape(&request.url, mode, &opts, Deadline::within(REQUEST_DEADLINE))
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => scrape_error(&request.url, e),
    }
}

/// `POST /v1/crawl` - enqueue an asynchronous scrape job.
pub async fn submit_crawl(
    State(state): State<AppState>,
    body: Result<Json<CrawlRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = body else {
        return bad_request(MSG_INVALID_JSON);
    };

    if validate_url(&request.url).is_err() {
        return bad_request(MSG_INVALID_URL);
    }

    let Some(broker) = state.broker.as_ref() else {
        return service_unavailable(MSG_CRAWL_UNAVAILABLE);
    };

    let payload = CrawlJobPayload::new(&request.url, request.render);
    match broker.enqueue(&payload, EnqueueOptions::default()).await {
        Ok(id) => {
            info!(%id, url = %request.url, render = request.render, "Crawl accepted");
            (
                StatusCode::ACCEPTED,
                Json(CrawlAccepted {
                    id,
                    url: request.url,
                    render: request.render,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!(url = %request.url, "Enqueue failed: {e}");
            internal_error("Failed to enqueue job")
        }
    }
}

/// `GET /v1/crawl/:id` - job status and, once completed, its result.
pub async fn crawl_status(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(broker) = state.broker.as_ref() else {
        return service_unavailable(MSG_CRAWL_UNAVAILABLE);
    };

    match broker.inspect(&id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(ErrorBody::new(MSG_JOB_NOT_FOUND))).into_response(),
        Err(e) => {
            error!(%id, "Job inspect failed: {e}");
            internal_error(MSG_SCRAPE_FAILED)
        }
    }
}

/// `POST /v1/search` - proxy to the external search API.
pub async fn search(
    State(state): State<AppState>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(request)) = body else {
        return bad_request(MSG_INVALID_JSON);
    };

    let Some(client) = state.search.as_ref() else {
        return service_unavailable(MSG_SEARCH_UNAVAILABLE);
    };

    let (offset, limit) = clamp_pagination(request.offset, request.limit);
    match client.search(&request.query, offset, limit).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            error!(query = %request.query, "Search failed: {e}");
            internal_error("Search failed")
        }
    }
}

/// Absolute http/https URLs only.
fn validate_url(raw: &str) -> Result<(), ()> {
    let parsed = url::Url::parse(raw).map_err(|_| ())?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(());
    }
    if parsed.host_str().is_none() {
        return Err(());
    }
    Ok(())
}

/// Translate a scrape failure. Causes go to the log, clients get the
/// classification only.
fn scrape_error(url: &str, err: ScrapeError) -> Response {
    match &err {
        ScrapeError::BadRequest(msg) => bad_request(msg),
        ScrapeError::Config(_) => {
            warn!(url, "Scrape rejected: {err}");
            service_unavailable(MSG_DYNAMIC_UNAVAILABLE)
        }
        ScrapeError::NotFound => {
            (StatusCode::NOT_FOUND, Json(ErrorBody::new(MSG_JOB_NOT_FOUND))).into_response()
        }
        _ => {
            error!(url, "Scrape failed: {err}");
            internal_error(MSG_SCRAPE_FAILED)
        }
    }
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorBody::new(message))).into_response()
}

fn service_unavailable(message: &str) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorBody::new(message)),
    )
        .into_response()
}

fn internal_error(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody::new(message)),
    )
        .into_response()
}
