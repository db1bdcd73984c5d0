//! HTTP surface: request validation, error translation, delegation.
//!
//! Handlers never implement scraping logic. They validate, translate error
//! kinds to status codes, and delegate to the orchestrator, broker, or
//! search client. Raw causes are logged and never leave the process.

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::jobs::JobBroker;
use crate::scrape::Orchestrator;
use crate::search::BraveSearch;

/// Shared handler state. Optional collaborators stay `None` when their
/// backing service is not configured; the matching endpoints answer 503.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub broker: Option<JobBroker>,
    pub search: Option<Arc<BraveSearch>>,
}

/// JSON error body used by every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}

/// Build the service router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check for container orchestration
        .route("/health", get(handlers::health))
        .route("/v1/scrape", post(handlers::scrape))
        .route("/v1/crawl", post(handlers::submit_crawl))
        .route("/v1/crawl/:id", get(handlers::crawl_status))
        .route("/v1/search", post(handlers::search))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
