//! HTTP surface for the search and health endpoints.
//!
//! This module exposes a compact Axum router with two endpoints:
//!
//! - `POST /api/search` – Embed a query and return the most similar stored
//!   chunks, optionally scoped to one document.
//! - `GET /health` – Trivial connectivity probe against the storage gateway.
//!
//! The search surface shares the storage gateway with the message consumer;
//! both paths draw from the same connection pool.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::search::{SearchApi, SearchError, SearchHit, SearchRequest};
use crate::storage::DocumentStore;

/// Results per search unless the caller overrides `top_k`.
const DEFAULT_TOP_K: u32 = 5;
/// Upper bound accepted for `top_k`.
const MAX_TOP_K: u32 = 20;

/// Shared state handed to every handler.
pub struct ApiState<S> {
    /// Search pipeline behind the `/api/search` endpoint.
    pub search: Arc<S>,
    /// Storage gateway probed by `/health`.
    pub store: Arc<dyn DocumentStore>,
}

/// Build the HTTP router exposing the search API surface.
pub fn create_router<S>(state: Arc<ApiState<S>>) -> Router
where
    S: SearchApi + 'static,
{
    Router::new()
        .route("/api/search", post(search_documents::<S>))
        .route("/health", get(health::<S>))
        .with_state(state)
}

/// Request body for the `POST /api/search` endpoint.
#[derive(Deserialize)]
struct SearchRequestBody {
    /// Natural-language query text.
    query: String,
    /// Optional document scope.
    #[serde(default)]
    document_id: Option<i64>,
    /// Number of results to return, in `[1, 20]`.
    #[serde(default = "default_top_k")]
    top_k: u32,
    /// Minimum similarity score, in `[0, 1]`.
    #[serde(default)]
    min_score: f64,
}

fn default_top_k() -> u32 {
    DEFAULT_TOP_K
}

/// Success response for the `POST /api/search` endpoint.
#[derive(Serialize)]
struct SearchResponseBody {
    /// Ranked results after filtering and truncation.
    results: Vec<SearchHit>,
    /// Query text as received.
    query: String,
    /// Number of returned results.
    total: usize,
}

/// Search stored chunks by vector similarity.
async fn search_documents<S>(
    State(state): State<Arc<ApiState<S>>>,
    Json(body): Json<SearchRequestBody>,
) -> Result<Json<SearchResponseBody>, AppError>
where
    S: SearchApi,
{
    if body.query.trim().is_empty() {
        return Err(AppError::BadRequest(
            "Search query cannot be empty".to_string(),
        ));
    }
    if body.top_k < 1 || body.top_k > MAX_TOP_K {
        return Err(AppError::BadRequest(format!(
            "top_k must be between 1 and {MAX_TOP_K}"
        )));
    }
    if !(0.0..=1.0).contains(&body.min_score) {
        return Err(AppError::BadRequest(
            "min_score must be between 0 and 1".to_string(),
        ));
    }

    let query = body.query.trim().to_string();
    let results = state
        .search
        .search(SearchRequest {
            query: query.clone(),
            document_id: body.document_id,
            top_k: body.top_k,
            min_score: body.min_score,
        })
        .await?;

    let total = results.len();
    Ok(Json(SearchResponseBody {
        results,
        query,
        total,
    }))
}

/// Health check with a database connectivity probe.
async fn health<S>(State(state): State<Arc<ApiState<S>>>) -> Response
where
    S: SearchApi,
{
    let timestamp = time::OffsetDateTime::now_utc().unix_timestamp();
    match state.store.ping().await {
        Ok(()) => Json(json!({
            "status": "healthy",
            "database": "connected",
            "timestamp": timestamp,
        }))
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "database": "disconnected",
                    "timestamp": timestamp,
                })),
            )
                .into_response()
        }
    }
}

enum AppError {
    BadRequest(String),
    Internal,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Search failed" })),
            )
                .into_response(),
        }
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::EmptyQuery => Self::BadRequest(err.to_string()),
            other => {
                // Internal detail is logged, not echoed to external callers.
                tracing::error!(error = %other, "Search request failed");
                Self::Internal
            }
        }
    }
}
