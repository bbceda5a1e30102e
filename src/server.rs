//! HTTP server (§4.10, §6 "External composer facade" + CLI surface).
//!
//! Exposes the Query Orchestrator over a JSON HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path     | Description                              |
//! |--------|----------|-------------------------------------------|
//! | `POST` | `/query` | Run a query through the full pipeline     |
//! | `GET`  | `/health`| Health check (returns version + corpus fingerprint) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based clinical
//! tooling can call the API directly.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::chunk_store::ChunkStore;
use crate::config::Config;
use crate::dense::Filters;
use crate::models::AnswerEnvelope;
use crate::orchestrator::{QueryOrchestrator, QueryRequest};
use crate::types::AuthorityTier;

/// Shared application state passed to all route handlers via Axum's `State`
/// extractor.
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<QueryOrchestrator>,
    store: Arc<ChunkStore>,
}

/// Starts the HTTP server.
///
/// Binds to `[server].host:port` and registers all route handlers. Runs
/// indefinitely until the process is terminated.
pub async fn run_server(
    config: &Config,
    orchestrator: Arc<QueryOrchestrator>,
    store: Arc<ChunkStore>,
) -> anyhow::Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let state = AppState { orchestrator, store };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(%bind_addr, "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: ErrorDetail { code: self.code, message: self.message } };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::BAD_REQUEST, code: "bad_request".to_string(), message: message.into() }
}

// ============ POST /query ============

/// JSON request body for `POST /query`, mirroring §6's query API surface.
#[derive(Deserialize)]
struct QueryRequestBody {
    query: String,
    #[serde(default)]
    top_k: Option<usize>,
    #[serde(default)]
    use_reranker: Option<bool>,
    #[serde(default)]
    filters: Option<FiltersBody>,
    #[serde(default)]
    model_hint: Option<String>,
}

#[derive(Deserialize, Default)]
struct FiltersBody {
    authority_tier: Option<String>,
    has_table: Option<bool>,
    has_contraindication: Option<bool>,
    has_dose_setting: Option<bool>,
}

impl From<FiltersBody> for Filters {
    fn from(body: FiltersBody) -> Self {
        Filters {
            authority_tier: body.authority_tier.map(|s| s.parse::<AuthorityTier>().unwrap()),
            has_table: body.has_table,
            has_contraindication: body.has_contraindication,
            has_dose_setting: body.has_dose_setting,
        }
    }
}

/// Handler for `POST /query`.
///
/// Validates the request and dispatches to [`QueryOrchestrator::process_query`].
/// Returns `400` for an empty query; the orchestrator itself never errors —
/// dependency failures degrade into the envelope's `warnings` instead.
async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequestBody>,
) -> Result<Json<AnswerEnvelope>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let request = QueryRequest {
        query: req.query,
        top_k: req.top_k,
        use_reranker: req.use_reranker,
        filters: req.filters.map(Filters::from).unwrap_or_default(),
        model_hint: req.model_hint,
    };

    let envelope = state.orchestrator.process_query(request).await;
    Ok(Json(envelope))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    index_fingerprint: String,
    chunk_count: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        index_fingerprint: state.store.index_fingerprint().to_string(),
        chunk_count: state.store.len(),
    })
}
