//! HTTP server for the query pipeline.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/query` | Submit a query, returns `results_id` and the response |
//! | `GET`  | `/results/{id}` | Grouped results of a session, best first |
//! | `GET`  | `/query/{id}` | Original query of a session |
//! | `GET`  | `/explain/{id}/{index}` | Explain why one result matched |
//! | `POST` | `/sync` | Run a catalogue sync (serialized with other runs) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "no_query_found", "message": "no query found for results id: ..." } }
//! ```
//!
//! Error codes: `invalid_parameter` (400), `generator_disabled` (400),
//! `no_query_found` (404), `index_out_of_range` (404), `fetch_failed` (502),
//! `auth_failed` (502), `retrieval_failed` (502), `generation_failed` (502),
//! `sync_unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser front-ends can
//! call the API directly.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use dataset_search_core::models::GroupedResult;
use dataset_search_core::pipeline::{QueryPipeline, Submitted};
use dataset_search_core::query::{QueryMode, QueryParams};
use dataset_search_core::Error;

use crate::config::Config;
use crate::progress::NoProgress;
use crate::services;
use crate::sync::{SyncEngine, SyncOptions, SyncOutcome};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<QueryPipeline>,
    sync: Option<Arc<SyncEngine>>,
}

impl AppState {
    pub fn new(pipeline: QueryPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            sync: None,
        }
    }

    pub fn with_sync(mut self, engine: Arc<SyncEngine>) -> Self {
        self.sync = Some(engine);
        self
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/query", post(handle_query))
        .route("/query/{id}", get(handle_original_query))
        .route("/results/{id}", get(handle_results))
        .route("/explain/{id}/{index}", get(handle_explain))
        .route("/sync", post(handle_sync))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pipeline = services::build_pipeline(config).await?;
    let engine = Arc::new(services::build_sync_engine(config)?);
    let app = build_router(AppState::new(pipeline).with_sync(engine));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("Dataset search listening on http://{}", listener.local_addr()?);
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
    /// Machine-readable error code (e.g., `"invalid_parameter"`).
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
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let status = match &err {
            Error::InvalidParameter(_) | Error::GeneratorDisabled => StatusCode::BAD_REQUEST,
            Error::NoQueryFound(_) | Error::IndexOutOfRange { .. } => StatusCode::NOT_FOUND,
            Error::Fetch { .. }
            | Error::Auth(_)
            | Error::Retrieval(_)
            | Error::Generation(_) => StatusCode::BAD_GATEWAY,
            Error::Io(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn invalid_parameter(message: impl Into<String>) -> AppError {
    Error::InvalidParameter(message.into()).into()
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /query ============

/// Request body for `POST /query`.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<i64>,
    #[serde(default, alias = "mode")]
    pub vector_store_query_mode: Option<String>,
    #[serde(default)]
    pub alpha: Option<f64>,
    #[serde(default)]
    pub summarize: bool,
}

impl QueryRequest {
    fn params(&self) -> Result<QueryParams, Error> {
        let top_k = match self.top_k {
            Some(k) if k < 1 => {
                return Err(Error::InvalidParameter(format!(
                    "top_k must be at least 1 (got {})",
                    k
                )))
            }
            Some(k) => Some(usize::try_from(k).unwrap_or(usize::MAX)),
            None => None,
        };
        let mode = self
            .vector_store_query_mode
            .as_deref()
            .map(str::parse::<QueryMode>)
            .transpose()?;
        Ok(QueryParams {
            top_k,
            mode,
            alpha: self.alpha,
        })
    }
}

async fn handle_query(
    State(state): State<AppState>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<Submitted>, AppError> {
    let Json(req) = payload.map_err(|e| invalid_parameter(e.body_text()))?;
    let params = req.params()?;
    let submitted = state
        .pipeline
        .submit(&req.query, &params, req.summarize)
        .await?;
    Ok(Json(submitted))
}

// ============ GET /results/{id} ============

#[derive(Serialize)]
struct ResultsResponse {
    results_id: String,
    results: Vec<GroupedResult>,
}

async fn handle_results(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ResultsResponse>, AppError> {
    let results = state.pipeline.results(&id).await?;
    Ok(Json(ResultsResponse {
        results_id: id,
        results,
    }))
}

// ============ GET /query/{id} ============

#[derive(Serialize)]
struct OriginalQueryResponse {
    results_id: String,
    query: String,
}

async fn handle_original_query(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OriginalQueryResponse>, AppError> {
    let query = state.pipeline.original_query(&id).await?;
    Ok(Json(OriginalQueryResponse {
        results_id: id,
        query,
    }))
}

// ============ GET /explain/{id}/{index} ============

#[derive(Serialize)]
struct ExplainResponse {
    results_id: String,
    index: usize,
    explanation: String,
}

async fn handle_explain(
    State(state): State<AppState>,
    Path((id, index)): Path<(String, String)>,
) -> Result<Json<ExplainResponse>, AppError> {
    let index: usize = index
        .parse()
        .map_err(|_| invalid_parameter(format!("result index must be a non-negative integer (got '{}')", index)))?;
    let explanation = state.pipeline.explain(&id, index).await?;
    Ok(Json(ExplainResponse {
        results_id: id,
        index,
        explanation,
    }))
}

// ============ POST /sync ============

#[derive(Debug, Default, Deserialize)]
struct SyncRequest {
    #[serde(default)]
    force: bool,
}

async fn handle_sync(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SyncOutcome>, AppError> {
    let engine = state.sync.clone().ok_or_else(|| AppError {
        status: StatusCode::SERVICE_UNAVAILABLE,
        code: "sync_unavailable".to_string(),
        message: "catalogue sync is not configured for this server".to_string(),
    })?;

    let req: SyncRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SyncRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| invalid_parameter(e.to_string()))?
    };

    let outcome = engine
        .run(SyncOptions { force: req.force }, &NoProgress)
        .await?;
    Ok(Json(outcome))
}
