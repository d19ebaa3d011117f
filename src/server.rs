//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/documents` | Submit a document (`filename`, base64 `content`, optional `mime_type`) |
//! | `GET`  | `/documents/{id}` | Document status with its segments and statement results |
//! | `POST` | `/documents/{id}/process` | Run or resume the pipeline (`?mode=whole\|chunked`) |
//! | `POST` | `/query` | Answer a natural-language question from the graph |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "not found: document 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `validation_error` (422),
//! `internal` (500).

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use docgraph_core::models::{Document, GeneratedStatementResult, GenerationMode, NewDocument, Segment};

use crate::error::PipelineError;
use crate::extract::mime_for_path;
use crate::pipeline::{PipelineOrchestrator, ProcessOutcome};
use crate::query::{QueryAnswer, QueryEngine};
use crate::submit::{submit_document, Submission};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub query: Arc<QueryEngine>,
    /// Mode used when a process request does not name one.
    pub default_mode: GenerationMode,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/documents", post(handle_submit))
        .route("/documents/{id}", get(handle_get_document))
        .route("/documents/{id}/process", post(handle_process))
        .route("/query", post(handle_query))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on `bind` until the process is terminated.
pub async fn run_server(bind: &str, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, "HTTP server listening");
    println!("docgraph server listening on http://{}", bind);
    axum::serve(listener, router(state)).await?;
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
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err.root() {
            PipelineError::NotFound(_) => not_found(message),
            PipelineError::Validation { .. } => AppError {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                code: "validation_error",
                message,
            },
            _ => internal(message),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        internal(format!("{:#}", err))
    }
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

// ============ POST /documents ============

#[derive(Deserialize)]
struct SubmitRequest {
    filename: String,
    /// Base64-encoded file bytes.
    content: String,
    mime_type: Option<String>,
}

async fn handle_submit(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<Submission>), AppError> {
    if req.filename.trim().is_empty() {
        return Err(bad_request("filename must not be empty"));
    }
    let mime_type = match req.mime_type {
        Some(mime) => mime,
        None => mime_for_path(std::path::Path::new(&req.filename))
            .ok_or_else(|| bad_request(format!("cannot infer a file type for {}", req.filename)))?
            .to_string(),
    };
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(req.content.as_bytes())
        .map_err(|e| bad_request(format!("content is not valid base64: {}", e)))?;
    if bytes.is_empty() {
        return Err(bad_request("content must not be empty"));
    }

    let submission = submit_document(
        state.orchestrator.store().as_ref(),
        NewDocument {
            filename: req.filename,
            mime_type,
            bytes,
        },
    )
    .await?;
    let status = if submission.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(submission)))
}

// ============ GET /documents/{id} ============

#[derive(Serialize)]
struct DocumentResponse {
    document: Document,
    segments: Vec<Segment>,
    results: Vec<GeneratedStatementResult>,
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, AppError> {
    let store = state.orchestrator.store();
    let document = store
        .get_document(&id)
        .await?
        .ok_or_else(|| not_found(format!("document {} not found", id)))?;
    let segments = store.list_segments(&id).await?;
    let results = store.list_results(&id).await?;
    Ok(Json(DocumentResponse {
        document,
        segments,
        results,
    }))
}

// ============ POST /documents/{id}/process ============

#[derive(Deserialize)]
struct ProcessParams {
    mode: Option<String>,
}

async fn handle_process(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ProcessParams>,
) -> Result<Json<ProcessOutcome>, AppError> {
    let mode = match params.mode {
        Some(mode) => mode
            .parse::<GenerationMode>()
            .map_err(|e| bad_request(e.to_string()))?,
        None => state.default_mode,
    };
    let outcome = state.orchestrator.process_document(&id, mode).await?;
    Ok(Json(outcome))
}

// ============ POST /query ============

#[derive(Deserialize)]
struct QueryRequest {
    question: String,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryAnswer>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    Ok(Json(state.query.ask(&req.question).await?))
}
