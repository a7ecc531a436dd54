//! HTTP surface (JSON).
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/documents/upload` | multipart upload (`file` field) |
//! | `GET`  | `/api/documents/{id}` | document metadata |
//! | `GET`  | `/api/documents/` | recent documents, newest first |
//! | `DELETE` | `/api/documents/{id}` | delete with cascade |
//! | `POST` | `/api/query/` | assemble context for `{doc_id, query, top_k?}` |
//! | `GET`  | `/api/health` | liveness + dependency checks |
//!
//! # Error contract
//!
//! ```json
//! { "error": { "code": "unsupported_format", "message": "..." } }
//! ```
//!
//! 400 for unsupported/undecodable/oversized uploads, 404 for unknown
//! documents, 409 for not-ready documents, 422 for empty queries, 500
//! (opaque) for store and internal failures.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser clients.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::assembler::ChunkUsed;
use crate::budget::{self, TokenBudget};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::models::Document;
use crate::tier::TierInfo;

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

/// Serve the API until the process is terminated.
pub async fn run_server(engine: Arc<Engine>) -> anyhow::Result<()> {
    let bind_addr = engine.config().bind_addr.clone();
    // Multipart envelope overhead on top of the raw file ceiling.
    let body_limit = engine.config().max_file_size_bytes() as usize + 1024 * 1024;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/documents/upload", post(handle_upload))
        .route("/api/documents", get(handle_list))
        .route("/api/documents/", get(handle_list))
        .route("/api/documents/:id", get(handle_get).delete(handle_delete))
        .route("/api/query", post(handle_query))
        .route("/api/query/", post(handle_query))
        .route("/api/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(AppState { engine });

    tracing::info!("listening on http://{}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error mapping ============

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

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> AppError {
        let (status, code) = match &err {
            EngineError::UnsupportedFormat(_) => (StatusCode::BAD_REQUEST, "unsupported_format"),
            EngineError::Decode { .. } => (StatusCode::BAD_REQUEST, "decode_error"),
            EngineError::Oversize { .. } => (StatusCode::BAD_REQUEST, "oversize"),
            EngineError::DocumentNotFound(_) => (StatusCode::NOT_FOUND, "document_not_found"),
            EngineError::DocumentNotReady { .. } => (StatusCode::CONFLICT, "document_not_ready"),
            EngineError::EmptyQuery => (StatusCode::UNPROCESSABLE_ENTITY, "empty_query"),
            EngineError::Cancelled => (StatusCode::INTERNAL_SERVER_ERROR, "cancelled"),
            EngineError::Tokenizer(_)
            | EngineError::EmbedderUnavailable(_)
            | EngineError::DimensionMismatch { .. }
            | EngineError::Store(_)
            | EngineError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        // 5xx details stay in the logs; clients get an opaque message.
        let message = if status.is_server_error() {
            tracing::error!("request failed: {}", err);
            "internal error".to_string()
        } else {
            err.to_string()
        };

        AppError {
            status,
            code,
            message,
        }
    }
}

// ============ Response shapes ============

#[derive(Serialize)]
struct DocumentResponse {
    doc_id: Uuid,
    filename: String,
    file_size: i64,
    mime_type: String,
    token_count: i64,
    tier: TierInfo,
    budget: TokenBudget,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    row_count: Option<i64>,
    status: String,
    created_at: DateTime<Utc>,
}

fn document_response(doc: &Document, engine: &Engine) -> DocumentResponse {
    DocumentResponse {
        doc_id: doc.id,
        filename: doc.filename.clone(),
        file_size: doc.file_size,
        mime_type: doc.mime_type.clone(),
        token_count: doc.token_count,
        tier: TierInfo::from(doc.tier),
        budget: budget::allocate(&engine.config().budget, doc.token_count as usize),
        page_count: doc.page_count,
        row_count: doc.row_count,
        status: doc.status.as_str().to_string(),
        created_at: doc.created_at,
    }
}

// ============ POST /api/documents/upload ============

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<DocumentResponse>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "upload".to_string());
        let mime_hint = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("could not read upload: {}", e)))?;

        let doc = state
            .engine
            .upload(bytes.to_vec(), &filename, mime_hint.as_deref())
            .await?;
        return Ok(Json(document_response(&doc, &state.engine)));
    }
    Err(bad_request("multipart field 'file' is required"))
}

// ============ GET /api/documents/{id} ============

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentResponse>, AppError> {
    let id = parse_doc_id(&id)?;
    let doc = state.engine.get_document(id).await?;
    Ok(Json(document_response(&doc, &state.engine)))
}

// ============ GET /api/documents/ ============

const LIST_LIMIT: i64 = 100;

async fn handle_list(
    State(state): State<AppState>,
) -> Result<Json<Vec<DocumentResponse>>, AppError> {
    let docs = state.engine.list_documents(LIST_LIMIT).await?;
    Ok(Json(
        docs.iter()
            .map(|d| document_response(d, &state.engine))
            .collect(),
    ))
}

// ============ DELETE /api/documents/{id} ============

#[derive(Serialize)]
struct DeleteResponse {
    doc_id: Uuid,
    deleted: bool,
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let id = parse_doc_id(&id)?;
    state.engine.delete_document(id).await?;
    Ok(Json(DeleteResponse {
        doc_id: id,
        deleted: true,
    }))
}

// ============ POST /api/query/ ============

#[derive(Deserialize)]
struct QueryRequest {
    doc_id: Uuid,
    query: String,
    top_k: Option<usize>,
}

#[derive(Serialize)]
struct QueryResponse {
    doc_id: Uuid,
    query: String,
    tier: u8,
    assembled_context: String,
    token_count: usize,
    chunks_used: Vec<ChunkUsed>,
    strategy_notes: String,
    budget: TokenBudget,
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    let cancel = CancellationToken::new();
    let outcome = state
        .engine
        .query(req.doc_id, &req.query, req.top_k, &cancel)
        .await?;

    let context = outcome.context;
    Ok(Json(QueryResponse {
        doc_id: outcome.document.id,
        query: req.query,
        tier: outcome.document.tier.as_u8(),
        assembled_context: context.text,
        token_count: context.token_count,
        chunks_used: context.chunks_used,
        strategy_notes: context.strategy_notes,
        budget: context.budget,
    }))
}

// ============ GET /api/health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    checks: HealthChecks,
}

#[derive(Serialize)]
struct HealthChecks {
    store: bool,
    cache: bool,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let store = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(state.engine.pool())
        .await
        .is_ok();
    let cache = state.engine.cache().ping().await;

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        checks: HealthChecks { store, cache },
    })
}

fn parse_doc_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| bad_request(format!("invalid document id: {}", raw)))
}
