//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `POST`   | `/documents/upload` | Multipart PDF upload; runs the ingestion pipeline |
//! | `GET`    | `/documents/upload-status/{uploadId}` | Poll ingestion progress |
//! | `GET`    | `/documents` | List stored documents |
//! | `GET`    | `/documents/{id}` | Fetch one document |
//! | `DELETE` | `/documents/{id}` | Delete a document and its chunks |
//! | `GET`    | `/documents/{id}/usage` | Retrieval usage log for a document |
//! | `POST`   | `/chat` | Chat turn, optionally retrieval-augmented |
//! | `GET`    | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! Failures return `{ "error": "<message>" }`; upload failures additionally
//! carry the job id: `{ "error": "...", "uploadId": "..." }`. Messages are
//! sanitized; raw provider/storage errors only appear in the server log.
//! Polling an unknown upload id is not an error: it returns the benign
//! "Unknown upload" state with progress 0.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser
//! clients.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::embedding::ProviderKind;
use crate::error::PipelineError;
use crate::generate::{self, ChatMessage};
use crate::ingest;
use crate::jobs::JobTracker;
use crate::models::{RetrievedChunk, UsageLogEntry};
use crate::retrieve;

/// Uploads larger than this are rejected by the body-limit layer.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub jobs: Arc<JobTracker>,
}

impl AppState {
    pub fn new(config: Config, pool: SqlitePool) -> Self {
        let ttl = Duration::from_secs(config.jobs.ttl_secs);
        Self {
            config: Arc::new(config),
            pool,
            jobs: Arc::new(JobTracker::new(ttl)),
        }
    }
}

/// Build the application router. Separated from [`run_server`] so tests can
/// drive it in-process.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/documents/upload", post(handle_upload))
        .route("/documents/upload-status/{upload_id}", get(handle_upload_status))
        .route("/documents", get(handle_list_documents))
        .route(
            "/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/documents/{id}/usage", get(handle_usage))
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server and run until the process is terminated.
pub async fn run_server(config: Config, pool: SqlitePool) -> anyhow::Result<()> {
    let bind = config.server.bind.clone();
    let app = router(AppState::new(config, pool));

    info!("listening on http://{}", bind);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response: `{ error, uploadId? }`.
struct ApiError {
    status: StatusCode,
    message: String,
    upload_id: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            upload_id: None,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Map a pipeline error, logging the raw cause and exposing only the
    /// sanitized message.
    fn from_pipeline(err: PipelineError, upload_id: Option<String>) -> Self {
        error!("request failed: {}", err);
        Self {
            status: err.status_code(),
            message: err.user_message(),
            upload_id,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(rename = "uploadId", skip_serializing_if = "Option::is_none")]
    upload_id: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            upload_id: self.upload_id,
        };
        (self.status, Json(body)).into_response()
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

// ============ POST /documents/upload ============

#[derive(Serialize)]
struct UploadResponse {
    id: i64,
    title: String,
    originalname: String,
    #[serde(rename = "uploadId")]
    upload_id: String,
}

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let upload_id = state.jobs.create();

    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut provider_field: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| upload_error(&state, &upload_id, format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                original_name = field.file_name().map(|n| n.to_string());
                let bytes = field.bytes().await.map_err(|e| {
                    upload_error(&state, &upload_id, format!("failed to read file field: {}", e))
                })?;
                file_bytes = Some(bytes.to_vec());
            }
            Some("embeddingProvider") => {
                let value = field.text().await.map_err(|e| {
                    upload_error(&state, &upload_id, format!("failed to read provider field: {}", e))
                })?;
                provider_field = Some(value);
            }
            _ => {}
        }
    }

    let bytes = match file_bytes {
        Some(b) if !b.is_empty() => b,
        _ => return Err(upload_error(&state, &upload_id, "No file uploaded")),
    };
    let original_name = original_name.unwrap_or_else(|| "document.pdf".to_string());
    if !original_name.to_ascii_lowercase().ends_with(".pdf") {
        return Err(upload_error(&state, &upload_id, "Only PDF files are supported"));
    }

    let provider_name = provider_field
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| state.config.embedding.default_provider.clone());
    let kind = match ProviderKind::parse(&provider_name) {
        Some(kind) => kind,
        None => {
            return Err(upload_error(
                &state,
                &upload_id,
                format!("Unsupported embedding provider: {}", provider_name),
            ))
        }
    };

    // Spool the upload to disk; the pipeline deletes it on every exit path.
    let upload_dir = &state.config.server.upload_dir;
    let temp_path = upload_dir.join(format!("{}.pdf", upload_id));
    let spool = async {
        tokio::fs::create_dir_all(upload_dir).await?;
        tokio::fs::write(&temp_path, &bytes).await
    };
    if let Err(e) = spool.await {
        let err = PipelineError::Io(e);
        state.jobs.fail(&upload_id, err.user_message());
        return Err(ApiError::from_pipeline(err, Some(upload_id)));
    }

    let outcome = ingest::ingest_uploaded_file(
        &state.pool,
        &state.config,
        kind,
        &temp_path,
        &original_name,
        &upload_id,
        &state.jobs,
    )
    .await
    .map_err(|e| ApiError::from_pipeline(e, Some(upload_id.clone())))?;

    Ok(Json(UploadResponse {
        id: outcome.id,
        title: outcome.title,
        originalname: outcome.original_name,
        upload_id,
    }))
}

/// Validation failure during upload: the job is marked failed (no other
/// side effects have happened yet) and the body carries the upload id.
fn upload_error(state: &AppState, upload_id: &str, message: impl Into<String>) -> ApiError {
    let message = message.into();
    state.jobs.fail(upload_id, message.clone());
    ApiError {
        status: StatusCode::BAD_REQUEST,
        message,
        upload_id: Some(upload_id.to_string()),
    }
}

// ============ GET /documents/upload-status/{uploadId} ============

async fn handle_upload_status(
    State(state): State<AppState>,
    Path(upload_id): Path<String>,
) -> Json<crate::jobs::JobState> {
    Json(state.jobs.get(&upload_id))
}

// ============ GET /documents ============

#[derive(Serialize)]
struct DocumentSummary {
    id: i64,
    title: String,
    originalname: String,
    #[serde(rename = "chunkCount")]
    chunk_count: i64,
    #[serde(rename = "createdAt")]
    created_at: i64,
}

async fn handle_list_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<DocumentSummary>>, ApiError> {
    let rows = sqlx::query(
        r#"
        SELECT d.id, d.title, d.original_name, d.created_at,
               (SELECT COUNT(*) FROM chunks c WHERE c.document_id = d.id) AS chunk_count
        FROM documents d
        ORDER BY d.created_at DESC, d.id DESC
        "#,
    )
    .fetch_all(&state.pool)
    .await
    .map_err(|e| ApiError::from_pipeline(e.into(), None))?;

    let documents = rows
        .iter()
        .map(|row| DocumentSummary {
            id: row.get("id"),
            title: row.get("title"),
            originalname: row.get("original_name"),
            chunk_count: row.get("chunk_count"),
            created_at: row.get("created_at"),
        })
        .collect();

    Ok(Json(documents))
}

// ============ GET /documents/{id} ============

#[derive(Serialize)]
struct DocumentResponse {
    id: i64,
    title: String,
    originalname: String,
    body: String,
    provider: String,
    #[serde(rename = "createdAt")]
    created_at: i64,
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let document = ingest::get_document(&state.pool, id)
        .await
        .map_err(|e| ApiError::from_pipeline(e, None))?
        .ok_or_else(|| ApiError::not_found(format!("document {} not found", id)))?;

    Ok(Json(DocumentResponse {
        id: document.id,
        title: document.title,
        originalname: document.original_name,
        body: document.body,
        provider: document.provider,
        created_at: document.created_at,
    }))
}

// ============ DELETE /documents/{id} ============

#[derive(Serialize)]
struct DeleteResponse {
    id: i64,
    deleted: bool,
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = ingest::delete_document(&state.pool, id)
        .await
        .map_err(|e| ApiError::from_pipeline(e, None))?;

    if !deleted {
        return Err(ApiError::not_found(format!("document {} not found", id)));
    }

    info!(doc_id = id, "document deleted");
    Ok(Json(DeleteResponse { id, deleted: true }))
}

// ============ GET /documents/{id}/usage ============

async fn handle_usage(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<UsageLogEntry>>, ApiError> {
    let entries = retrieve::usage_for_document(&state.pool, id)
        .await
        .map_err(|e| ApiError::from_pipeline(e, None))?;
    Ok(Json(entries))
}

// ============ POST /chat ============

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    history: Vec<ChatMessage>,
    #[serde(default, rename = "useRag")]
    use_rag: bool,
    #[serde(default, rename = "maxChunks")]
    max_chunks: Option<usize>,
}

#[derive(Serialize)]
struct ChatResponse {
    response: String,
    #[serde(rename = "retrievedChunks", skip_serializing_if = "Option::is_none")]
    retrieved_chunks: Option<Vec<RetrievedChunk>>,
}

async fn handle_chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if request.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    if !request.use_rag {
        let response = generate::chat(
            &state.config.generation,
            &request.message,
            &request.history,
            None,
        )
        .await
        .map_err(|e| ApiError::from_pipeline(e, None))?;

        return Ok(Json(ChatResponse {
            response,
            retrieved_chunks: None,
        }));
    }

    let chunks = retrieve::retrieve(
        &state.pool,
        &state.config,
        &request.message,
        request.max_chunks,
    )
    .await
    .map_err(|e| ApiError::from_pipeline(e, None))?;

    let context = generate::build_context_prompt(&chunks);
    let response = generate::chat(
        &state.config.generation,
        &request.message,
        &request.history,
        Some(&context),
    )
    .await
    .map_err(|e| ApiError::from_pipeline(e, None))?;

    retrieve::log_usage(&state.pool, &chunks, &response)
        .await
        .map_err(|e| ApiError::from_pipeline(e, None))?;

    Ok(Json(ChatResponse {
        response,
        retrieved_chunks: Some(chunks),
    }))
}
