//! Pipeline error taxonomy.
//!
//! Every failure in the ingestion and query path collapses into one of the
//! variants below. The raw error text is for server-side logs; clients get
//! the sanitized [`PipelineError::user_message`] so provider internals never
//! leak into HTTP responses.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad request input: missing file, unsupported provider, empty query.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The uploaded bytes are not a parseable document.
    #[error("text extraction failed: {0}")]
    Extraction(String),

    /// An embedding request failed or returned a malformed response.
    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    /// A generation (chat) request failed.
    #[error("generation provider error: {0}")]
    Generation(String),

    /// Persistence layer failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    /// HTTP status the error surfaces as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Validation(_) | PipelineError::Extraction(_) => StatusCode::BAD_REQUEST,
            PipelineError::EmbeddingProvider(_)
            | PipelineError::Generation(_)
            | PipelineError::Storage(_)
            | PipelineError::Io(_)
            | PipelineError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Sanitized message safe to show to end users. Validation messages are
    /// user-caused and pass through; everything else is generic.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Validation(msg) => msg.clone(),
            PipelineError::Extraction(_) => "Invalid or corrupted document".to_string(),
            PipelineError::EmbeddingProvider(_) => "Embedding generation failed".to_string(),
            PipelineError::Generation(_) => "Response generation failed".to_string(),
            PipelineError::Storage(_) | PipelineError::Io(_) | PipelineError::Serialization(_) => {
                "Failed to store document".to_string()
            }
        }
    }
}
