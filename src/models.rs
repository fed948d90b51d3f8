//! Core data models used throughout ragdex.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the ingestion and query pipeline.

use serde::{Deserialize, Serialize};

/// Normalized document stored in SQLite.
///
/// The id is assigned by storage on insert. The document-level embedding is
/// backfilled after the chunk batch is written, so it is `None` for a short
/// window during ingestion.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: i64,
    pub title: String,
    pub original_name: String,
    pub body: String,
    pub provider: String,
    pub embedding: Option<Vec<f32>>,
    pub created_at: i64,
}

/// An embedded passage of a document's text.
///
/// Keyed by (document_id, chunk_index); indices are zero-based and
/// contiguous within a document. Chunks are written once and never mutated.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub document_id: i64,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// A chunk scored against one query embedding. Query-time only.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    #[serde(rename = "documentId")]
    pub document_id: i64,
    #[serde(rename = "chunkIndex")]
    pub chunk_index: i64,
    pub text: String,
    pub similarity: f32,
}

/// One selected chunk recorded in the usage log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageChunk {
    pub chunk_index: i64,
    pub chunk_text: String,
}

/// Append-only record of which chunks backed which generated response.
#[derive(Debug, Clone, Serialize)]
pub struct UsageLogEntry {
    #[serde(rename = "documentId")]
    pub document_id: i64,
    #[serde(rename = "chunkIndexes")]
    pub chunk_indexes: Vec<UsageChunk>,
    pub response: String,
    pub timestamp: i64,
}
