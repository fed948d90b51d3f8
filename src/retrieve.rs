//! Similarity retrieval over the chunk corpus.
//!
//! Retrieval is an exhaustive linear scan: every stored chunk is scored
//! against the query embedding with cosine similarity, filtered by a fixed
//! threshold, and the top `k` survivors are returned. When nothing clears
//! the threshold, the best few chunks are returned anyway so the
//! generation step always has some context to work with.
//!
//! Chunks whose stored vectors have a different dimensionality than the
//! query embedding (a corpus ingested under another provider) are skipped,
//! never compared.

use std::cmp::Ordering;

use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

use crate::config::Config;
use crate::embedding::{self, ProviderKind};
use crate::error::PipelineError;
use crate::models::{Chunk, RetrievedChunk, UsageChunk, UsageLogEntry};

/// Retrieve up to `k` chunks relevant to `query` (defaults to the
/// configured `max_chunks`), in descending similarity order.
pub async fn retrieve(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    k: Option<usize>,
) -> Result<Vec<RetrievedChunk>, PipelineError> {
    if query.trim().is_empty() {
        return Err(PipelineError::Validation(
            "query must not be empty".to_string(),
        ));
    }

    let kind = ProviderKind::parse(&config.embedding.default_provider).ok_or_else(|| {
        PipelineError::Validation(format!(
            "Unknown embedding provider: {}",
            config.embedding.default_provider
        ))
    })?;

    let query_vec = embedding::embed_query(&config.embedding, kind, query).await?;
    let k = k.unwrap_or(config.retrieval.max_chunks);

    let corpus = load_corpus(pool).await?;

    let mut scored = Vec::with_capacity(corpus.len());
    let mut skipped = 0usize;

    for chunk in corpus {
        if chunk.embedding.len() != query_vec.len() {
            skipped += 1;
            continue;
        }
        let similarity = embedding::cosine_similarity(&query_vec, &chunk.embedding);
        scored.push(RetrievedChunk {
            document_id: chunk.document_id,
            chunk_index: chunk.chunk_index,
            text: chunk.text,
            similarity,
        });
    }

    if skipped > 0 {
        warn!(
            skipped,
            "skipped chunks whose embedding dimensionality does not match the query provider"
        );
    }

    let selected = select_chunks(
        scored,
        config.retrieval.similarity_threshold,
        config.retrieval.fallback_chunks,
        k,
    );
    debug!(results = selected.len(), k, "retrieval complete");
    Ok(selected)
}

/// Load every stored chunk, in (document, index) order so stable sorting
/// keeps ties deterministic.
async fn load_corpus(pool: &SqlitePool) -> Result<Vec<Chunk>, PipelineError> {
    let rows = sqlx::query(
        "SELECT document_id, chunk_index, text, embedding FROM chunks ORDER BY document_id, chunk_index",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            Chunk {
                document_id: row.get("document_id"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                embedding: embedding::blob_to_vec(&blob),
            }
        })
        .collect())
}

/// Threshold selection with best-effort fallback.
///
/// Chunks at or above `threshold` are ranked descending and capped at `k`.
/// If none qualify, the top `fallback` chunks by raw similarity are
/// returned instead; the two paths never mix. Sorting is stable, so equal
/// scores keep their (document, index) order.
fn select_chunks(
    mut scored: Vec<RetrievedChunk>,
    threshold: f32,
    fallback: usize,
    k: usize,
) -> Vec<RetrievedChunk> {
    let mut relevant: Vec<RetrievedChunk> = scored
        .iter()
        .filter(|c| c.similarity >= threshold)
        .cloned()
        .collect();

    if relevant.is_empty() {
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        scored.truncate(fallback);
        return scored;
    }

    relevant.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
    });
    relevant.truncate(k);
    relevant
}

/// Record which chunks backed a generated response, keyed by the first
/// selected chunk's document. No-op for an empty selection.
pub async fn log_usage(
    pool: &SqlitePool,
    chunks: &[RetrievedChunk],
    response: &str,
) -> Result<(), PipelineError> {
    let Some(first) = chunks.first() else {
        return Ok(());
    };

    let entries: Vec<UsageChunk> = chunks
        .iter()
        .map(|c| UsageChunk {
            chunk_index: c.chunk_index,
            chunk_text: c.text.clone(),
        })
        .collect();
    let payload = serde_json::to_string(&entries)?;
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        "INSERT INTO usage_log (document_id, chunk_indexes, response, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(first.document_id)
    .bind(payload)
    .bind(response)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Usage entries for one document, newest first.
pub async fn usage_for_document(
    pool: &SqlitePool,
    doc_id: i64,
) -> Result<Vec<UsageLogEntry>, PipelineError> {
    let rows = sqlx::query(
        "SELECT document_id, chunk_indexes, response, created_at FROM usage_log WHERE document_id = ? ORDER BY id DESC",
    )
    .bind(doc_id)
    .fetch_all(pool)
    .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in &rows {
        let raw: String = row.get("chunk_indexes");
        let chunk_indexes: Vec<UsageChunk> = serde_json::from_str(&raw)?;
        entries.push(UsageLogEntry {
            document_id: row.get("document_id"),
            chunk_indexes,
            response: row.get("response"),
            timestamp: row.get("created_at"),
        });
    }

    Ok(entries)
}
