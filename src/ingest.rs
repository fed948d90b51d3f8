//! Ingestion pipeline orchestration.
//!
//! Coordinates the full upload flow: extraction → chunking → batched
//! embedding → persistence, reporting progress through the job tracker at
//! every stage. Persistence is all-or-nothing: the document row and all of
//! its chunks commit in one transaction, and only after every embedding
//! succeeded, so a half-indexed document is never visible to retrieval.
//!
//! The whole-document embedding is backfilled after the chunk write (it
//! needs its own truncation pass and is not required for chunk-level
//! retrieval); if that backfill fails the document is rolled back.

use std::path::Path;
use std::sync::Arc;

use sqlx::{Row, SqlitePool};
use tracing::{error, info, warn};

use crate::batch;
use crate::chunk;
use crate::config::Config;
use crate::embedding::{self, ProviderKind};
use crate::error::PipelineError;
use crate::extract::{self, ExtractedDocument};
use crate::jobs::{JobTracker, JobUpdate};
use crate::models::Document;

/// What the upload endpoint returns to the caller.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub id: i64,
    pub title: String,
    pub original_name: String,
}

/// Ingest a spooled upload, then delete the temp file on every exit path.
///
/// On failure the job is marked failed with the sanitized message; the raw
/// error goes to the server log.
pub async fn ingest_uploaded_file(
    pool: &SqlitePool,
    config: &Config,
    kind: ProviderKind,
    path: &Path,
    original_name: &str,
    job_id: &str,
    jobs: &Arc<JobTracker>,
) -> Result<IngestOutcome, PipelineError> {
    let result = ingest_file(pool, config, kind, path, original_name, job_id, jobs).await;

    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), "failed to remove spooled upload: {}", e);
    }

    if let Err(e) = &result {
        error!(job_id, "ingestion failed: {}", e);
        jobs.fail(job_id, e.user_message());
    }

    result
}

/// Ingest a file from disk. PDFs go through page extraction and the
/// page-based chunker; anything else is read as UTF-8 text and split with
/// the boundary-seeking chunker.
pub async fn ingest_file(
    pool: &SqlitePool,
    config: &Config,
    kind: ProviderKind,
    path: &Path,
    original_name: &str,
    job_id: &str,
    jobs: &Arc<JobTracker>,
) -> Result<IngestOutcome, PipelineError> {
    jobs.update(
        job_id,
        JobUpdate {
            status: Some("Extracting text...".to_string()),
            progress: Some(10),
            ..JobUpdate::default()
        },
    );

    let bytes = tokio::fs::read(path).await?;

    let (document, passages) = if has_pdf_extension(original_name) {
        let document = extract::extract_pdf(bytes, original_name).await?;
        let passages = chunk::chunk_pages(
            &document.pages,
            config.chunking.chunk_size,
            config.chunking.overlap,
        );
        (document, passages)
    } else {
        let text = String::from_utf8(bytes)
            .map_err(|_| PipelineError::Extraction("file is not valid UTF-8 text".to_string()))?;
        let full_text = text.trim().to_string();
        let passages = chunk::chunk_text(
            &full_text,
            config.chunking.chunk_size,
            config.chunking.overlap,
        );
        let document = ExtractedDocument {
            title: extract::title_from_filename(original_name),
            pages: Vec::new(),
            full_text,
        };
        (document, passages)
    };

    ingest_extracted(pool, config, kind, document, original_name, passages, job_id, jobs).await
}

/// Embed and persist already-extracted passages.
pub async fn ingest_extracted(
    pool: &SqlitePool,
    config: &Config,
    kind: ProviderKind,
    document: ExtractedDocument,
    original_name: &str,
    passages: Vec<String>,
    job_id: &str,
    jobs: &Arc<JobTracker>,
) -> Result<IngestOutcome, PipelineError> {
    if passages.is_empty() {
        return Err(PipelineError::Validation(
            "Document contains no extractable text".to_string(),
        ));
    }

    let embeddings = batch::embed_chunks(&config.embedding, kind, &passages, job_id, jobs).await?;

    jobs.update(
        job_id,
        JobUpdate {
            status: Some("Saving document...".to_string()),
            progress: Some(90),
            ..JobUpdate::default()
        },
    );

    let doc_id = persist_document(pool, kind, &document, original_name, &passages, &embeddings).await?;

    let doc_text =
        embedding::truncate_chars(&document.full_text, config.embedding.doc_embed_max_chars);
    if let Err(e) = backfill_document_embedding(pool, config, kind, doc_id, doc_text).await {
        // Roll the orphan back; the cascade removes its chunks.
        if let Err(delete_err) = delete_document(pool, doc_id).await {
            error!(doc_id, "rollback after failed backfill also failed: {}", delete_err);
        }
        return Err(e);
    }

    jobs.update(
        job_id,
        JobUpdate {
            status: Some("Upload complete!".to_string()),
            progress: Some(100),
            ..JobUpdate::default()
        },
    );

    info!(
        doc_id,
        title = %document.title,
        chunks = passages.len(),
        provider = kind.as_str(),
        "document ingested"
    );

    Ok(IngestOutcome {
        id: doc_id,
        title: document.title,
        original_name: original_name.to_string(),
    })
}

/// Write the document row and all chunks in one transaction.
async fn persist_document(
    pool: &SqlitePool,
    kind: ProviderKind,
    document: &ExtractedDocument,
    original_name: &str,
    passages: &[String],
    embeddings: &[Vec<f32>],
) -> Result<i64, PipelineError> {
    let mut tx = pool.begin().await?;
    let now = chrono::Utc::now().timestamp();

    let doc_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO documents (title, original_name, body, provider, created_at)
        VALUES (?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(&document.title)
    .bind(original_name)
    .bind(&document.full_text)
    .bind(kind.as_str())
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    for (index, (text, vector)) in passages.iter().zip(embeddings.iter()).enumerate() {
        sqlx::query(
            "INSERT INTO chunks (document_id, chunk_index, text, embedding, dims) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(doc_id)
        .bind(index as i64)
        .bind(text)
        .bind(embedding::vec_to_blob(vector))
        .bind(vector.len() as i64)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(doc_id)
}

async fn backfill_document_embedding(
    pool: &SqlitePool,
    config: &Config,
    kind: ProviderKind,
    doc_id: i64,
    text: &str,
) -> Result<(), PipelineError> {
    let vector = embedding::embed_query(&config.embedding, kind, text).await?;

    sqlx::query("UPDATE documents SET embedding = ?, dims = ? WHERE id = ?")
        .bind(embedding::vec_to_blob(&vector))
        .bind(vector.len() as i64)
        .bind(doc_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Fetch one stored document, embedding included.
pub async fn get_document(
    pool: &SqlitePool,
    doc_id: i64,
) -> Result<Option<Document>, PipelineError> {
    let row = sqlx::query(
        "SELECT id, title, original_name, body, provider, embedding, created_at FROM documents WHERE id = ?",
    )
    .bind(doc_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        let blob: Option<Vec<u8>> = row.get("embedding");
        Document {
            id: row.get("id"),
            title: row.get("title"),
            original_name: row.get("original_name"),
            body: row.get("body"),
            provider: row.get("provider"),
            embedding: blob.map(|b| embedding::blob_to_vec(&b)),
            created_at: row.get("created_at"),
        }
    }))
}

/// Delete a document; chunks go with it via the cascade. Returns whether a
/// row existed.
pub async fn delete_document(pool: &SqlitePool, doc_id: i64) -> Result<bool, PipelineError> {
    let result = sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(doc_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn has_pdf_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_extension_is_case_insensitive() {
        assert!(has_pdf_extension("paper.pdf"));
        assert!(has_pdf_extension("PAPER.PDF"));
        assert!(!has_pdf_extension("notes.txt"));
        assert!(!has_pdf_extension("noext"));
    }
}
