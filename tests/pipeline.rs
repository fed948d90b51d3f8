//! Integration tests for the ingestion pipeline and retrieval path,
//! against a real temp SQLite database and a mocked Ollama server.

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use sqlx::{Row, SqlitePool};
use tempfile::TempDir;

use ragdex::config::{Config, DbConfig, ServerConfig};
use ragdex::embedding::{self, ProviderKind};
use ragdex::error::PipelineError;
use ragdex::extract::ExtractedDocument;
use ragdex::ingest;
use ragdex::jobs::JobTracker;
use ragdex::{chunk, migrate, retrieve};

/// Config wired to a temp database and a mock Ollama with 2-dim vectors.
fn test_config(tmp: &TempDir, ollama_url: &str) -> Config {
    let mut config = Config {
        db: DbConfig {
            path: tmp.path().join("ragdex.sqlite"),
        },
        server: ServerConfig {
            bind: "127.0.0.1:0".to_string(),
            upload_dir: tmp.path().join("uploads"),
        },
        chunking: Default::default(),
        retrieval: Default::default(),
        embedding: Default::default(),
        generation: Default::default(),
        jobs: Default::default(),
    };
    config.embedding.ollama.url = ollama_url.to_string();
    config.embedding.ollama.dims = 2;
    config
}

async fn test_pool(config: &Config) -> SqlitePool {
    let pool = ragdex::db::connect(config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    pool
}

fn tracker() -> Arc<JobTracker> {
    Arc::new(JobTracker::new(Duration::from_secs(600)))
}

/// Catch-all embedding mock answering every prompt with the same vector.
fn mock_all_embeddings(server: &MockServer, vector: &[f32]) {
    let body = serde_json::json!({ "embedding": vector });
    server.mock(|when, then| {
        when.method(POST).path("/api/embeddings");
        then.status(200).json_body(body);
    });
}

async fn insert_document(pool: &SqlitePool, title: &str) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO documents (title, original_name, body, provider, created_at) VALUES (?, ?, ?, 'ollama', 0) RETURNING id",
    )
    .bind(title)
    .bind(format!("{}.pdf", title))
    .bind("body text")
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn insert_chunk(pool: &SqlitePool, doc_id: i64, index: i64, text: &str, vector: &[f32]) {
    sqlx::query("INSERT INTO chunks (document_id, chunk_index, text, embedding, dims) VALUES (?, ?, ?, ?, ?)")
        .bind(doc_id)
        .bind(index)
        .bind(text)
        .bind(embedding::vec_to_blob(vector))
        .bind(vector.len() as i64)
        .execute(pool)
        .await
        .unwrap();
}

async fn chunk_count(pool: &SqlitePool, doc_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
        .bind(doc_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Build a small real PDF with one text run per page.
fn build_pdf(pages_text: &[&str]) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages_text {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![100.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().unwrap(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            "Resources" => resources_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}

#[tokio::test]
async fn pdf_extraction_yields_one_entry_per_page() {
    let bytes = build_pdf(&["alpha page", "beta page", "gamma page"]);
    let doc = ragdex::extract::extract_pdf(bytes, "triple.pdf")
        .await
        .unwrap();
    assert_eq!(doc.pages.len(), 3);
    assert_eq!(doc.title, "triple");
}

#[tokio::test]
async fn text_file_ingests_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    mock_all_embeddings(&server, &[0.6, 0.8]);

    let config = test_config(&tmp, &server.base_url());
    let pool = test_pool(&config).await;
    let jobs = tracker();
    let job_id = jobs.create();

    let file = tmp.path().join("notes.txt");
    std::fs::write(&file, "a few lines of notes about retrieval systems").unwrap();

    let outcome = ingest::ingest_file(
        &pool,
        &config,
        ProviderKind::Ollama,
        &file,
        "notes.txt",
        &job_id,
        &jobs,
    )
    .await
    .unwrap();

    assert_eq!(outcome.title, "notes");
    assert_eq!(chunk_count(&pool, outcome.id).await, 1);

    // chunk index range is contiguous from zero
    let index: i64 =
        sqlx::query_scalar("SELECT chunk_index FROM chunks WHERE document_id = ?")
            .bind(outcome.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(index, 0);

    // the whole-document embedding was backfilled
    let doc_vec: Option<Vec<u8>> =
        sqlx::query_scalar("SELECT embedding FROM documents WHERE id = ?")
            .bind(outcome.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(embedding::blob_to_vec(&doc_vec.unwrap()).len(), 2);

    let state = jobs.get(&job_id);
    assert_eq!(state.progress, 100);
    assert_eq!(state.status, "Upload complete!");
    assert!(state.error.is_none());
}

#[tokio::test]
async fn three_short_pages_become_three_chunks() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    mock_all_embeddings(&server, &[1.0, 0.0]);

    let config = test_config(&tmp, &server.base_url());
    let pool = test_pool(&config).await;
    let jobs = tracker();
    let job_id = jobs.create();

    let pages: Vec<String> = ["first page", "second page", "third page"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let passages = chunk::chunk_pages(&pages, config.chunking.chunk_size, config.chunking.overlap);
    assert_eq!(passages.len(), 3);

    let document = ExtractedDocument {
        title: "paper".to_string(),
        full_text: pages.join(" "),
        pages,
    };

    let outcome = ingest::ingest_extracted(
        &pool,
        &config,
        ProviderKind::Ollama,
        document,
        "paper.pdf",
        passages,
        &job_id,
        &jobs,
    )
    .await
    .unwrap();

    let rows = sqlx::query(
        "SELECT chunk_index, dims FROM chunks WHERE document_id = ? ORDER BY chunk_index",
    )
    .bind(outcome.id)
    .fetch_all(&pool)
    .await
    .unwrap();

    let indices: Vec<i64> = rows.iter().map(|r| r.get("chunk_index")).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(rows.iter().all(|r| r.get::<i64, _>("dims") == 2));
}

#[tokio::test]
async fn dimension_mismatch_persists_nothing_and_cleans_temp_file() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    // config declares 2 dims; the provider answers with 3
    mock_all_embeddings(&server, &[1.0, 2.0, 3.0]);

    let config = test_config(&tmp, &server.base_url());
    let pool = test_pool(&config).await;
    let jobs = tracker();
    let job_id = jobs.create();

    let spooled = tmp.path().join("spooled.txt");
    std::fs::write(&spooled, "some text to embed").unwrap();

    let err = ingest::ingest_uploaded_file(
        &pool,
        &config,
        ProviderKind::Ollama,
        &spooled,
        "spooled.txt",
        &job_id,
        &jobs,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::EmbeddingProvider(_)));
    assert!(!spooled.exists(), "temp upload must be deleted on failure");

    let docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await
        .unwrap();
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(docs, 0, "no partial document may be persisted");
    assert_eq!(chunks, 0, "no partial chunks may be persisted");

    let state = jobs.get(&job_id);
    assert_eq!(state.status, "Upload failed");
    assert_eq!(state.error.as_deref(), Some("Embedding generation failed"));
}

#[tokio::test]
async fn corrupt_pdf_fails_with_sanitized_error_and_cleans_up() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    mock_all_embeddings(&server, &[0.0, 1.0]);

    let config = test_config(&tmp, &server.base_url());
    let pool = test_pool(&config).await;
    let jobs = tracker();
    let job_id = jobs.create();

    let spooled = tmp.path().join("bad.pdf");
    std::fs::write(&spooled, b"definitely not a pdf").unwrap();

    let err = ingest::ingest_uploaded_file(
        &pool,
        &config,
        ProviderKind::Ollama,
        &spooled,
        "bad.pdf",
        &job_id,
        &jobs,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::Extraction(_)));
    assert!(!spooled.exists());

    let state = jobs.get(&job_id);
    assert_eq!(state.error.as_deref(), Some("Invalid or corrupted document"));

    let docs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(docs, 0);
}

#[tokio::test]
async fn deleting_a_document_removes_its_chunks_from_retrieval() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    mock_all_embeddings(&server, &[1.0, 0.0]);

    let config = test_config(&tmp, &server.base_url());
    let pool = test_pool(&config).await;

    let keep = insert_document(&pool, "keep").await;
    let doomed = insert_document(&pool, "doomed").await;
    insert_chunk(&pool, keep, 0, "kept passage", &[1.0, 0.0]).await;
    insert_chunk(&pool, doomed, 0, "doomed passage", &[1.0, 0.0]).await;
    insert_chunk(&pool, doomed, 1, "another doomed passage", &[0.9, 0.1]).await;

    assert!(ingest::delete_document(&pool, doomed).await.unwrap());
    assert_eq!(chunk_count(&pool, doomed).await, 0, "cascade must remove chunks");

    let results = retrieve::retrieve(&pool, &config, "anything", None)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|c| c.document_id == keep));

    // deleting again reports no row
    assert!(!ingest::delete_document(&pool, doomed).await.unwrap());
}

#[tokio::test]
async fn below_threshold_corpus_falls_back_to_top_three() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    // query embedding is the unit x axis; chunk vectors are unit vectors
    // whose x component is exactly the cosine similarity
    mock_all_embeddings(&server, &[1.0, 0.0]);

    let config = test_config(&tmp, &server.base_url());
    let pool = test_pool(&config).await;

    let doc = insert_document(&pool, "weak matches").await;
    let sims = [0.50f32, 0.20, 0.45, 0.30, 0.10];
    for (i, s) in sims.iter().enumerate() {
        let v = [*s, (1.0 - s * s).sqrt()];
        insert_chunk(&pool, doc, i as i64, &format!("passage {}", i), &v).await;
    }

    let results = retrieve::retrieve(&pool, &config, "query", None).await.unwrap();

    // best match (0.5) is under the 0.7 threshold: exactly the 3 best
    // chunks come back regardless of the cutoff
    assert_eq!(results.len(), 3);
    let indices: Vec<i64> = results.iter().map(|c| c.chunk_index).collect();
    assert_eq!(indices, vec![0, 2, 3]);
    assert!(results.windows(2).all(|w| w[0].similarity >= w[1].similarity));
}

#[tokio::test]
async fn mismatched_dimension_chunks_are_skipped_not_compared() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    mock_all_embeddings(&server, &[1.0, 0.0]);

    let config = test_config(&tmp, &server.base_url());
    let pool = test_pool(&config).await;

    let doc = insert_document(&pool, "mixed corpus").await;
    insert_chunk(&pool, doc, 0, "two dim passage", &[1.0, 0.0]).await;
    insert_chunk(&pool, doc, 1, "three dim passage", &[1.0, 0.0, 0.0]).await;

    let results = retrieve::retrieve(&pool, &config, "query", None).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk_index, 0);
}

#[tokio::test]
async fn usage_log_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    mock_all_embeddings(&server, &[1.0, 0.0]);

    let config = test_config(&tmp, &server.base_url());
    let pool = test_pool(&config).await;

    let doc = insert_document(&pool, "audited").await;
    insert_chunk(&pool, doc, 0, "first passage", &[1.0, 0.0]).await;
    insert_chunk(&pool, doc, 3, "fourth passage", &[0.9, 0.1]).await;

    let chunks = retrieve::retrieve(&pool, &config, "query", None).await.unwrap();
    retrieve::log_usage(&pool, &chunks, "the generated answer")
        .await
        .unwrap();

    let entries = retrieve::usage_for_document(&pool, doc).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].document_id, doc);
    assert_eq!(entries[0].response, "the generated answer");
    assert_eq!(entries[0].chunk_indexes.len(), chunks.len());
    assert_eq!(entries[0].chunk_indexes[0].chunk_index, 0);
    assert_eq!(entries[0].chunk_indexes[0].chunk_text, "first passage");

    // other documents see nothing
    let other = insert_document(&pool, "other").await;
    assert!(retrieve::usage_for_document(&pool, other)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn polled_progress_never_decreases_during_ingestion() {
    let tmp = TempDir::new().unwrap();
    let server = MockServer::start_async().await;
    mock_all_embeddings(&server, &[0.6, 0.8]);

    let mut config = test_config(&tmp, &server.base_url());
    // one passage per batch so progress moves in several steps
    config.embedding.ollama.batch_size = 1;
    config.chunking.chunk_size = 40;
    config.chunking.overlap = 10;
    let pool = test_pool(&config).await;
    let jobs = tracker();
    let job_id = jobs.create();

    let file = tmp.path().join("long.txt");
    std::fs::write(&file, "lorem ipsum ".repeat(60)).unwrap();

    let poller = {
        let jobs = jobs.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move {
            let mut last = 0u8;
            for _ in 0..30_000 {
                let state = jobs.get(&job_id);
                assert!(state.progress >= last, "progress went backwards");
                last = state.progress;
                if state.is_terminal() {
                    return last;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            panic!("job never reached a terminal state");
        })
    };

    ingest::ingest_file(
        &pool,
        &config,
        ProviderKind::Ollama,
        &file,
        "long.txt",
        &job_id,
        &jobs,
    )
    .await
    .unwrap();

    let final_progress = poller.await.unwrap();
    assert_eq!(final_progress, 100);
}
