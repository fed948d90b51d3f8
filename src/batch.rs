//! Bounded-concurrency embedding of chunk batches.
//!
//! Passages are partitioned into provider-sized batches and pushed through
//! a semaphore-gated task pool: at most `max_concurrent_batches` batches
//! are in flight per job. Batches may complete in any order; each writes
//! its vectors back into the original positional slots, so chunk indices
//! and embeddings stay paired. After every completed batch the job tracker
//! is credited, which recomputes the polled progress value.
//!
//! A failed request, a malformed response, or a vector of the wrong
//! dimensionality fails the whole run; the caller persists nothing. The
//! run still waits for every in-flight batch before returning the error.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::embedding::{self, ProviderKind};
use crate::error::PipelineError;
use crate::jobs::JobTracker;

/// Embed all passages, returning one vector per passage in passage order.
pub async fn embed_chunks(
    config: &EmbeddingConfig,
    kind: ProviderKind,
    passages: &[String],
    job_id: &str,
    jobs: &Arc<JobTracker>,
) -> Result<Vec<Vec<f32>>, PipelineError> {
    if passages.is_empty() {
        return Ok(Vec::new());
    }

    let total = passages.len() as u64;
    let batch_size = embedding::batch_size(config, kind);
    let expected_dims = embedding::dims(config, kind);
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_batches));
    let mut tasks: JoinSet<Result<(usize, Vec<Vec<f32>>), PipelineError>> = JoinSet::new();

    for (batch_index, batch) in passages.chunks(batch_size).enumerate() {
        let start = batch_index * batch_size;
        let texts: Vec<String> = batch
            .iter()
            .map(|t| embedding::truncate_chars(t, config.embed_max_chars).to_string())
            .collect();

        let config = config.clone();
        let semaphore = semaphore.clone();
        let jobs = jobs.clone();
        let job_id = job_id.to_string();

        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.map_err(|_| {
                PipelineError::EmbeddingProvider("embedding pool closed".to_string())
            })?;

            let count = texts.len();
            let vectors = embedding::embed_texts(&config, kind, &texts).await?;

            if vectors.len() != count {
                return Err(PipelineError::EmbeddingProvider(format!(
                    "provider returned {} embeddings for {} inputs",
                    vectors.len(),
                    count
                )));
            }
            for vector in &vectors {
                if vector.len() != expected_dims {
                    return Err(PipelineError::EmbeddingProvider(format!(
                        "provider returned a {}-dim vector, expected {}",
                        vector.len(),
                        expected_dims
                    )));
                }
            }

            jobs.record_embedded(&job_id, count as u64, total);
            debug!(batch_index, count, "embedded batch");
            Ok((start, vectors))
        });
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; passages.len()];
    let mut first_err: Option<PipelineError> = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok((start, vectors))) => {
                for (offset, vector) in vectors.into_iter().enumerate() {
                    slots[start + offset] = Some(vector);
                }
            }
            Ok(Err(e)) => {
                first_err.get_or_insert(e);
            }
            Err(e) => {
                first_err.get_or_insert(PipelineError::EmbeddingProvider(format!(
                    "embedding task failed: {}",
                    e
                )));
            }
        }
    }

    if let Some(err) = first_err {
        return Err(err);
    }

    slots.into_iter().collect::<Option<Vec<_>>>().ok_or_else(|| {
        PipelineError::EmbeddingProvider("missing embeddings for some chunks".to_string())
    })
}
