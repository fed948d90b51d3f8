//! Embedding providers and vector utilities.
//!
//! Two provider families are supported, selected per ingestion request:
//!
//! - **openai** — `POST /v1/embeddings` with native multi-input batches.
//! - **ollama** — `POST /api/embeddings` takes one prompt per request, so a
//!   batch is a group of concurrent single-item requests.
//!
//! Requests carry a client timeout and are not retried; a failed call fails
//! the whole ingestion job, which the caller may resubmit.
//!
//! Also provides the vector utilities shared by ingestion and retrieval:
//! [`cosine_similarity`], plus [`vec_to_blob`] / [`blob_to_vec`] for the
//! little-endian f32 BLOB encoding used in SQLite.

use std::time::Duration;

use futures_util::future::try_join_all;

use crate::config::EmbeddingConfig;
use crate::error::PipelineError;

/// Embedding provider family, as selected by the `embeddingProvider`
/// upload field or the configured default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Ollama,
}

impl ProviderKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "openai" => Some(ProviderKind::OpenAi),
            "ollama" => Some(ProviderKind::Ollama),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Ollama => "ollama",
        }
    }
}

/// Batch size for this provider: OpenAI takes many inputs per request,
/// Ollama takes one, so its batch only bounds concurrent fan-out.
pub fn batch_size(config: &EmbeddingConfig, kind: ProviderKind) -> usize {
    match kind {
        ProviderKind::OpenAi => config.openai.batch_size,
        ProviderKind::Ollama => config.ollama.batch_size,
    }
}

/// Declared vector dimensionality for this provider's model.
pub fn dims(config: &EmbeddingConfig, kind: ProviderKind) -> usize {
    match kind {
        ProviderKind::OpenAi => config.openai.dims,
        ProviderKind::Ollama => config.ollama.dims,
    }
}

/// Truncate to at most `max_chars` Unicode scalars, never splitting a
/// code point. Providers enforce input-length limits; truncation is
/// preferred over a failed request.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Embed a batch of texts, returning one vector per input in input order.
pub async fn embed_texts(
    config: &EmbeddingConfig,
    kind: ProviderKind,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, PipelineError> {
    match kind {
        ProviderKind::OpenAi => embed_openai(config, texts).await,
        ProviderKind::Ollama => embed_ollama(config, texts).await,
    }
}

/// Embed a single query text.
pub async fn embed_query(
    config: &EmbeddingConfig,
    kind: ProviderKind,
    text: &str,
) -> Result<Vec<f32>, PipelineError> {
    let results = embed_texts(config, kind, &[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::EmbeddingProvider("empty embedding response".to_string()))
}

// ============ OpenAI ============

async fn embed_openai(
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, PipelineError> {
    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| PipelineError::EmbeddingProvider("OPENAI_API_KEY not set".to_string()))?;

    let base = config
        .openai
        .url
        .as_deref()
        .unwrap_or("https://api.openai.com");

    let client = http_client(config.timeout_secs)?;

    let body = serde_json::json!({
        "model": config.openai.model,
        "input": texts,
    });

    let response = client
        .post(format!("{}/v1/embeddings", base))
        .header("Authorization", format!("Bearer {}", api_key))
        .json(&body)
        .send()
        .await
        .map_err(|e| PipelineError::EmbeddingProvider(format!("OpenAI request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(PipelineError::EmbeddingProvider(format!(
            "OpenAI API error {}: {}",
            status, body_text
        )));
    }

    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| PipelineError::EmbeddingProvider(format!("OpenAI response: {}", e)))?;

    parse_openai_response(&json, texts.len())
}

/// Extract `data[].embedding` arrays, placing each by its `index` field so
/// output order always matches input order.
fn parse_openai_response(
    json: &serde_json::Value,
    expected: usize,
) -> Result<Vec<Vec<f32>>, PipelineError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| malformed("missing data array"))?;

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];

    for item in data {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .ok_or_else(|| malformed("missing index"))? as usize;
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| malformed("missing embedding"))?;

        if index >= expected {
            return Err(malformed("index out of range"));
        }

        slots[index] = Some(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }

    slots
        .into_iter()
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| malformed("fewer embeddings than inputs"))
}

// ============ Ollama ============

/// Ollama embeds one prompt per request; all requests for a batch run
/// concurrently and the batch fails if any of them fails.
async fn embed_ollama(
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>, PipelineError> {
    let client = http_client(config.timeout_secs)?;
    let url = format!("{}/api/embeddings", config.ollama.url);

    try_join_all(
        texts
            .iter()
            .map(|text| embed_ollama_one(&client, &url, &config.ollama.model, text)),
    )
    .await
}

async fn embed_ollama_one(
    client: &reqwest::Client,
    url: &str,
    model: &str,
    text: &str,
) -> Result<Vec<f32>, PipelineError> {
    let body = serde_json::json!({
        "model": model,
        "prompt": text,
    });

    let response = client.post(url).json(&body).send().await.map_err(|e| {
        PipelineError::EmbeddingProvider(format!(
            "Ollama request failed (is Ollama running at {}?): {}",
            url, e
        ))
    })?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        return Err(PipelineError::EmbeddingProvider(format!(
            "Ollama API error {}: {}",
            status, body_text
        )));
    }

    let json: serde_json::Value = response
        .json()
        .await
        .map_err(|e| PipelineError::EmbeddingProvider(format!("Ollama response: {}", e)))?;

    let embedding = json
        .get("embedding")
        .and_then(|e| e.as_array())
        .ok_or_else(|| malformed("missing embedding field"))?;

    Ok(embedding
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

fn malformed(detail: &str) -> PipelineError {
    PipelineError::EmbeddingProvider(format!("malformed provider response: {}", detail))
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, PipelineError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::EmbeddingProvider(e.to_string()))
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Defined as `0.0` when either vector
/// has zero norm, and for empty or length-mismatched vectors, so callers
/// never see NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
