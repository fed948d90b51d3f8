use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Directory uploaded files are spooled to while an ingestion runs.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1500
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for a chunk to count as relevant.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// How many best-effort chunks to return when nothing clears the threshold.
    #[serde(default = "default_fallback_chunks")]
    pub fallback_chunks: usize,
    /// Default maximum result count per retrieval.
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            fallback_chunks: default_fallback_chunks(),
            max_chunks: default_max_chunks(),
        }
    }
}

fn default_similarity_threshold() -> f32 {
    0.70
}
fn default_fallback_chunks() -> usize {
    3
}
fn default_max_chunks() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Provider family used when a request does not select one (chat path).
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Per-chunk truncation length, in characters, before submission.
    #[serde(default = "default_embed_max_chars")]
    pub embed_max_chars: usize,
    /// Truncation length for the whole-document embedding pass.
    #[serde(default = "default_doc_embed_max_chars")]
    pub doc_embed_max_chars: usize,
    /// At most this many embedding batches in flight per ingestion job.
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub openai: OpenAiEmbeddingConfig,
    #[serde(default)]
    pub ollama: OllamaEmbeddingConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            embed_max_chars: default_embed_max_chars(),
            doc_embed_max_chars: default_doc_embed_max_chars(),
            max_concurrent_batches: default_max_concurrent_batches(),
            timeout_secs: default_timeout_secs(),
            openai: OpenAiEmbeddingConfig::default(),
            ollama: OllamaEmbeddingConfig::default(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_embed_max_chars() -> usize {
    512
}
fn default_doc_embed_max_chars() -> usize {
    2048
}
fn default_max_concurrent_batches() -> usize {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiEmbeddingConfig {
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default = "default_openai_dims")]
    pub dims: usize,
    /// OpenAI supports native multi-input requests, so batches are larger.
    #[serde(default = "default_openai_batch")]
    pub batch_size: usize,
    /// Override for the API base URL (gateways, tests).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for OpenAiEmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_openai_model(),
            dims: default_openai_dims(),
            batch_size: default_openai_batch(),
            url: None,
        }
    }
}

fn default_openai_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_openai_dims() -> usize {
    1536
}
fn default_openai_batch() -> usize {
    16
}

#[derive(Debug, Deserialize, Clone)]
pub struct OllamaEmbeddingConfig {
    #[serde(default = "default_ollama_model")]
    pub model: String,
    #[serde(default = "default_ollama_dims")]
    pub dims: usize,
    /// Ollama embeds one input per request; a batch is a group of
    /// concurrent requests, so it stays small.
    #[serde(default = "default_ollama_batch")]
    pub batch_size: usize,
    #[serde(default = "default_ollama_url")]
    pub url: String,
}

impl Default for OllamaEmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_ollama_model(),
            dims: default_ollama_dims(),
            batch_size: default_ollama_batch(),
            url: default_ollama_url(),
        }
    }
}

fn default_ollama_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_ollama_dims() -> usize {
    768
}
fn default_ollama_batch() -> usize {
    4
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_openai_chat_model")]
    pub openai_model: String,
    #[serde(default)]
    pub openai_url: Option<String>,
    #[serde(default = "default_ollama_chat_model")]
    pub ollama_model: String,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            timeout_secs: default_generation_timeout_secs(),
            openai_model: default_openai_chat_model(),
            openai_url: None,
            ollama_model: default_ollama_chat_model(),
            ollama_url: default_ollama_url(),
        }
    }
}

fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_openai_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_ollama_chat_model() -> String {
    "llama3.2".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobsConfig {
    /// Terminal job entries are pruned this many seconds after finishing.
    #[serde(default = "default_job_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_job_ttl_secs(),
        }
    }
}

fn default_job_ttl_secs() -> u64 {
    600
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }

    if !(-1.0..=1.0).contains(&config.retrieval.similarity_threshold) {
        anyhow::bail!("retrieval.similarity_threshold must be in [-1.0, 1.0]");
    }
    if config.retrieval.max_chunks == 0 {
        anyhow::bail!("retrieval.max_chunks must be >= 1");
    }
    if config.retrieval.fallback_chunks == 0 {
        anyhow::bail!("retrieval.fallback_chunks must be >= 1");
    }

    if config.embedding.max_concurrent_batches == 0 {
        anyhow::bail!("embedding.max_concurrent_batches must be >= 1");
    }
    if config.embedding.embed_max_chars == 0 {
        anyhow::bail!("embedding.embed_max_chars must be > 0");
    }
    if config.embedding.openai.dims == 0 || config.embedding.ollama.dims == 0 {
        anyhow::bail!("embedding dims must be > 0");
    }
    if config.embedding.openai.batch_size == 0 || config.embedding.ollama.batch_size == 0 {
        anyhow::bail!("embedding batch_size must be > 0");
    }

    match config.embedding.default_provider.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be openai or ollama.",
            other
        ),
    }
    match config.generation.provider.as_str() {
        "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be openai or ollama.",
            other
        ),
    }

    Ok(())
}
