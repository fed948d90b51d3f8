//! # ragdex CLI
//!
//! The `ragdex` binary runs the ingestion + retrieval server and offers a
//! few terminal conveniences for working with the corpus directly.
//!
//! ## Usage
//!
//! ```bash
//! ragdex --config ./config/ragdex.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragdex init` | Create the SQLite database and run schema migrations |
//! | `ragdex serve` | Start the HTTP API server |
//! | `ragdex ingest <file>` | Ingest a local PDF or text file |
//! | `ragdex ask "<query>"` | One-shot retrieval against the corpus |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! ragdex init --config ./config/ragdex.toml
//!
//! # Start the server
//! ragdex serve --config ./config/ragdex.toml
//!
//! # Ingest a paper from the terminal (no HTTP round trip)
//! ragdex ingest ./papers/attention.pdf --provider ollama
//!
//! # See which passages a question would retrieve
//! ragdex ask "what is multi-head attention" --limit 3
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use ragdex::config;
use ragdex::db;
use ragdex::embedding::ProviderKind;
use ragdex::ingest;
use ragdex::jobs::JobTracker;
use ragdex::migrate;
use ragdex::retrieve;
use ragdex::server;

/// ragdex — a document ingestion and retrieval-augmented chat server.
#[derive(Parser)]
#[command(
    name = "ragdex",
    about = "ragdex — a document ingestion and retrieval-augmented chat server",
    version,
    long_about = "ragdex ingests PDFs into semantically embedded passages and serves \
    similarity-based retrieval as context for chat generation, over an HTTP API with \
    pollable upload progress."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragdex.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (documents, chunks, usage_log). Idempotent.
    Init,

    /// Start the HTTP API server.
    Serve,

    /// Ingest a local file without the HTTP layer.
    ///
    /// PDFs go through page extraction and page-based chunking; any other
    /// file is read as UTF-8 text and split on nearby line boundaries.
    Ingest {
        /// File to ingest.
        file: PathBuf,

        /// Embedding provider: openai or ollama. Defaults to the
        /// configured default_provider.
        #[arg(long)]
        provider: Option<String>,
    },

    /// One-shot retrieval: print the passages a query would pull in.
    Ask {
        /// Query text.
        query: String,

        /// Maximum passages to return.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized at {}", config.db.path.display());
        }

        Commands::Serve => {
            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;
            server::run_server(config, pool).await?;
        }

        Commands::Ingest { file, provider } => {
            let provider_name =
                provider.unwrap_or_else(|| config.embedding.default_provider.clone());
            let kind = ProviderKind::parse(&provider_name).ok_or_else(|| {
                anyhow::anyhow!("Unknown embedding provider: {}", provider_name)
            })?;

            let pool = db::connect(&config).await?;
            migrate::run_migrations(&pool).await?;

            let jobs = Arc::new(JobTracker::new(Duration::from_secs(config.jobs.ttl_secs)));
            let job_id = jobs.create();
            let original_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "document".to_string());

            let outcome =
                ingest::ingest_file(&pool, &config, kind, &file, &original_name, &job_id, &jobs)
                    .await?;
            let state = jobs.get(&job_id);

            println!("ingested \"{}\" as document {}", outcome.title, outcome.id);
            println!("  chunks: {}", state.total_chunks.unwrap_or(0));
            pool.close().await;
        }

        Commands::Ask { query, limit } => {
            let pool = db::connect(&config).await?;
            let chunks = retrieve::retrieve(&pool, &config, &query, limit).await?;

            if chunks.is_empty() {
                println!("No results.");
            } else {
                for (i, chunk) in chunks.iter().enumerate() {
                    println!(
                        "{}. [{:.2}] document {} / passage {}",
                        i + 1,
                        chunk.similarity,
                        chunk.document_id,
                        chunk.chunk_index
                    );
                    println!("    \"{}\"", excerpt(&chunk.text));
                }
            }
            pool.close().await;
        }
    }

    Ok(())
}

/// Single-line preview of a passage for terminal output.
fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= 160 {
        flat
    } else {
        let cut: String = flat.chars().take(160).collect();
        format!("{}...", cut)
    }
}
