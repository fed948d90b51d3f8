//! # ragdex
//!
//! A document ingestion and retrieval-augmented chat server.
//!
//! ragdex turns uploaded PDFs into a corpus of semantically embedded
//! passages and serves similarity-based retrieval as context for a chat
//! generation step.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────┐   ┌──────────┐
//! │  Upload   │──▶│  Pipeline                 │──▶│  SQLite   │
//! │  (PDF)    │   │ Extract → Chunk → Embed   │   │ docs+vecs │
//! └──────────┘   └────────────┬──────────────┘   └────┬─────┘
//!                              │ progress              │
//!                        ┌─────▼─────┐           ┌─────▼─────┐
//!                        │ JobTracker │           │ Retriever │──▶ chat
//!                        │  (polled)  │           │  (cosine) │
//!                        └───────────┘           └───────────┘
//! ```
//!
//! Embedding runs through a bounded-concurrency batch pool against a
//! pluggable provider (OpenAI or Ollama); callers poll ingestion progress
//! by job id while the upload request is in flight.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF text extraction (page-delimited) |
//! | [`chunk`] | Overlapping passage chunkers |
//! | [`embedding`] | Embedding providers and vector math |
//! | [`batch`] | Bounded-concurrency embedding batcher |
//! | [`jobs`] | Pollable ingestion job tracker |
//! | [`ingest`] | Ingestion pipeline orchestration |
//! | [`retrieve`] | Similarity retrieval and usage log |
//! | [`generate`] | Chat generation providers |
//! | [`server`] | HTTP API server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod batch;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod ingest;
pub mod jobs;
pub mod migrate;
pub mod models;
pub mod retrieve;
pub mod server;
