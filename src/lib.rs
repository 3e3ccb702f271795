//! # context-embed
//!
//! Embedding generation and vector retrieval for document chunks and code
//! examples.
//!
//! Text goes through contextual enrichment, is embedded in provider-sized
//! batches under a process-wide concurrency ceiling, and lands in a vector
//! store. Queries are embedded the same way and ranked by cosine similarity.
//!
//! ## Architecture
//!
//! ```text
//! chunks ──▶ Enricher ──▶ BatchOrchestrator ──▶ EmbeddingClient ──▶ provider
//!                                   │
//!                                   ▼
//!                              VectorStore (SQLite / in-memory)
//!                                   ▲
//! query ──▶ EmbeddingClient ──▶ VectorSearchService ──▶ ranked hits
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`credentials`] | Credential resolution and provider settings cache |
//! | [`embedding`] | Provider backends, retry policy, embedding client |
//! | [`enrich`] | Contextual enrichment of chunks |
//! | [`batch`] | Order-preserving concurrent batch orchestration |
//! | [`search`] | Vector search service |
//! | [`ingest`] | Replace-enrich-embed-store ingestion pipeline |
//! | [`sqlite_store`] | SQLite [`VectorStore`](store::VectorStore) |
//! | [`blocking`] | Synchronous facade |
//! | [`progress`] | Ingest progress reporting |
//! | [`db`] / [`migrate`] | Database connection and schema |
//!
//! Data types, the error taxonomy, and the store trait come from
//! `context-embed-core` and are re-exported here.

pub mod batch;
pub mod blocking;
pub mod config;
pub mod corpora;
pub mod credentials;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod enrich;
pub mod ingest;
pub mod migrate;
pub mod progress;
pub mod search;
pub mod sqlite_store;

pub use context_embed_core::{models, store};
pub use context_embed_core::{ErrorKind, PipelineError, ProviderError, ProviderErrorKind};
