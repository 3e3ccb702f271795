//! Vector storage abstraction for context-embed.
//!
//! The [`VectorStore`] trait is the contract between the pipeline and the
//! external vector store: a corpus-scoped similarity query plus the write
//! operations the ingestion pipeline needs. Index structure is the store's
//! business; the pipeline only relies on the query contract.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Corpus, MetadataFilter, ScoredItem, VectorRecord};

/// Abstract vector store backend.
///
/// Errors are plain `anyhow` errors; the search service maps any failure of
/// a read call to [`PipelineError::CorpusUnavailable`](crate::error::PipelineError::CorpusUnavailable).
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`corpus_dimension`](VectorStore::corpus_dimension) | Dimension of stored vectors, if any |
/// | [`set_corpus_dimension`](VectorStore::set_corpus_dimension) | Record the dimension and model for a corpus |
/// | [`similarity_query`](VectorStore::similarity_query) | Top-N cosine similarity over a corpus |
/// | [`upsert`](VectorStore::upsert) | Insert or replace one record |
/// | [`delete_by_url`](VectorStore::delete_by_url) | Drop every record ingested from the given URLs |
/// | [`count`](VectorStore::count) | Number of records in a corpus |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Dimension recorded for `corpus`, or `None` if nothing was written yet.
    async fn corpus_dimension(&self, corpus: Corpus) -> Result<Option<usize>>;

    /// Record the dimension and model that produced a corpus's vectors.
    async fn set_corpus_dimension(&self, corpus: Corpus, dims: usize, model: &str) -> Result<()>;

    /// Return up to `limit` items of `corpus` most similar to `query_vec`,
    /// sorted by score descending then item id ascending. When `filter` is
    /// present only items whose metadata matches every entry are considered.
    async fn similarity_query(
        &self,
        corpus: Corpus,
        query_vec: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredItem>>;

    /// Insert or replace a record keyed by `record.item_id`.
    async fn upsert(&self, corpus: Corpus, record: &VectorRecord) -> Result<()>;

    /// Delete all records whose `url` metadata matches one of `urls`.
    /// Returns the number of deleted records.
    async fn delete_by_url(&self, corpus: Corpus, urls: &[String]) -> Result<u64>;

    /// Number of records stored in `corpus`.
    async fn count(&self, corpus: Corpus) -> Result<u64>;
}
