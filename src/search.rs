//! Vector search service and the `cembed search` command.
//!
//! [`VectorSearchService`] embeds the query text through the
//! [`EmbeddingClient`] and hands the vector to the core ranking algorithm
//! (`context_embed_core::search`), which checks dimensions, filters,
//! thresholds, and orders the hits.

use std::sync::Arc;

use anyhow::{bail, Result};
use context_embed_core::models::{Corpus, MetadataFilter, SearchHit, SearchQuery};
use context_embed_core::search::{search, SearchRequest};
use context_embed_core::store::VectorStore;
use context_embed_core::PipelineError;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::credentials::LayeredCredentials;
use crate::embedding::EmbeddingClient;
use crate::sqlite_store::SqliteVectorStore;

pub struct VectorSearchService {
    client: Arc<EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    candidate_multiplier: usize,
    default_threshold: f32,
}

impl VectorSearchService {
    pub fn new(client: Arc<EmbeddingClient>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            client,
            store,
            candidate_multiplier: 2,
            default_threshold: 0.0,
        }
    }

    /// Over-fetch factor applied to `top_k` when querying the store.
    pub fn with_candidate_multiplier(mut self, multiplier: usize) -> Self {
        self.candidate_multiplier = multiplier.max(1);
        self
    }

    /// Threshold used by [`search_documents`](Self::search_documents) and
    /// [`search_code_examples`](Self::search_code_examples).
    pub fn with_default_threshold(mut self, threshold: f32) -> Self {
        self.default_threshold = threshold;
        self
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, PipelineError> {
        self.search_cancellable(query, &CancellationToken::new())
            .await
    }

    pub async fn search_cancellable(
        &self,
        query: &SearchQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        query.validate()?;
        let query_vec = self.client.embed_vector(&query.query_text, cancel).await?;

        let hits = search(
            self.store.as_ref(),
            &SearchRequest {
                query,
                query_vec: &query_vec,
                configured_dims: self.client.dims(),
                candidate_multiplier: self.candidate_multiplier,
            },
        )
        .await?;

        tracing::debug!(
            corpus = %query.corpus,
            top_k = query.top_k,
            hits = hits.len(),
            "search complete"
        );
        Ok(hits)
    }

    pub async fn search_documents(
        &self,
        query_text: &str,
        top_k: usize,
        filter: Option<MetadataFilter>,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        self.search_corpus(Corpus::Documents, query_text, top_k, filter)
            .await
    }

    pub async fn search_code_examples(
        &self,
        query_text: &str,
        top_k: usize,
        filter: Option<MetadataFilter>,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        self.search_corpus(Corpus::CodeExamples, query_text, top_k, filter)
            .await
    }

    async fn search_corpus(
        &self,
        corpus: Corpus,
        query_text: &str,
        top_k: usize,
        filter: Option<MetadataFilter>,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        let mut query = SearchQuery::new(query_text, corpus)
            .top_k(top_k)
            .threshold(self.default_threshold);
        query.metadata_filter = filter;
        self.search(&query).await
    }
}

/// Parse `key=value` filter arguments. Values that parse as JSON (numbers,
/// booleans, quoted strings) keep their type; anything else is a string.
pub fn parse_filters(args: &[String]) -> Result<Option<MetadataFilter>> {
    if args.is_empty() {
        return Ok(None);
    }
    let mut filter = MetadataFilter::new();
    for arg in args {
        let Some((key, value)) = arg.split_once('=') else {
            bail!("Invalid filter '{}'. Use key=value.", arg);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Invalid filter '{}': empty key", arg);
        }
        let value = serde_json::from_str(value.trim())
            .unwrap_or_else(|_| serde_json::Value::String(value.trim().to_string()));
        filter.insert(key.to_string(), value);
    }
    Ok(Some(filter))
}

pub async fn run_search(
    config: &Config,
    query_text: &str,
    corpus: Corpus,
    top_k: Option<usize>,
    threshold: Option<f32>,
    filters: &[String],
    json: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let resolver = Arc::new(LayeredCredentials::from_config(config));
    let client = Arc::new(EmbeddingClient::from_config(&config.embedding, resolver)?);
    let store = Arc::new(SqliteVectorStore::open(config).await?);
    let service = VectorSearchService::new(client, store.clone())
        .with_candidate_multiplier(config.retrieval.candidate_multiplier);

    let mut query = SearchQuery::new(query_text, corpus)
        .top_k(top_k.unwrap_or(config.retrieval.top_k))
        .threshold(threshold.unwrap_or(config.retrieval.similarity_threshold));
    query.metadata_filter = parse_filters(filters)?;

    let hits = service.search(&query).await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&hits)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let url = hit
            .metadata
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or("(no url)");
        println!("{}. [{:.3}] {}", i + 1, hit.score, url);
        if let Some(source) = hit.metadata.get("source_id").and_then(|v| v.as_str()) {
            println!("    source: {}", source);
        }
        println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " ").trim());
        println!("    id: {}", hit.item_id);
        println!();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_keep_json_types() {
        let filter = parse_filters(&[
            "source_id=docs.rs".to_string(),
            "chunk_number=3".to_string(),
            "contextual_embedding=true".to_string(),
        ])
        .unwrap()
        .unwrap();
        assert_eq!(filter["source_id"], json!("docs.rs"));
        assert_eq!(filter["chunk_number"], json!(3));
        assert_eq!(filter["contextual_embedding"], json!(true));
    }

    #[test]
    fn filters_reject_missing_equals() {
        assert!(parse_filters(&["source".to_string()]).is_err());
        assert!(parse_filters(&[]).unwrap().is_none());
    }
}
