//! Synchronous entry points over the async pipeline.
//!
//! [`BlockingPipeline`] owns a tokio runtime and `block_on`s the same
//! futures the async API returns, so both call modes produce identical
//! results. Do not call it from inside another tokio runtime.

use std::sync::Arc;

use anyhow::Result;
use context_embed_core::models::{BatchOutcome, EmbeddingRequest, EmbeddingResult, SearchHit, SearchQuery};
use context_embed_core::PipelineError;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::batch::BatchOrchestrator;
use crate::config::Config;
use crate::credentials::{CredentialResolver, LayeredCredentials};
use crate::embedding::EmbeddingClient;
use crate::enrich::{Enricher, Enrichment};
use crate::search::VectorSearchService;
use crate::sqlite_store::SqliteVectorStore;

pub struct BlockingPipeline {
    runtime: Runtime,
    orchestrator: Arc<BatchOrchestrator>,
    search: Arc<VectorSearchService>,
}

impl BlockingPipeline {
    pub fn new(orchestrator: Arc<BatchOrchestrator>, search: Arc<VectorSearchService>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            orchestrator,
            search,
        })
    }

    /// Wire the whole pipeline from configuration, backed by the SQLite store.
    pub fn from_config(config: &Config) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        let resolver: Arc<dyn CredentialResolver> =
            Arc::new(LayeredCredentials::from_config(config));
        let client = Arc::new(EmbeddingClient::from_config(&config.embedding, resolver.clone())?);
        let enricher = Arc::new(Enricher::from_config(
            &config.enrichment,
            &config.embedding,
            resolver.as_ref(),
        )?);
        let store = Arc::new(runtime.block_on(SqliteVectorStore::open(config))?);

        let orchestrator = Arc::new(
            BatchOrchestrator::new(client.clone(), config.embedding.batch_size)
                .with_enricher(enricher),
        );
        let search = Arc::new(
            VectorSearchService::new(client, store)
                .with_candidate_multiplier(config.retrieval.candidate_multiplier)
                .with_default_threshold(config.retrieval.similarity_threshold),
        );

        Ok(Self {
            runtime,
            orchestrator,
            search,
        })
    }

    pub fn embed_one(&self, text: &str) -> EmbeddingResult {
        self.runtime
            .block_on(self.orchestrator.client().embed_one(text))
    }

    pub fn embed_batch(&self, texts: &[String]) -> BatchOutcome {
        self.runtime
            .block_on(self.orchestrator.embed_all(texts, &CancellationToken::new()))
    }

    /// Like [`embed_batch`](Self::embed_batch), observing `cancel`.
    pub fn embed_batch_cancellable(&self, texts: &[String], cancel: &CancellationToken) -> BatchOutcome {
        self.runtime.block_on(self.orchestrator.embed_all(texts, cancel))
    }

    pub fn embed_requests(&self, requests: &[EmbeddingRequest]) -> (Vec<Enrichment>, BatchOutcome) {
        self.runtime.block_on(
            self.orchestrator
                .embed_requests(requests, &CancellationToken::new()),
        )
    }

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>, PipelineError> {
        self.runtime.block_on(self.search.search(query))
    }
}
