//! Ingestion pipeline: chunks in, vectors stored.
//!
//! For one corpus:
//!
//! 1. Check the corpus's stored dimension against the embedding config, and
//!    record it on first write.
//! 2. Delete existing records for every incoming URL, so re-ingesting a
//!    page replaces it.
//! 3. In batches: enrich each chunk with its neighbours, embed through the
//!    [`BatchOrchestrator`], and upsert every successful vector.
//!
//! Failed items are counted and reported, never stored.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use context_embed_core::models::{ChunkContext, Corpus, EmbeddingRequest, Metadata, VectorRecord};
use context_embed_core::store::VectorStore;
use context_embed_core::{ErrorKind, PipelineError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::batch::BatchOrchestrator;
use crate::config::Config;
use crate::credentials::{CredentialResolver, LayeredCredentials};
use crate::embedding::EmbeddingClient;
use crate::enrich::Enricher;
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress, ProgressMode};
use crate::sqlite_store::SqliteVectorStore;

/// One chunk to ingest. Also the line format of `cembed ingest` JSONL files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestItem {
    pub url: String,
    pub chunk_number: i64,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub full_document: Option<String>,
}

impl IngestItem {
    pub fn new(url: impl Into<String>, chunk_number: i64, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            chunk_number,
            content: content.into(),
            metadata: Metadata::new(),
            title: None,
            full_document: None,
        }
    }

    /// `source_id` metadata if present, else the URL's host, else the URL.
    pub fn source_id(&self) -> String {
        if let Some(id) = self.metadata.get("source_id").and_then(|v| v.as_str()) {
            return id.to_string();
        }
        reqwest::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| self.url.clone())
    }
}

/// Stable record id: same corpus, URL, and chunk number → same id.
pub fn item_id(corpus: Corpus, url: &str, chunk_number: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(corpus.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(url.as_bytes());
    hasher.update(b"\0");
    hasher.update(chunk_number.to_le_bytes());
    format!("{:x}", hasher.finalize())[..32].to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub url: String,
    pub chunk_number: i64,
    pub kind: Option<ErrorKind>,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub corpus: Corpus,
    pub total: usize,
    pub stored: usize,
    pub enriched: usize,
    pub replaced: u64,
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    fn new(corpus: Corpus, total: usize) -> Self {
        Self {
            corpus,
            total,
            stored: 0,
            enriched: 0,
            replaced: 0,
            failures: Vec::new(),
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

pub struct Ingestor {
    orchestrator: Arc<BatchOrchestrator>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
    progress: Box<dyn IngestProgressReporter>,
}

impl Ingestor {
    pub fn new(orchestrator: Arc<BatchOrchestrator>, store: Arc<dyn VectorStore>, batch_size: usize) -> Self {
        Self {
            orchestrator,
            store,
            batch_size: batch_size.max(1),
            progress: Box::new(NoProgress),
        }
    }

    pub fn with_progress(mut self, progress: Box<dyn IngestProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub async fn ingest(
        &self,
        corpus: Corpus,
        items: &[IngestItem],
        cancel: &CancellationToken,
    ) -> Result<IngestReport, PipelineError> {
        let mut report = IngestReport::new(corpus, items.len());
        if items.is_empty() {
            return Ok(report);
        }

        let client = self.orchestrator.client();
        let dims = client.dims();
        let unavailable = |e: anyhow::Error| PipelineError::CorpusUnavailable(format!("{:#}", e));

        match self.store.corpus_dimension(corpus).await.map_err(unavailable)? {
            Some(stored) if stored != dims => {
                return Err(PipelineError::DimensionMismatch {
                    corpus,
                    stored,
                    configured: dims,
                });
            }
            Some(_) => {}
            None => self
                .store
                .set_corpus_dimension(corpus, dims, client.model_name())
                .await
                .map_err(unavailable)?,
        }

        let urls: Vec<String> = items
            .iter()
            .map(|i| i.url.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        report.replaced = self
            .store
            .delete_by_url(corpus, &urls)
            .await
            .map_err(unavailable)?;
        self.progress.report(IngestProgressEvent::Replacing {
            corpus,
            deleted: report.replaced,
        });

        let requests = build_requests(items);
        let batches = items.len().div_ceil(self.batch_size);
        let mut processed = 0u64;

        for (batch_idx, (batch_items, batch_requests)) in items
            .chunks(self.batch_size)
            .zip(requests.chunks(self.batch_size))
            .enumerate()
        {
            let (enrichments, outcome) = self
                .orchestrator
                .embed_requests(batch_requests, cancel)
                .await;

            for ((item, enrichment), result) in batch_items.iter().zip(&enrichments).zip(outcome) {
                if !result.success {
                    tracing::warn!(
                        url = %item.url,
                        chunk = item.chunk_number,
                        reason = result.error_reason.as_deref().unwrap_or("unknown"),
                        "chunk not embedded"
                    );
                    report.failures.push(IngestFailure {
                        url: item.url.clone(),
                        chunk_number: item.chunk_number,
                        kind: result.error_kind,
                        reason: result.error_reason.unwrap_or_default(),
                    });
                    continue;
                }

                let text = enrichment.text();
                let mut metadata = item.metadata.clone();
                metadata.insert("url".into(), item.url.clone().into());
                metadata.insert("chunk_number".into(), item.chunk_number.into());
                metadata.insert("source_id".into(), item.source_id().into());
                metadata.insert("chunk_size".into(), text.chars().count().into());
                metadata.insert("contextual_embedding".into(), enrichment.is_enriched().into());
                metadata.insert("embedding_model".into(), client.model_name().into());

                let record = VectorRecord {
                    item_id: item_id(corpus, &item.url, item.chunk_number),
                    vector: result.vector,
                    metadata,
                    content: text.to_string(),
                };
                self.store
                    .upsert(corpus, &record)
                    .await
                    .map_err(unavailable)?;

                report.stored += 1;
                if enrichment.is_enriched() {
                    report.enriched += 1;
                }
            }

            processed += batch_items.len() as u64;
            self.progress.report(IngestProgressEvent::Batch {
                corpus,
                batch: batch_idx + 1,
                batches,
                n: processed,
                total: items.len() as u64,
            });
        }

        tracing::info!(
            corpus = %corpus,
            total = report.total,
            stored = report.stored,
            enriched = report.enriched,
            failed = report.failed(),
            "ingest complete"
        );
        Ok(report)
    }
}

/// Requests in item order, each carrying its neighbours within the same URL.
fn build_requests(items: &[IngestItem]) -> Vec<EmbeddingRequest> {
    let by_position: HashMap<(&str, i64), &str> = items
        .iter()
        .map(|i| ((i.url.as_str(), i.chunk_number), i.content.as_str()))
        .collect();

    items
        .iter()
        .map(|item| {
            let neighbour = |offset: i64| {
                by_position
                    .get(&(item.url.as_str(), item.chunk_number + offset))
                    .map(|s| s.to_string())
            };
            let title = item.title.clone().or_else(|| {
                item.metadata
                    .get("title")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            });
            EmbeddingRequest::with_context(
                item.content.clone(),
                ChunkContext {
                    source_document_id: Some(item.url.clone()),
                    title,
                    full_document: item.full_document.clone(),
                    preceding: neighbour(-1),
                    following: neighbour(1),
                },
            )
        })
        .collect()
}

/// Read a JSONL file of [`IngestItem`]s. Blank lines are skipped.
pub fn read_jsonl(path: &Path) -> Result<Vec<IngestItem>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ingest file: {}", path.display()))?;

    let mut items = Vec::new();
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let item: IngestItem = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid ingest item", path.display(), n + 1))?;
        items.push(item);
    }
    Ok(items)
}

pub async fn run_ingest(
    config: &Config,
    path: &Path,
    corpus: Corpus,
    progress: ProgressMode,
    json: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Ingest requires embeddings. Set [embedding] provider in config.");
    }

    let items = read_jsonl(path)?;
    let resolver: Arc<dyn CredentialResolver> = Arc::new(LayeredCredentials::from_config(config));
    let client = Arc::new(EmbeddingClient::from_config(&config.embedding, resolver.clone())?);
    let enricher = Arc::new(Enricher::from_config(
        &config.enrichment,
        &config.embedding,
        resolver.as_ref(),
    )?);
    let orchestrator = Arc::new(
        BatchOrchestrator::new(client, config.embedding.batch_size).with_enricher(enricher),
    );
    let store = Arc::new(SqliteVectorStore::open(config).await?);

    // Several provider batches per progress step, so the limiter has work to overlap.
    let step = config.embedding.batch_size * config.embedding.max_concurrency;
    let ingestor = Ingestor::new(orchestrator, store.clone(), step).with_progress(progress.reporter());

    let report = ingestor
        .ingest(corpus, &items, &CancellationToken::new())
        .await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("ingest {}", corpus);
    println!("  items: {}", report.total);
    println!("  replaced: {}", report.replaced);
    println!("  stored: {}", report.stored);
    println!("  enriched: {}", report.enriched);
    println!("  failed: {}", report.failed());
    for failure in report.failures.iter().take(10) {
        println!(
            "    {}#{}: {}",
            failure.url, failure.chunk_number, failure.reason
        );
    }
    if report.failed() > 10 {
        println!("    ... and {} more", report.failed() - 10);
    }
    Ok(())
}
