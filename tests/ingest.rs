//! Ingestion into the in-memory and SQLite stores, plus the blocking facade.

mod common;

use std::sync::Arc;

use common::{client, texts, ScriptedBackend};
use context_embed::batch::BatchOrchestrator;
use context_embed::blocking::BlockingPipeline;
use context_embed::enrich::{Enricher, WindowContext};
use context_embed::ingest::{item_id, IngestItem, Ingestor};
use context_embed::models::{Corpus, SearchQuery, VectorRecord};
use context_embed::search::VectorSearchService;
use context_embed::sqlite_store::SqliteVectorStore;
use context_embed::store::memory::InMemoryStore;
use context_embed::store::VectorStore;
use context_embed::{db, migrate, ErrorKind, PipelineError};
use tokio_util::sync::CancellationToken;

fn page(url: &str, chunks: &[&str]) -> Vec<IngestItem> {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let mut item = IngestItem::new(url, i as i64, *c);
            item.title = Some("Tokio tutorial".into());
            item
        })
        .collect()
}

fn orchestrator(backend: Arc<ScriptedBackend>) -> Arc<BatchOrchestrator> {
    Arc::new(
        BatchOrchestrator::new(client(backend, 2, 4), 4).with_enricher(Arc::new(Enricher::new(
            Arc::new(WindowContext { window_chars: 64 }),
            8_000,
            4,
        ))),
    )
}

#[tokio::test]
async fn ingest_stores_enriched_chunks_with_metadata() {
    let store = Arc::new(InMemoryStore::new());
    let ingestor = Ingestor::new(orchestrator(Arc::new(ScriptedBackend::new(8))), store.clone(), 2);
    let items = page(
        "https://tokio.rs/tokio/tutorial",
        &["spawning tasks", "shared state", "channels"],
    );

    let report = ingestor
        .ingest(Corpus::Documents, &items, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.stored, 3);
    assert_eq!(report.enriched, 3);
    assert_eq!(report.failed(), 0);
    assert_eq!(store.count(Corpus::Documents).await.unwrap(), 3);
    assert_eq!(store.corpus_dimension(Corpus::Documents).await.unwrap(), Some(8));

    let hits = store
        .similarity_query(Corpus::Documents, &common::derived_vector("x", 8), 10, None)
        .await
        .unwrap();
    let middle = hits
        .iter()
        .find(|h| h.item_id == item_id(Corpus::Documents, "https://tokio.rs/tokio/tutorial", 1))
        .unwrap();
    assert_eq!(middle.metadata["source_id"], "tokio.rs");
    assert_eq!(middle.metadata["chunk_number"], 1);
    assert_eq!(middle.metadata["contextual_embedding"], true);
    assert_eq!(middle.metadata["embedding_model"], "scripted-embedding");
    assert!(middle.content.contains("Preceding: ...spawning tasks"));
    assert!(middle.content.ends_with("shared state"));
}

#[tokio::test]
async fn reingest_replaces_previous_chunks() {
    let store = Arc::new(InMemoryStore::new());
    let ingestor = Ingestor::new(orchestrator(Arc::new(ScriptedBackend::new(8))), store.clone(), 8);
    let url = "https://example.com/page";

    ingestor
        .ingest(Corpus::Documents, &page(url, &["a", "b", "c", "d"]), &CancellationToken::new())
        .await
        .unwrap();
    let report = ingestor
        .ingest(Corpus::Documents, &page(url, &["a2", "b2"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.replaced, 4);
    assert_eq!(store.count(Corpus::Documents).await.unwrap(), 2);
}

#[tokio::test]
async fn failed_chunks_are_reported_not_stored() {
    let store = Arc::new(InMemoryStore::new());
    // No enricher: chunk text is embedded verbatim.
    let orchestrator = Arc::new(BatchOrchestrator::new(
        client(Arc::new(ScriptedBackend::new(8).poison("bad")), 2, 4),
        4,
    ));
    let ingestor = Ingestor::new(orchestrator, store.clone(), 4);
    let items = page("https://example.com/a", &["good", "", "bad", "fine"]);

    let report = ingestor
        .ingest(Corpus::CodeExamples, &items, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stored, 2);
    assert_eq!(report.failed(), 2);
    assert_eq!(report.failures[0].chunk_number, 1);
    assert_eq!(report.failures[0].kind, Some(ErrorKind::EmptyInput));
    assert_eq!(report.failures[1].chunk_number, 2);
    assert_eq!(report.failures[1].kind, Some(ErrorKind::Provider));
    assert_eq!(store.count(Corpus::CodeExamples).await.unwrap(), 2);
    assert_eq!(store.count(Corpus::Documents).await.unwrap(), 0);
}

#[tokio::test]
async fn ingest_refuses_corpus_of_other_dimension() {
    let store = Arc::new(InMemoryStore::new());
    store
        .set_corpus_dimension(Corpus::Documents, 768, "old-model")
        .await
        .unwrap();
    let ingestor = Ingestor::new(orchestrator(Arc::new(ScriptedBackend::new(1536))), store.clone(), 4);

    let err = ingestor
        .ingest(Corpus::Documents, &page("https://a", &["x"]), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::DimensionMismatch {
            stored: 768,
            configured: 1536,
            ..
        }
    ));
    assert_eq!(store.count(Corpus::Documents).await.unwrap(), 0);
}

#[tokio::test]
async fn ingest_into_closed_store_is_corpus_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = db::connect_path(&tmp.path().join("closed.sqlite")).await.unwrap();
    migrate::ensure_schema(&pool).await.unwrap();
    let store = Arc::new(SqliteVectorStore::new(pool));
    store.close().await;

    let backend = Arc::new(ScriptedBackend::new(8));
    let ingestor = Ingestor::new(orchestrator(backend.clone()), store, 4);
    let err = ingestor
        .ingest(Corpus::Documents, &page("https://a", &["x"]), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::CorpusUnavailable(_)), "{err:?}");
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn sqlite_store_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = db::connect_path(&tmp.path().join("data").join("vectors.sqlite"))
        .await
        .unwrap();
    migrate::ensure_schema(&pool).await.unwrap();
    let store = Arc::new(SqliteVectorStore::new(pool));

    let backend = Arc::new(ScriptedBackend::new(8));
    let ingestor = Ingestor::new(orchestrator(backend.clone()), store.clone(), 4);
    let items = page("https://docs.rs/sqlx", &["pools", "queries", "migrations"]);
    ingestor
        .ingest(Corpus::Documents, &items, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(store.count(Corpus::Documents).await.unwrap(), 3);
    let stray = VectorRecord {
        item_id: "stray".into(),
        vector: vec![1.0; 3],
        metadata: Default::default(),
        content: "stray".into(),
    };
    assert!(store.upsert(Corpus::Documents, &stray).await.is_err());
    assert_eq!(store.count(Corpus::Documents).await.unwrap(), 3);

    let summaries = store.summaries().await.unwrap();
    let docs = summaries.iter().find(|s| s.corpus == Corpus::Documents).unwrap();
    assert_eq!(docs.dims, Some(8));
    assert_eq!(docs.model.as_deref(), Some("scripted-embedding"));
    let code = summaries.iter().find(|s| s.corpus == Corpus::CodeExamples).unwrap();
    assert_eq!(code.dims, None);
    assert_eq!(code.count, 0);

    // Querying with a stored chunk's own text ranks that chunk first.
    let stored_text = store
        .similarity_query(Corpus::Documents, &common::derived_vector("q", 8), 10, None)
        .await
        .unwrap()
        .into_iter()
        .find(|h| h.item_id == item_id(Corpus::Documents, "https://docs.rs/sqlx", 2))
        .unwrap()
        .content;
    let service = VectorSearchService::new(client(backend, 2, 4), store.clone());
    let hits = service
        .search(&SearchQuery::new(stored_text, Corpus::Documents).top_k(2))
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].item_id, item_id(Corpus::Documents, "https://docs.rs/sqlx", 2));
    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert!(hits[0].score >= hits[1].score);

    let deleted = store
        .delete_by_url(Corpus::Documents, &texts(&["https://docs.rs/sqlx"]))
        .await
        .unwrap();
    assert_eq!(deleted, 3);
    assert_eq!(store.count(Corpus::Documents).await.unwrap(), 0);
    store.close().await;
}

#[test]
fn blocking_facade_matches_async_results() {
    let backend = Arc::new(ScriptedBackend::new(8));
    let orchestrator = Arc::new(BatchOrchestrator::new(client(backend.clone(), 2, 4), 4));
    let search = Arc::new(VectorSearchService::new(
        client(backend, 2, 4),
        Arc::new(InMemoryStore::new()),
    ));
    let pipeline = BlockingPipeline::new(orchestrator.clone(), search).unwrap();

    let inputs = texts(&["alpha", "", "beta", "alpha"]);
    let blocking = pipeline.embed_batch(&inputs);

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let asynchronous =
        runtime.block_on(orchestrator.embed_all(&inputs, &CancellationToken::new()));
    assert_eq!(blocking, asynchronous);

    let one = pipeline.embed_one("alpha");
    assert_eq!(one, blocking.results()[0]);

    // Empty corpus: nothing stored yet, so no hits and no error.
    let hits = pipeline
        .search(&SearchQuery::new("alpha", Corpus::Documents))
        .unwrap();
    assert!(hits.is_empty());
}
