//! SQLite-backed [`VectorStore`] implementation.
//!
//! Vectors are stored as little-endian `f32` BLOBs, one table per corpus.
//! Similarity is brute-force cosine over the corpus, with the metadata
//! filter applied in Rust after decoding `metadata_json`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use context_embed_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use context_embed_core::models::{Corpus, Metadata, MetadataFilter, ScoredItem, VectorRecord};
use context_embed_core::search::matches_filter;
use context_embed_core::store::VectorStore;

use crate::config::Config;
use crate::db;
use crate::migrate::{ensure_schema, table_name};

/// Per-corpus summary for listings.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CorpusSummary {
    pub corpus: Corpus,
    pub dims: Option<usize>,
    pub model: Option<String>,
    pub count: u64,
    /// Unix timestamp of the last dimension/model update.
    pub updated_at: Option<i64>,
}

pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        ensure_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn summaries(&self) -> Result<Vec<CorpusSummary>> {
        let mut out = Vec::with_capacity(Corpus::ALL.len());
        for corpus in Corpus::ALL {
            let meta =
                sqlx::query("SELECT dims, model, updated_at FROM corpus_meta WHERE corpus = ?")
                    .bind(corpus.as_str())
                    .fetch_optional(&self.pool)
                    .await?;
            let (dims, model, updated_at) = match meta {
                Some(row) => {
                    let dims: i64 = row.get("dims");
                    (
                        Some(dims as usize),
                        Some(row.get::<String, _>("model")),
                        Some(row.get::<i64, _>("updated_at")),
                    )
                }
                None => (None, None, None),
            };
            out.push(CorpusSummary {
                corpus,
                dims,
                model,
                count: self.count(corpus).await?,
                updated_at,
            });
        }
        Ok(out)
    }
}

fn parse_metadata(json: &str) -> Metadata {
    serde_json::from_str(json).unwrap_or_default()
}

fn metadata_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata.get(key).and_then(|v| v.as_str())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn corpus_dimension(&self, corpus: Corpus) -> Result<Option<usize>> {
        let dims: Option<i64> = sqlx::query_scalar("SELECT dims FROM corpus_meta WHERE corpus = ?")
            .bind(corpus.as_str())
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read dimension of corpus {}", corpus))?;
        Ok(dims.map(|d| d as usize))
    }

    async fn set_corpus_dimension(&self, corpus: Corpus, dims: usize, model: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO corpus_meta (corpus, dims, model, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(corpus) DO UPDATE SET
                dims = excluded.dims,
                model = excluded.model,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(corpus.as_str())
        .bind(dims as i64)
        .bind(model)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn similarity_query(
        &self,
        corpus: Corpus,
        query_vec: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredItem>> {
        let rows = sqlx::query(&format!(
            "SELECT item_id, content, metadata_json, embedding FROM {}",
            table_name(corpus)
        ))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to read corpus {}", corpus))?;

        let mut candidates: Vec<ScoredItem> = rows
            .iter()
            .filter_map(|row| {
                let metadata_json: String = row.get("metadata_json");
                let metadata = parse_metadata(&metadata_json);
                if let Some(f) = filter {
                    if !matches_filter(&metadata, f) {
                        return None;
                    }
                }
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                Some(ScoredItem {
                    item_id: row.get("item_id"),
                    score: cosine_similarity(query_vec, &vec),
                    metadata,
                    content: row.get("content"),
                })
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        candidates.truncate(limit);
        Ok(candidates)
    }

    async fn upsert(&self, corpus: Corpus, record: &VectorRecord) -> Result<()> {
        let recorded = self.corpus_dimension(corpus).await?;
        if let Some(dims) = recorded {
            if dims != record.vector.len() {
                bail!(
                    "vector for {} has {} dims, corpus {} stores {}",
                    record.item_id,
                    record.vector.len(),
                    corpus.as_str(),
                    dims
                );
            }
        }

        let now = chrono::Utc::now().timestamp();
        let blob = vec_to_blob(&record.vector);
        let metadata_json = serde_json::to_string(&record.metadata)?;

        sqlx::query(&format!(
            r#"
            INSERT INTO {} (item_id, url, source_id, content, metadata_json, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(item_id) DO UPDATE SET
                url = excluded.url,
                source_id = excluded.source_id,
                content = excluded.content,
                metadata_json = excluded.metadata_json,
                embedding = excluded.embedding
            "#,
            table_name(corpus)
        ))
        .bind(&record.item_id)
        .bind(metadata_str(&record.metadata, "url"))
        .bind(metadata_str(&record.metadata, "source_id"))
        .bind(&record.content)
        .bind(&metadata_json)
        .bind(&blob)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if recorded.is_none() {
            let model = metadata_str(&record.metadata, "embedding_model").unwrap_or("unknown");
            self.set_corpus_dimension(corpus, record.vector.len(), model)
                .await?;
        }
        Ok(())
    }

    async fn delete_by_url(&self, corpus: Corpus, urls: &[String]) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE url = ?", table_name(corpus));
        let mut tx = self.pool.begin().await?;
        let mut deleted = 0u64;
        for url in urls {
            deleted += sqlx::query(&sql)
                .bind(url)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(deleted)
    }

    async fn count(&self, corpus: Corpus) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table_name(corpus)))
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}
