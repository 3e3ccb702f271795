//! In-memory [`VectorStore`] implementation for testing and embedding in
//! other processes.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Similarity search is brute-force cosine similarity over all stored
//! vectors of a corpus.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Corpus, MetadataFilter, ScoredItem, VectorRecord};
use crate::search::matches_filter;

use super::VectorStore;

struct CorpusInfo {
    dims: usize,
    _model: String,
}

/// In-memory store keyed by corpus.
pub struct InMemoryStore {
    records: RwLock<HashMap<Corpus, Vec<VectorRecord>>>,
    corpora: RwLock<HashMap<Corpus, CorpusInfo>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            corpora: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn corpus_dimension(&self, corpus: Corpus) -> Result<Option<usize>> {
        let corpora = self.corpora.read().map_err(poisoned)?;
        Ok(corpora.get(&corpus).map(|c| c.dims))
    }

    async fn set_corpus_dimension(&self, corpus: Corpus, dims: usize, model: &str) -> Result<()> {
        let mut corpora = self.corpora.write().map_err(poisoned)?;
        corpora.insert(
            corpus,
            CorpusInfo {
                dims,
                _model: model.to_string(),
            },
        );
        Ok(())
    }

    async fn similarity_query(
        &self,
        corpus: Corpus,
        query_vec: &[f32],
        limit: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ScoredItem>> {
        let records = self.records.read().map_err(poisoned)?;
        let Some(items) = records.get(&corpus) else {
            return Ok(Vec::new());
        };

        let mut candidates: Vec<ScoredItem> = items
            .iter()
            .filter(|r| filter.map_or(true, |f| matches_filter(&r.metadata, f)))
            .map(|r| ScoredItem {
                item_id: r.item_id.clone(),
                score: cosine_similarity(query_vec, &r.vector),
                metadata: r.metadata.clone(),
                content: r.content.clone(),
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
        {
            let mut corpora = self.corpora.write().map_err(poisoned)?;
            let info = corpora.entry(corpus).or_insert_with(|| CorpusInfo {
                dims: record.vector.len(),
                _model: String::new(),
            });
            if info.dims != record.vector.len() {
                bail!(
                    "vector for {} has {} dims, corpus {} stores {}",
                    record.item_id,
                    record.vector.len(),
                    corpus.as_str(),
                    info.dims
                );
            }
        }
        let mut records = self.records.write().map_err(poisoned)?;
        let items = records.entry(corpus).or_default();
        items.retain(|r| r.item_id != record.item_id);
        items.push(record.clone());
        Ok(())
    }

    async fn delete_by_url(&self, corpus: Corpus, urls: &[String]) -> Result<u64> {
        let mut records = self.records.write().map_err(poisoned)?;
        let Some(items) = records.get_mut(&corpus) else {
            return Ok(0);
        };
        let before = items.len();
        items.retain(|r| {
            !r.metadata
                .get("url")
                .and_then(|v| v.as_str())
                .is_some_and(|u| urls.iter().any(|x| x == u))
        });
        Ok((before - items.len()) as u64)
    }

    async fn count(&self, corpus: Corpus) -> Result<u64> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records.get(&corpus).map_or(0, |v| v.len() as u64))
    }
}
