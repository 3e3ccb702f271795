//! Similarity search over a [`VectorStore`].
//!
//! The core search algorithm operates entirely through the [`VectorStore`]
//! trait, with no network or configuration dependencies. The calling
//! application embeds the query text and passes the vector plus the
//! dimension its embedding configuration produces.
//!
//! # Algorithm
//!
//! 1. Reject empty query text and invalid `top_k` / threshold.
//! 2. Compare the corpus's stored dimension with the configured one.
//! 3. Fetch `top_k × candidate_multiplier` candidates, filtered by metadata.
//! 4. Re-apply the metadata filter (exact match), drop scores below the
//!    threshold.
//! 5. Sort by score (desc), item id (asc). Truncate to `top_k`.

use std::cmp::Ordering;

use crate::error::PipelineError;
use crate::models::{Metadata, MetadataFilter, ScoredItem, SearchHit, SearchQuery};
use crate::store::VectorStore;

/// Maximum characters of item content kept as the hit snippet.
pub const SNIPPET_CHARS: usize = 240;

/// Bundles all inputs for a single vector search.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a SearchQuery,
    /// Pre-computed embedding of `query.query_text`.
    pub query_vec: &'a [f32],
    /// Dimension produced by the current embedding configuration.
    pub configured_dims: usize,
    /// Over-fetch factor applied to `top_k` when querying the store.
    pub candidate_multiplier: usize,
}

/// Run a similarity search against a [`VectorStore`] backend.
pub async fn search<S: VectorStore + ?Sized>(
    store: &S,
    req: &SearchRequest<'_>,
) -> Result<Vec<SearchHit>, PipelineError> {
    let query = req.query;
    query.validate()?;

    if req.query_vec.len() != req.configured_dims {
        return Err(PipelineError::DimensionMismatch {
            corpus: query.corpus,
            stored: req.query_vec.len(),
            configured: req.configured_dims,
        });
    }

    let stored = store
        .corpus_dimension(query.corpus)
        .await
        .map_err(|e| PipelineError::CorpusUnavailable(format!("{:#}", e)))?;

    match stored {
        Some(stored) if stored != req.configured_dims => {
            return Err(PipelineError::DimensionMismatch {
                corpus: query.corpus,
                stored,
                configured: req.configured_dims,
            });
        }
        Some(_) => {}
        None => return Ok(Vec::new()),
    }

    let limit = query.top_k.saturating_mul(req.candidate_multiplier.max(1));
    let candidates = store
        .similarity_query(
            query.corpus,
            req.query_vec,
            limit,
            query.metadata_filter.as_ref(),
        )
        .await
        .map_err(|e| PipelineError::CorpusUnavailable(format!("{:#}", e)))?;

    Ok(rank(
        candidates,
        query.metadata_filter.as_ref(),
        query.similarity_threshold,
        query.top_k,
    ))
}

/// Filter, threshold, sort, and truncate candidates into hits.
///
/// The filter is applied before ranking so `top_k` always reflects the
/// filtered population.
pub fn rank(
    candidates: Vec<ScoredItem>,
    filter: Option<&MetadataFilter>,
    threshold: f32,
    top_k: usize,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .into_iter()
        .filter(|c| filter.map_or(true, |f| matches_filter(&c.metadata, f)))
        .filter(|c| c.score >= threshold)
        .map(|c| SearchHit {
            snippet: snippet(&c.content),
            item_id: c.item_id,
            score: c.score,
            metadata: c.metadata,
        })
        .collect();

    hits.sort_by(compare_hits);
    hits.truncate(top_k);
    hits
}

/// Score descending, then item id ascending.
pub fn compare_hits(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.item_id.cmp(&b.item_id))
}

/// True when every filter entry is present in `metadata` with an equal value.
pub fn matches_filter(metadata: &Metadata, filter: &MetadataFilter) -> bool {
    filter
        .iter()
        .all(|(key, want)| metadata.get(key).is_some_and(|have| have == want))
}

fn snippet(content: &str) -> String {
    content.chars().take(SNIPPET_CHARS).collect()
}
