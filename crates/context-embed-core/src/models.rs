//! Core data models used throughout context-embed.
//!
//! These types represent the embedding requests, per-item results, search
//! queries, and hits that flow through the ingestion and retrieval pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, PipelineError};

/// Item metadata as stored alongside a vector.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Exact-match predicate over [`Metadata`]: every key must be present with an
/// equal value.
pub type MetadataFilter = serde_json::Map<String, serde_json::Value>;

/// Surrounding context for a chunk, used by the enrichment stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkContext {
    /// Identifier of the document the chunk was cut from (URL, path, UUID).
    pub source_document_id: Option<String>,
    /// Document title or heading, if known.
    pub title: Option<String>,
    /// Full document text, used by LLM-generated context.
    pub full_document: Option<String>,
    /// Text of the chunk immediately before this one.
    pub preceding: Option<String>,
    /// Text of the chunk immediately after this one.
    pub following: Option<String>,
}

impl ChunkContext {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.full_document.is_none()
            && self.preceding.is_none()
            && self.following.is_none()
    }
}

/// A text to embed plus an optional context hint. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    text: String,
    context: Option<ChunkContext>,
}

impl EmbeddingRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: None,
        }
    }

    pub fn with_context(text: impl Into<String>, context: ChunkContext) -> Self {
        Self {
            text: text.into(),
            context: Some(context),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn context(&self) -> Option<&ChunkContext> {
        self.context.as_ref()
    }
}

/// Outcome of embedding one input text.
///
/// Successful results have `dimension == vector.len()` equal to the
/// configured output dimension. Failed results carry an empty vector,
/// `dimension == 0`, and both `error_kind` and `error_reason`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub vector: Vec<f32>,
    pub dimension: usize,
    pub source_text: String,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub error_reason: Option<String>,
}

impl EmbeddingResult {
    pub fn success(source_text: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            dimension: vector.len(),
            vector,
            source_text: source_text.into(),
            success: true,
            error_kind: None,
            error_reason: None,
        }
    }

    pub fn failure(
        source_text: impl Into<String>,
        kind: ErrorKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            vector: Vec::new(),
            dimension: 0,
            source_text: source_text.into(),
            success: false,
            error_kind: Some(kind),
            error_reason: Some(reason.into()),
        }
    }

    pub fn from_error(source_text: impl Into<String>, err: &PipelineError) -> Self {
        Self::failure(source_text, err.kind(), err.to_string())
    }

    pub fn cancelled(source_text: impl Into<String>) -> Self {
        Self::from_error(source_text, &PipelineError::Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_kind == Some(ErrorKind::Cancelled)
    }
}

/// Ordered per-item results for a batch: same length and order as the input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOutcome {
    results: Vec<EmbeddingResult>,
}

impl BatchOutcome {
    pub fn new(results: Vec<EmbeddingResult>) -> Self {
        Self { results }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn results(&self) -> &[EmbeddingResult] {
        &self.results
    }

    pub fn get(&self, index: usize) -> Option<&EmbeddingResult> {
        self.results.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EmbeddingResult> {
        self.results.iter()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn into_results(self) -> Vec<EmbeddingResult> {
        self.results
    }
}

impl IntoIterator for BatchOutcome {
    type Item = EmbeddingResult;
    type IntoIter = std::vec::IntoIter<EmbeddingResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a BatchOutcome {
    type Item = &'a EmbeddingResult;
    type IntoIter = std::slice::Iter<'a, EmbeddingResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

/// A named collection of embedded items sharing a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Corpus {
    /// Crawled or uploaded document chunks.
    Documents,
    /// Code fragments extracted from documents, with summaries.
    CodeExamples,
}

impl Corpus {
    pub const ALL: [Corpus; 2] = [Corpus::Documents, Corpus::CodeExamples];

    pub fn as_str(&self) -> &'static str {
        match self {
            Corpus::Documents => "documents",
            Corpus::CodeExamples => "code_examples",
        }
    }
}

impl fmt::Display for Corpus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Corpus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "documents" | "docs" => Ok(Corpus::Documents),
            "code_examples" | "code" => Ok(Corpus::CodeExamples),
            other => Err(format!(
                "unknown corpus '{}'. Use documents or code_examples.",
                other
            )),
        }
    }
}

/// A similarity search request against one corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query_text: String,
    pub corpus: Corpus,
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub metadata_filter: Option<MetadataFilter>,
}

impl SearchQuery {
    /// Query with `top_k = 5`, no threshold, and no filter.
    pub fn new(query_text: impl Into<String>, corpus: Corpus) -> Self {
        Self {
            query_text: query_text.into(),
            corpus,
            top_k: 5,
            similarity_threshold: 0.0,
            metadata_filter: None,
        }
    }

    pub fn top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata_filter
            .get_or_insert_with(MetadataFilter::new)
            .insert(key.into(), value.into());
        self
    }

    /// Check `top_k > 0`, the threshold range, and non-empty query text.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.query_text.trim().is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        if self.top_k == 0 {
            return Err(PipelineError::InvalidQuery("top_k must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(PipelineError::InvalidQuery(format!(
                "similarity_threshold must be in [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub item_id: String,
    pub score: f32,
    pub metadata: Metadata,
    pub snippet: String,
}

/// A vector and its payload as written to a corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub item_id: String,
    pub vector: Vec<f32>,
    pub metadata: Metadata,
    pub content: String,
}

/// A scored candidate returned by a store's similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredItem {
    pub item_id: String,
    pub score: f32,
    pub metadata: Metadata,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_result_has_no_vector() {
        let r = EmbeddingResult::from_error("", &PipelineError::EmptyInput);
        assert!(!r.success);
        assert!(r.vector.is_empty());
        assert_eq!(r.dimension, 0);
        assert_eq!(r.error_kind, Some(ErrorKind::EmptyInput));
        assert!(r.error_reason.is_some());
    }

    #[test]
    fn success_dimension_tracks_vector() {
        let r = EmbeddingResult::success("hi", vec![0.0; 8]);
        assert!(r.success);
        assert_eq!(r.dimension, 8);
        assert!(r.error_reason.is_none());
    }

    #[test]
    fn corpus_parses_aliases() {
        assert_eq!("code".parse::<Corpus>().unwrap(), Corpus::CodeExamples);
        assert_eq!("documents".parse::<Corpus>().unwrap(), Corpus::Documents);
        assert!("pages".parse::<Corpus>().is_err());
    }

    #[test]
    fn query_validation() {
        assert!(matches!(
            SearchQuery::new("  ", Corpus::Documents).validate(),
            Err(PipelineError::EmptyInput)
        ));
        assert!(matches!(
            SearchQuery::new("q", Corpus::Documents).top_k(0).validate(),
            Err(PipelineError::InvalidQuery(_))
        ));
        assert!(matches!(
            SearchQuery::new("q", Corpus::Documents)
                .threshold(1.5)
                .validate(),
            Err(PipelineError::InvalidQuery(_))
        ));
        assert!(SearchQuery::new("q", Corpus::Documents)
            .threshold(0.9)
            .filter("source", "docs.rs")
            .validate()
            .is_ok());
    }

    #[test]
    fn batch_outcome_counts() {
        let outcome = BatchOutcome::new(vec![
            EmbeddingResult::success("a", vec![1.0]),
            EmbeddingResult::cancelled("b"),
        ]);
        assert_eq!(outcome.len(), 2);
        assert_eq!(outcome.succeeded(), 1);
        assert_eq!(outcome.failed(), 1);
        assert!(outcome.get(1).unwrap().is_cancelled());
    }
}
