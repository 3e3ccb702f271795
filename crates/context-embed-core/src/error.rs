//! Error taxonomy for the embedding and retrieval pipeline.
//!
//! [`PipelineError`] covers whole-operation failures surfaced to callers.
//! Per-item failures inside a batch are not returned as `Err`; they are
//! recorded on the item's [`EmbeddingResult`](crate::models::EmbeddingResult)
//! as an [`ErrorKind`] plus a human-readable reason.

use serde::{Deserialize, Serialize};

use crate::models::Corpus;

/// Failure class of an embedding provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// HTTP 429.
    RateLimited,
    /// Connection reset, DNS failure, timeout.
    Network,
    /// HTTP 5xx.
    Server,
    /// HTTP 4xx other than 401/403/429.
    InvalidRequest,
    /// HTTP 401/403 or a rejected API key.
    Auth,
    /// 2xx response that could not be decoded into vectors.
    MalformedResponse,
}

impl ProviderErrorKind {
    /// Only rate limits and transient transport/server failures are retried.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ProviderErrorKind::RateLimited | ProviderErrorKind::Network | ProviderErrorKind::Server
        )
    }
}

/// An error returned by an [`EmbeddingBackend`](crate::embedding::EmbeddingBackend).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Classify an HTTP status code returned by the provider.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            429 => ProviderErrorKind::RateLimited,
            401 | 403 => ProviderErrorKind::Auth,
            500..=599 => ProviderErrorKind::Server,
            _ => ProviderErrorKind::InvalidRequest,
        };
        Self::new(kind, format!("HTTP {}: {}", status, body))
    }
}

/// Whole-operation pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("input text is empty")]
    EmptyInput,

    #[error("embedding provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error(
        "dimension mismatch for corpus {corpus}: stored vectors have {stored} dims, \
         embedding config produces {configured}"
    )]
    DimensionMismatch {
        corpus: Corpus,
        stored: usize,
        configured: usize,
    },

    #[error("corpus unavailable: {0}")]
    CorpusUnavailable(String),

    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid search query: {0}")]
    InvalidQuery(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::EmptyInput => ErrorKind::EmptyInput,
            PipelineError::Provider(_) => ErrorKind::Provider,
            PipelineError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            PipelineError::CorpusUnavailable(_) => ErrorKind::CorpusUnavailable,
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::Config(_) => ErrorKind::Config,
            PipelineError::InvalidQuery(_) => ErrorKind::InvalidQuery,
        }
    }
}

/// Discriminant of [`PipelineError`], stored on failed batch items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptyInput,
    Provider,
    DimensionMismatch,
    CorpusUnavailable,
    Cancelled,
    Config,
    InvalidQuery,
}
