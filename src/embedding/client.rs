//! Retrying, deduplicating embedding client.
//!
//! Wraps an [`EmbeddingBackend`] with:
//! - rejection of empty/whitespace input before any provider call,
//! - deduplication of identical texts within a batch,
//! - retry with exponential backoff ([`RetryPolicy`]),
//! - per-item fallback when a whole sub-batch call fails,
//! - a shared semaphore bounding provider calls in flight,
//! - dimension validation of every returned vector.
//!
//! Failures never abort a batch: each input gets its own [`EmbeddingResult`].

use std::sync::Arc;

use context_embed_core::embedding::EmbeddingBackend;
use context_embed_core::models::{BatchOutcome, EmbeddingResult};
use context_embed_core::{ErrorKind, PipelineError, ProviderError, ProviderErrorKind};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::dedup::Deduplicated;
use super::{create_backend, RetryPolicy};
use crate::config::EmbeddingConfig;
use crate::credentials::CredentialResolver;

pub struct EmbeddingClient {
    backend: Arc<dyn EmbeddingBackend>,
    retry: RetryPolicy,
    limiter: Arc<Semaphore>,
    max_batch_size: usize,
}

impl EmbeddingClient {
    /// Client with its own limiter of `max_concurrency` permits.
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        retry: RetryPolicy,
        max_concurrency: usize,
        max_batch_size: usize,
    ) -> Self {
        Self::with_limiter(
            backend,
            retry,
            Arc::new(Semaphore::new(max_concurrency.max(1))),
            max_batch_size,
        )
    }

    /// Client sharing `limiter` with other clients in the process.
    pub fn with_limiter(
        backend: Arc<dyn EmbeddingBackend>,
        retry: RetryPolicy,
        limiter: Arc<Semaphore>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            backend,
            retry,
            limiter,
            max_batch_size: max_batch_size.max(1),
        }
    }

    /// Client for the provider named by `[embedding]`, with the configured
    /// retry policy, concurrency ceiling, and provider batch size.
    pub fn from_config(
        config: &EmbeddingConfig,
        resolver: Arc<dyn CredentialResolver>,
    ) -> anyhow::Result<Self> {
        let backend = create_backend(config, resolver)?;
        Ok(Self::new(
            backend,
            RetryPolicy::from_config(config),
            config.max_concurrency,
            config.batch_size,
        ))
    }

    pub fn dims(&self) -> usize {
        self.backend.dims()
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> EmbeddingResult {
        self.embed_one_cancellable(text, &CancellationToken::new())
            .await
    }

    pub async fn embed_one_cancellable(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> EmbeddingResult {
        self.embed_batch_cancellable(&[text.to_string()], cancel)
            .await
            .into_results()
            .pop()
            .unwrap_or_else(|| EmbeddingResult::cancelled(text))
    }

    /// Embed a single text, returning the vector or the whole-call error.
    pub async fn embed_vector(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<f32>, PipelineError> {
        if text.trim().is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        let mut vectors = self.call_provider(&[text.to_string()], cancel).await?;
        let vector = vectors.pop().ok_or_else(|| {
            PipelineError::Provider(ProviderError::new(
                ProviderErrorKind::MalformedResponse,
                "empty embedding response",
            ))
        })?;
        self.check_dims(&vector).map_err(|reason| {
            PipelineError::Provider(ProviderError::new(
                ProviderErrorKind::MalformedResponse,
                reason,
            ))
        })?;
        Ok(vector)
    }

    /// Embed many texts. The outcome has one result per input, in order.
    pub async fn embed_batch(&self, texts: &[String]) -> BatchOutcome {
        self.embed_batch_cancellable(texts, &CancellationToken::new())
            .await
    }

    pub async fn embed_batch_cancellable(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let mut slots: Vec<Option<EmbeddingResult>> = vec![None; texts.len()];

        for (i, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                slots[i] = Some(EmbeddingResult::from_error(
                    text.as_str(),
                    &PipelineError::EmptyInput,
                ));
            }
        }
        let dedup = Deduplicated::new(
            texts
                .iter()
                .enumerate()
                .filter(|(_, text)| !text.trim().is_empty()),
        );

        if dedup.unique().len() < dedup.inputs() {
            tracing::debug!(
                inputs = dedup.inputs(),
                unique = dedup.unique().len(),
                "deduplicated embedding batch"
            );
        }

        let mut unique_results: Vec<EmbeddingResult> = Vec::with_capacity(dedup.unique().len());
        for sub_batch in dedup.unique().chunks(self.max_batch_size) {
            unique_results.extend(self.embed_unique(sub_batch, cancel).await);
        }
        dedup.fan_out(unique_results, &mut slots);

        BatchOutcome::new(
            slots
                .into_iter()
                .zip(texts)
                .map(|(slot, text)| slot.unwrap_or_else(|| EmbeddingResult::cancelled(text.as_str())))
                .collect(),
        )
    }

    /// One provider call for `texts` (already unique and non-empty), falling
    /// back to per-item calls if the batch call fails.
    async fn embed_unique(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Vec<EmbeddingResult> {
        match self.call_provider(texts, cancel).await {
            Ok(vectors) => texts
                .iter()
                .zip(vectors)
                .map(|(text, vector)| self.item_result(text, vector))
                .collect(),
            Err(PipelineError::Cancelled) => texts
                .iter()
                .map(|t| EmbeddingResult::cancelled(t.as_str()))
                .collect(),
            Err(e) if texts.len() == 1 || !is_item_specific(&e) => {
                tracing::warn!(items = texts.len(), error = %e, "embedding batch failed");
                texts
                    .iter()
                    .map(|t| EmbeddingResult::from_error(t.as_str(), &e))
                    .collect()
            }
            Err(e) => {
                tracing::warn!(
                    items = texts.len(),
                    error = %e,
                    "embedding batch failed, falling back to per-item calls"
                );
                let singles = texts.iter().map(move |text| async move {
                    match self.call_provider(std::slice::from_ref(text), cancel).await {
                        // One vector per input is checked by `call_provider`.
                        Ok(mut vectors) => self.item_result(text, vectors.remove(0)),
                        Err(e) => EmbeddingResult::from_error(text.as_str(), &e),
                    }
                });
                join_all(singles).await
            }
        }
    }

    async fn call_provider(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>, PipelineError> {
        let backend = &self.backend;
        let limiter = &self.limiter;
        let vectors = self
            .retry
            .run(cancel, move || async move {
                let _permit = limiter.acquire().await.map_err(|_| {
                    ProviderError::new(ProviderErrorKind::Network, "concurrency limiter closed")
                })?;
                backend.embed(texts).await
            })
            .await?;
        if vectors.len() != texts.len() {
            return Err(PipelineError::Provider(ProviderError::new(
                ProviderErrorKind::MalformedResponse,
                format!("expected {} embeddings, got {}", texts.len(), vectors.len()),
            )));
        }
        Ok(vectors)
    }

    fn check_dims(&self, vector: &[f32]) -> Result<(), String> {
        let configured = self.backend.dims();
        if vector.len() != configured {
            return Err(format!(
                "provider returned {} dims, configured for {}",
                vector.len(),
                configured
            ));
        }
        Ok(())
    }

    fn item_result(&self, text: &str, vector: Vec<f32>) -> EmbeddingResult {
        match self.check_dims(&vector) {
            Ok(()) => EmbeddingResult::success(text, vector),
            Err(reason) => EmbeddingResult::failure(text, ErrorKind::DimensionMismatch, reason),
        }
    }
}

/// Whether a failed batch call might succeed item by item. Auth failures
/// apply to every call, so retrying items one at a time is pointless.
fn is_item_specific(err: &PipelineError) -> bool {
    match err {
        PipelineError::Provider(p) => p.kind != ProviderErrorKind::Auth,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Deterministic backend: vector derived from text bytes; fails any call
    /// containing a text listed in `poison`.
    struct ScriptedBackend {
        dims: usize,
        poison: Vec<String>,
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedBackend {
        fn new(dims: usize) -> Self {
            Self {
                dims,
                poison: Vec::new(),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn poisoned(dims: usize, poison: &[&str]) -> Self {
            Self {
                poison: poison.iter().map(|s| s.to_string()).collect(),
                ..Self::new(dims)
            }
        }
    }

    fn vector_for(text: &str, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; dims];
        for (i, b) in text.bytes().enumerate() {
            v[i % dims] += b as f32 / 255.0;
        }
        v
    }

    #[async_trait]
    impl EmbeddingBackend for ScriptedBackend {
        fn model_name(&self) -> &str {
            "scripted"
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(texts.to_vec());
            if texts.iter().any(|t| self.poison.contains(t)) {
                return Err(ProviderError::new(
                    ProviderErrorKind::InvalidRequest,
                    "input rejected",
                ));
            }
            Ok(texts.iter().map(|t| vector_for(t, self.dims)).collect())
        }
    }

    fn client(backend: Arc<ScriptedBackend>) -> EmbeddingClient {
        EmbeddingClient::new(
            backend,
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            4,
            64,
        )
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn empty_text_never_reaches_provider() {
        let backend = Arc::new(ScriptedBackend::new(8));
        let result = client(backend.clone()).embed_one("   ").await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::EmptyInput));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn embed_one_has_configured_dimension() {
        let backend = Arc::new(ScriptedBackend::new(16));
        let result = client(backend).embed_one("hello world").await;
        assert!(result.success);
        assert_eq!(result.dimension, 16);
        assert_eq!(result.vector.len(), 16);
    }

    #[tokio::test]
    async fn duplicates_share_one_provider_call() {
        let backend = Arc::new(ScriptedBackend::new(8));
        let outcome = client(backend.clone())
            .embed_batch(&texts(&["same", "same", "same"]))
            .await;

        assert_eq!(outcome.len(), 3);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.seen.lock().unwrap()[0], texts(&["same"]));
        let first = &outcome.results()[0].vector;
        for r in outcome.iter() {
            assert!(r.success);
            let same_bits = r
                .vector
                .iter()
                .zip(first)
                .all(|(a, b)| a.to_bits() == b.to_bits());
            assert!(same_bits);
        }
    }

    #[tokio::test]
    async fn one_bad_item_is_isolated() {
        let inputs: Vec<String> = (0..10).map(|i| format!("chunk {}", i)).collect();
        let backend = Arc::new(ScriptedBackend::poisoned(8, &["chunk 6"]));
        let outcome = client(backend).embed_batch(&inputs).await;

        assert_eq!(outcome.len(), 10);
        assert_eq!(outcome.succeeded(), 9);
        for (i, r) in outcome.iter().enumerate() {
            assert_eq!(r.source_text, inputs[i]);
            if i == 6 {
                assert!(!r.success);
                assert!(r.error_reason.is_some());
                assert_eq!(r.error_kind, Some(ErrorKind::Provider));
            } else {
                assert!(r.success);
                assert_eq!(r.dimension, 8);
            }
        }
    }

    #[tokio::test]
    async fn empty_and_valid_mixed() {
        let backend = Arc::new(ScriptedBackend::new(8));
        let outcome = client(backend).embed_batch(&texts(&["", "hello world"])).await;
        let results = outcome.results();
        assert_eq!(results[0].error_kind, Some(ErrorKind::EmptyInput));
        assert!(results[1].success);
        assert_eq!(results[1].dimension, 8);
    }

    #[tokio::test]
    async fn wrong_dimension_is_a_failure() {
        struct ShortBackend;

        #[async_trait]
        impl EmbeddingBackend for ShortBackend {
            fn model_name(&self) -> &str {
                "short"
            }
            fn dims(&self) -> usize {
                4
            }
            async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
                Ok(texts.iter().map(|_| vec![1.0, 2.0]).collect())
            }
        }

        let client = EmbeddingClient::new(Arc::new(ShortBackend), RetryPolicy::default(), 1, 8);
        let result = client.embed_one("x").await;
        assert!(!result.success);
        assert!(result.vector.is_empty());
        assert_eq!(result.error_kind, Some(ErrorKind::DimensionMismatch));
        assert!(client.embed_vector("x", &CancellationToken::new()).await.is_err());
    }

    /// Drops the last vector of any multi-text call.
    struct TruncatingBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingBackend for TruncatingBackend {
        fn model_name(&self) -> &str {
            "truncating"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut vectors: Vec<Vec<f32>> = texts.iter().map(|t| vector_for(t, 4)).collect();
            if texts.len() > 1 {
                vectors.pop();
            }
            Ok(vectors)
        }
    }

    #[tokio::test]
    async fn short_response_falls_back_to_single_items() {
        let backend = Arc::new(TruncatingBackend {
            calls: AtomicUsize::new(0),
        });
        let client = EmbeddingClient::new(backend.clone(), RetryPolicy::default(), 2, 2);
        let inputs = texts(&["a", "b", "c", "d"]);

        let outcome = client.embed_batch(&inputs).await;

        assert_eq!(outcome.succeeded(), 4);
        for (input, result) in inputs.iter().zip(outcome.iter()) {
            assert_eq!(&result.source_text, input);
            assert_eq!(result.vector, vector_for(input, 4));
        }
        // Two short batch calls, then four single-item calls.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn short_response_for_vector_call_is_malformed() {
        struct EmptyBackend;

        #[async_trait]
        impl EmbeddingBackend for EmptyBackend {
            fn model_name(&self) -> &str {
                "empty"
            }
            fn dims(&self) -> usize {
                4
            }
            async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
                Ok(Vec::new())
            }
        }

        let client = EmbeddingClient::new(Arc::new(EmptyBackend), RetryPolicy::default(), 1, 8);
        let result = client.embed_one("x").await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Provider));
        assert!(result.error_reason.as_deref().unwrap().contains("expected 1 embeddings, got 0"));
    }

    #[tokio::test]
    async fn sub_batches_respect_max_batch_size() {
        let backend = Arc::new(ScriptedBackend::new(4));
        let client = EmbeddingClient::new(backend.clone(), RetryPolicy::default(), 2, 3);
        let inputs: Vec<String> = (0..7).map(|i| format!("t{}", i)).collect();
        let outcome = client.embed_batch(&inputs).await;
        assert_eq!(outcome.succeeded(), 7);
        let sizes: Vec<usize> = backend.seen.lock().unwrap().iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn cancelled_before_start_marks_everything_cancelled() {
        let backend = Arc::new(ScriptedBackend::new(4));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = client(backend.clone())
            .embed_batch_cancellable(&texts(&["a", "b"]), &cancel)
            .await;
        assert!(outcome.iter().all(|r| r.is_cancelled()));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }
}
