//! Batch orchestration over the embedding client.
//!
//! Repeated texts are collapsed first; the unique texts are cut into
//! `batch_size` slices and every slice is dispatched at once. The client's
//! shared semaphore decides how many provider calls actually run
//! concurrently. Slices complete in any order;
//! the merged [`BatchOutcome`] is always in input order, and one slice
//! failing never affects its siblings.

use std::sync::Arc;
use std::time::Duration;

use context_embed_core::models::{BatchOutcome, ChunkContext, EmbeddingRequest, EmbeddingResult};
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::embedding::{Deduplicated, EmbeddingClient};
use crate::enrich::{Enricher, Enrichment};

pub struct BatchOrchestrator {
    client: Arc<EmbeddingClient>,
    enricher: Option<Arc<Enricher>>,
    batch_size: usize,
}

impl BatchOrchestrator {
    pub fn new(client: Arc<EmbeddingClient>, batch_size: usize) -> Self {
        Self {
            client,
            enricher: None,
            batch_size: batch_size.max(1),
        }
    }

    /// Run `enricher` over requests passed to [`embed_requests`](Self::embed_requests).
    pub fn with_enricher(mut self, enricher: Arc<Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn client(&self) -> &EmbeddingClient {
        &self.client
    }

    /// Embed `texts`, one result per input in input order.
    ///
    /// Items finished before `cancel` fires keep their vectors; the rest are
    /// reported as cancelled.
    pub async fn embed_all(&self, texts: &[String], cancel: &CancellationToken) -> BatchOutcome {
        if texts.is_empty() {
            return BatchOutcome::default();
        }

        // Across slices, not just within one.
        let dedup = Deduplicated::new(texts.iter().enumerate());
        let slices: Vec<&[String]> = dedup.unique().chunks(self.batch_size).collect();
        tracing::debug!(
            items = texts.len(),
            unique = dedup.unique().len(),
            slices = slices.len(),
            batch_size = self.batch_size,
            "dispatching embedding batches"
        );

        let outcomes = join_all(
            slices
                .iter()
                .map(|slice| self.client.embed_batch_cancellable(slice, cancel)),
        )
        .await;

        let unique_results: Vec<_> = outcomes.into_iter().flat_map(BatchOutcome::into_results).collect();
        let mut slots = vec![None; texts.len()];
        dedup.fan_out(unique_results, &mut slots);
        let results = slots
            .into_iter()
            .zip(texts)
            .map(|(slot, text)| slot.unwrap_or_else(|| EmbeddingResult::cancelled(text.as_str())))
            .collect();
        let outcome = BatchOutcome::new(results);
        tracing::info!(
            items = outcome.len(),
            succeeded = outcome.succeeded(),
            failed = outcome.failed(),
            "embedding batch complete"
        );
        outcome
    }

    /// Enrich (when an enricher is attached) and embed `requests`.
    ///
    /// Returns the enrichment outcome of every request alongside the
    /// embedding results. A request whose enrichment fell back is embedded
    /// from its raw text.
    pub async fn embed_requests(
        &self,
        requests: &[EmbeddingRequest],
        cancel: &CancellationToken,
    ) -> (Vec<Enrichment>, BatchOutcome) {
        let enrichments = self.enrich(requests, cancel).await;
        let texts: Vec<String> = enrichments.iter().map(|e| e.text().to_string()).collect();
        let outcome = self.embed_all(&texts, cancel).await;
        (enrichments, outcome)
    }

    async fn enrich(
        &self,
        requests: &[EmbeddingRequest],
        cancel: &CancellationToken,
    ) -> Vec<Enrichment> {
        let texts: Vec<String> = requests.iter().map(|r| r.text().to_string()).collect();
        let enricher = match &self.enricher {
            Some(e) if e.is_enabled() => e,
            _ => return texts.into_iter().map(Enrichment::Skipped).collect(),
        };

        let contexts: Vec<ChunkContext> = requests
            .iter()
            .map(|r| r.context().cloned().unwrap_or_default())
            .collect();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => texts
                .into_iter()
                .map(|text| Enrichment::Fallback { text, reason: "cancelled".to_string() })
                .collect(),
            out = enricher.enrich_batch(&texts, &contexts) => out,
        }
    }
}

/// Cancel `token` once `after` elapses, unless it is cancelled first.
pub fn cancel_after(token: &CancellationToken, after: Duration) -> JoinHandle<()> {
    let token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(after) => {
                tracing::debug!(after_ms = after.as_millis() as u64, "deadline reached, cancelling");
                token.cancel();
            }
        }
    })
}
