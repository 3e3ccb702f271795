//! Shared fixtures for integration tests: a scripted in-process embedding
//! backend whose behaviour is fixed per text.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use context_embed::embedding::{EmbeddingClient, RetryPolicy};
use context_embed::{ProviderError, ProviderErrorKind};
use context_embed_core::embedding::EmbeddingBackend;

pub struct ScriptedBackend {
    pub dims: usize,
    /// Texts mapped to fixed vectors; anything else gets a derived vector.
    pub vectors: HashMap<String, Vec<f32>>,
    /// Any call containing one of these texts fails with `InvalidRequest`.
    pub poison: HashSet<String>,
    /// Per-text latency; a call sleeps for the longest delay among its texts.
    pub delays: HashMap<String, Duration>,
    pub calls: AtomicUsize,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
    pub seen: Mutex<Vec<Vec<String>>>,
}

impl ScriptedBackend {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: HashMap::new(),
            poison: HashSet::new(),
            delays: HashMap::new(),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn poison(mut self, text: &str) -> Self {
        self.poison.insert(text.to_string());
        self
    }

    pub fn delay(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Deterministic, non-zero vector derived from the text bytes.
pub fn derived_vector(text: &str, dims: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dims];
    for (i, b) in text.bytes().enumerate() {
        v[(i * 7 + b as usize) % dims] += 1.0 + (b % 13) as f32;
    }
    v[0] += 0.5;
    v
}

#[async_trait]
impl EmbeddingBackend for ScriptedBackend {
    fn model_name(&self) -> &str {
        "scripted-embedding"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(texts.to_vec());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let delay = texts
            .iter()
            .filter_map(|t| self.delays.get(t))
            .max()
            .copied()
            .unwrap_or(Duration::from_millis(2));
        tokio::time::sleep(delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if texts.iter().any(|t| self.poison.contains(t)) {
            return Err(ProviderError::new(
                ProviderErrorKind::InvalidRequest,
                "input rejected by provider",
            ));
        }

        Ok(texts
            .iter()
            .map(|t| {
                self.vectors
                    .get(t)
                    .cloned()
                    .unwrap_or_else(|| derived_vector(t, self.dims))
            })
            .collect())
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    }
}

pub fn client(backend: Arc<ScriptedBackend>, max_concurrency: usize, batch_size: usize) -> Arc<EmbeddingClient> {
    Arc::new(EmbeddingClient::new(
        backend,
        fast_retry(),
        max_concurrency,
        batch_size,
    ))
}

pub fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
