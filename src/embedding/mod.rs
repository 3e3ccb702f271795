//! Embedding backends and the embedding client.
//!
//! Concrete [`EmbeddingBackend`] implementations:
//! - **[`DisabledBackend`]**: always fails; used when embeddings are not configured.
//! - **[`OpenAIBackend`]**: one `POST {api_base}/embeddings` call per invocation.
//!
//! Retry/backoff, deduplication, and per-item fallback are layered on top by
//! [`EmbeddingClient`], so backends stay single-attempt and easy to fake in
//! tests.
//!
//! # Provider Selection
//!
//! Use [`create_backend`] to instantiate the backend named by the config.
//! A missing API key is reported here, at first use, as a configuration error.

mod client;
mod dedup;
mod retry;

pub use client::EmbeddingClient;
pub(crate) use dedup::Deduplicated;
pub use retry::RetryPolicy;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use context_embed_core::embedding::EmbeddingBackend;
use context_embed_core::{ProviderError, ProviderErrorKind};

use crate::config::EmbeddingConfig;
use crate::credentials::{CredentialResolver, SettingsCache};

// ============ Disabled Backend ============

/// A backend that rejects every call.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledBackend;

#[async_trait]
impl EmbeddingBackend for DisabledBackend {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::new(
            ProviderErrorKind::InvalidRequest,
            "embedding provider is disabled",
        ))
    }
}

// ============ OpenAI Backend ============

/// Backend for OpenAI-compatible embeddings endpoints.
///
/// Calls `POST {api_base}/embeddings`. Status codes are classified into
/// [`ProviderErrorKind`]s so the client can decide what to retry.
///
/// Model and dimension are pinned when the backend is built, since stored
/// corpora are bound to them. The API key is read from the shared
/// [`SettingsCache`] on every request; an auth rejection invalidates the
/// cache so the next request re-resolves credentials.
pub struct OpenAIBackend {
    client: reqwest::Client,
    endpoint: String,
    settings: Arc<SettingsCache>,
    model: String,
    dims: usize,
    send_dimensions: bool,
}

impl OpenAIBackend {
    pub fn new(config: &EmbeddingConfig, settings: Arc<SettingsCache>) -> Result<Self> {
        let resolved = settings.get()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", config.api_base.trim_end_matches('/')),
            model: resolved.model.clone(),
            dims: resolved.dims,
            settings,
            send_dimensions: config.send_dimensions,
        })
    }

    pub fn settings(&self) -> &Arc<SettingsCache> {
        &self.settings
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let api_key = self
            .settings
            .get()
            .map_err(|e| ProviderError::new(ProviderErrorKind::Auth, e.to_string()))?
            .api_key
            .clone();

        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        if self.send_dimensions {
            body["dimensions"] = serde_json::json!(self.dims);
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::new(ProviderErrorKind::Network, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let err = ProviderError::from_status(status.as_u16(), &body_text);
            if err.kind == ProviderErrorKind::Auth {
                tracing::warn!(
                    status = status.as_u16(),
                    "provider rejected credentials, re-resolving on next request"
                );
                self.settings.invalidate();
            }
            return Err(err);
        }

        let json: serde_json::Value = response.json().await.map_err(|e| {
            ProviderError::new(ProviderErrorKind::MalformedResponse, e.to_string())
        })?;
        parse_openai_response(&json, texts.len())
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts `data[].embedding`, ordered by `data[].index`, and checks that
/// exactly one vector came back per input.
fn parse_openai_response(
    json: &serde_json::Value,
    expected: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    let malformed = |msg: &str| ProviderError::new(ProviderErrorKind::MalformedResponse, msg);

    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| malformed("missing data array"))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| malformed("missing embedding"))?;
        let vector = embedding
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| malformed("non-numeric embedding value"))?;
        indexed.push((index, vector));
    }

    if indexed.len() != expected {
        return Err(malformed(&format!(
            "expected {} embeddings, got {}",
            expected,
            indexed.len()
        )));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Create the [`EmbeddingBackend`] named by `config.provider`.
///
/// # Supported Providers
///
/// | Config Value | Backend |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledBackend`] |
/// | `"openai"` | [`OpenAIBackend`] |
///
/// # Errors
///
/// Unknown provider names, or credentials that cannot be resolved.
pub fn create_backend(
    config: &EmbeddingConfig,
    resolver: Arc<dyn CredentialResolver>,
) -> Result<Arc<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledBackend)),
        "openai" => {
            let settings = Arc::new(SettingsCache::new(resolver, config.clone()));
            Ok(Arc::new(OpenAIBackend::new(config, settings)?))
        }
        other => bail!("Unknown embedding provider: {}", other),
    }
}
