//! Contextual enrichment of chunks before embedding.
//!
//! A chunk embedded on its own loses the document around it. The
//! [`Enricher`] asks a [`ContextGenerator`] for a short piece of situating
//! context and frames the chunk with it:
//!
//! ```text
//! <context>
//! ---
//! <chunk>
//! ```
//!
//! The framed text never exceeds `max_chars`. Context is truncated to fit;
//! the chunk itself is never cut. A chunk that alone exceeds the cap, or a
//! generator failure, yields [`Enrichment::Fallback`] carrying the raw chunk.
//!
//! # Generators
//!
//! | Mode | Generator | Network |
//! |------|-----------|---------|
//! | `window` | [`WindowContext`]: title plus neighbouring chunk text | no |
//! | `llm` | [`LlmContext`]: chat-completions summary of the chunk's place in the document | yes |
//! | `disabled` | none; every chunk is [`Enrichment::Skipped`] | no |

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use context_embed_core::models::ChunkContext;
use context_embed_core::{ProviderError, ProviderErrorKind};
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::{EmbeddingConfig, EnrichmentConfig, EnrichmentMode};
use crate::credentials::CredentialResolver;
use crate::embedding::RetryPolicy;

const SEPARATOR: &str = "\n---\n";

/// Outcome of enriching one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enrichment {
    /// Context + chunk, within the size cap.
    Enriched(String),
    /// Raw chunk, because enrichment was attempted and failed.
    Fallback { text: String, reason: String },
    /// Raw chunk, because enrichment is disabled.
    Skipped(String),
}

impl Enrichment {
    /// The text to embed.
    pub fn text(&self) -> &str {
        match self {
            Enrichment::Enriched(text)
            | Enrichment::Fallback { text, .. }
            | Enrichment::Skipped(text) => text,
        }
    }

    pub fn is_enriched(&self) -> bool {
        matches!(self, Enrichment::Enriched(_))
    }
}

/// Produces situating context for a chunk.
#[async_trait]
pub trait ContextGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, chunk: &str, context: &ChunkContext) -> Result<String>;
}

// ============ Window Context ============

/// Context from the document title and the neighbouring chunks.
pub struct WindowContext {
    /// Characters kept from each neighbour.
    pub window_chars: usize,
}

#[async_trait]
impl ContextGenerator for WindowContext {
    fn name(&self) -> &str {
        "window"
    }

    async fn generate(&self, _chunk: &str, context: &ChunkContext) -> Result<String> {
        let mut parts = Vec::new();

        if let Some(title) = non_blank(context.title.as_deref()) {
            parts.push(format!("Document: {}", title.trim()));
        } else if let Some(id) = non_blank(context.source_document_id.as_deref()) {
            parts.push(format!("Document: {}", id.trim()));
        }
        if let Some(prev) = non_blank(context.preceding.as_deref()) {
            parts.push(format!("Preceding: ...{}", tail_chars(prev.trim(), self.window_chars)));
        }
        if let Some(next) = non_blank(context.following.as_deref()) {
            parts.push(format!("Following: {}...", head_chars(next.trim(), self.window_chars)));
        }

        if parts.is_empty() {
            bail!("no document context available");
        }
        Ok(parts.join("\n"))
    }
}

// ============ LLM Context ============

const LLM_PROMPT_TAIL: &str = "Please give a short succinct context to situate this chunk \
within the overall document for the purposes of improving search retrieval of the chunk. \
Answer only with the succinct context and nothing else.";

/// Context written by a chat-completions model.
pub struct LlmContext {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    document_chars: usize,
    retry: RetryPolicy,
}

impl LlmContext {
    pub fn new(
        api_base: &str,
        api_key: String,
        model: String,
        document_chars: usize,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key,
            model,
            document_chars,
            retry,
        })
    }

    fn prompt(&self, chunk: &str, document: &str) -> String {
        format!(
            "<document>\n{}\n</document>\nHere is the chunk we want to situate within the whole document\n<chunk>\n{}\n</chunk>\n{}",
            head_chars(document, self.document_chars),
            chunk,
            LLM_PROMPT_TAIL
        )
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are a helpful assistant that provides concise contextual information."
                },
                { "role": "user", "content": prompt }
            ],
            "temperature": 0.3,
            "max_tokens": 200,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::new(ProviderErrorKind::Network, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &text));
        }

        let json: serde_json::Value = response.json().await.map_err(|e| {
            ProviderError::new(ProviderErrorKind::MalformedResponse, e.to_string())
        })?;
        parse_chat_response(&json)
    }
}

#[async_trait]
impl ContextGenerator for LlmContext {
    fn name(&self) -> &str {
        "llm"
    }

    async fn generate(&self, chunk: &str, context: &ChunkContext) -> Result<String> {
        let Some(document) = non_blank(context.full_document.as_deref()) else {
            bail!("full document text is required for llm context");
        };
        let prompt = self.prompt(chunk, document);
        let text = self
            .retry
            .run(&CancellationToken::new(), || self.complete(&prompt))
            .await?;
        Ok(text)
    }
}

/// Extract `choices[0].message.content` from a chat-completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String, ProviderError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            ProviderError::new(
                ProviderErrorKind::MalformedResponse,
                "chat response has no message content",
            )
        })
}

// ============ Enricher ============

/// Frames chunks with generated context, bounded by `max_chars`.
pub struct Enricher {
    generator: Option<Arc<dyn ContextGenerator>>,
    max_chars: usize,
    max_workers: usize,
}

impl Enricher {
    pub fn new(generator: Arc<dyn ContextGenerator>, max_chars: usize, max_workers: usize) -> Self {
        Self {
            generator: Some(generator),
            max_chars,
            max_workers: max_workers.max(1),
        }
    }

    /// An enricher that passes every chunk through as [`Enrichment::Skipped`].
    pub fn disabled() -> Self {
        Self {
            generator: None,
            max_chars: usize::MAX,
            max_workers: 1,
        }
    }

    /// Build the enricher selected by `[enrichment] mode`.
    ///
    /// `llm` mode reuses the embedding provider's API base, key, retry
    /// policy, and timeout.
    pub fn from_config(
        config: &EnrichmentConfig,
        embedding: &EmbeddingConfig,
        resolver: &dyn CredentialResolver,
    ) -> Result<Self> {
        let generator: Arc<dyn ContextGenerator> = match config.mode {
            EnrichmentMode::Disabled => return Ok(Self::disabled()),
            EnrichmentMode::Window => Arc::new(WindowContext {
                window_chars: config.window_chars,
            }),
            EnrichmentMode::Llm => {
                let Some(api_key) = resolver.get_credential(&embedding.api_key_env, None) else {
                    bail!(
                        "{} is not set (required by enrichment.mode = \"llm\")",
                        embedding.api_key_env
                    );
                };
                Arc::new(LlmContext::new(
                    &embedding.api_base,
                    api_key,
                    config.model.clone(),
                    config.document_chars,
                    RetryPolicy::from_config(embedding),
                    Duration::from_secs(embedding.timeout_secs),
                )?)
            }
        };
        Ok(Self::new(generator, config.max_chars, config.max_workers))
    }

    pub fn is_enabled(&self) -> bool {
        self.generator.is_some()
    }

    pub async fn enrich(&self, chunk: &str, context: &ChunkContext) -> Enrichment {
        let Some(generator) = &self.generator else {
            return Enrichment::Skipped(chunk.to_string());
        };

        let chunk_len = chunk.chars().count();
        let overhead = chunk_len + SEPARATOR.chars().count();
        if overhead >= self.max_chars {
            return Enrichment::Fallback {
                text: chunk.to_string(),
                reason: format!(
                    "chunk is {} chars, leaving no room for context within {}",
                    chunk_len, self.max_chars
                ),
            };
        }

        match generator.generate(chunk, context).await {
            Ok(generated) => {
                let generated = head_chars(generated.trim(), self.max_chars - overhead);
                if generated.is_empty() {
                    return Enrichment::Fallback {
                        text: chunk.to_string(),
                        reason: "generator returned empty context".to_string(),
                    };
                }
                Enrichment::Enriched(format!("{}{}{}", generated, SEPARATOR, chunk))
            }
            Err(e) => {
                tracing::warn!(generator = generator.name(), error = %e, "enrichment failed, using raw chunk");
                Enrichment::Fallback {
                    text: chunk.to_string(),
                    reason: format!("{:#}", e),
                }
            }
        }
    }

    /// Enrich `chunks[i]` with `contexts[i]`, at most `max_workers` at a
    /// time. Output order matches input order.
    pub async fn enrich_batch(&self, chunks: &[String], contexts: &[ChunkContext]) -> Vec<Enrichment> {
        let empty = ChunkContext::default();
        stream::iter(chunks.iter().enumerate())
            .map(|(i, chunk)| {
                let context = contexts.get(i).unwrap_or(&empty);
                self.enrich(chunk, context)
            })
            .buffered(self.max_workers)
            .collect()
            .await
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

/// First `n` characters of `s`.
fn head_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Last `n` characters of `s`.
fn tail_chars(s: &str, n: usize) -> &str {
    let len = s.chars().count();
    if len <= n {
        return s;
    }
    match s.char_indices().nth(len - n) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}
