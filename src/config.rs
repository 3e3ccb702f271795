//! TOML configuration parsing and validation.
//!
//! Every section except `[db]` has defaults, so a minimal file only needs a
//! database path and, for real embedding calls, an `[embedding]` block:
//!
//! ```toml
//! [db]
//! path = "./data/cembed.sqlite"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Static credentials, consulted after the process environment.
    #[serde(default)]
    pub credentials: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Maximum texts per provider call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum provider calls in flight across the whole process.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Total attempts per provider call, including the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Credential name holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Send `dimensions` in the request body (models that support shortening).
    #[serde(default)]
    pub send_dimensions: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_secs: default_timeout_secs(),
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            send_dimensions: false,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_concurrency() -> usize {
    4
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

/// How chunks are framed with document context before embedding.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentMode {
    /// Embed raw chunk text.
    Disabled,
    /// Title plus neighbouring chunk text; no network calls.
    Window,
    /// LLM-written situating context via chat completions.
    Llm,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    #[serde(default = "default_enrichment_mode")]
    pub mode: EnrichmentMode,
    /// Chat model used when `mode = "llm"`.
    #[serde(default = "default_enrichment_model")]
    pub model: String,
    /// Characters of neighbouring chunk text kept on each side.
    #[serde(default = "default_window_chars")]
    pub window_chars: usize,
    /// Cap on context + chunk. Context is truncated first.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Characters of the full document sent to the LLM.
    #[serde(default = "default_document_chars")]
    pub document_chars: usize,
    /// Concurrent enrichment calls.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            mode: default_enrichment_mode(),
            model: default_enrichment_model(),
            window_chars: default_window_chars(),
            max_chars: default_max_chars(),
            document_chars: default_document_chars(),
            max_workers: default_max_workers(),
        }
    }
}

fn default_enrichment_mode() -> EnrichmentMode {
    EnrichmentMode::Window
}
fn default_enrichment_model() -> String {
    "gpt-4.1-nano".to_string()
}
fn default_window_chars() -> usize {
    400
}
fn default_max_chars() -> usize {
    8_000
}
fn default_document_chars() -> usize {
    5_000
}
fn default_max_workers() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            candidate_multiplier: default_candidate_multiplier(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_similarity_threshold() -> f32 {
    0.15
}
fn default_candidate_multiplier() -> usize {
    2
}

impl Config {
    /// Config with an explicit database path and every other section defaulted.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            embedding: EmbeddingConfig::default(),
            enrichment: EnrichmentConfig::default(),
            retrieval: RetrievalConfig::default(),
            credentials: HashMap::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let e = &self.embedding;
        if e.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        if e.max_concurrency == 0 {
            anyhow::bail!("embedding.max_concurrency must be > 0");
        }
        if e.max_retries == 0 {
            anyhow::bail!("embedding.max_retries must be >= 1 (it counts the first attempt)");
        }
        // Model and dims may also come from EMBEDDING_MODEL and
        // EMBEDDING_DIMENSIONS; absence is reported when the client is built.
        if e.dims == Some(0) {
            anyhow::bail!("embedding.dims must be > 0");
        }
        match e.provider.as_str() {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        if self.enrichment.max_chars == 0 {
            anyhow::bail!("enrichment.max_chars must be > 0");
        }
        if self.enrichment.max_workers == 0 {
            anyhow::bail!("enrichment.max_workers must be > 0");
        }

        let r = &self.retrieval;
        if r.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }
        if !(0.0..=1.0).contains(&r.similarity_threshold) {
            anyhow::bail!("retrieval.similarity_threshold must be in [0.0, 1.0]");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
