use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;

use crate::batch::{cancel_after, BatchOrchestrator};
use crate::config::Config;
use crate::credentials::LayeredCredentials;
use crate::embedding::EmbeddingClient;

/// Embed `texts` and print one status line per input.
pub async fn run_embed(
    config: &Config,
    texts: &[String],
    timeout: Option<Duration>,
    json: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }
    if texts.is_empty() {
        bail!("Nothing to embed. Pass one or more texts.");
    }

    let resolver = Arc::new(LayeredCredentials::from_config(config));
    let client = Arc::new(EmbeddingClient::from_config(&config.embedding, resolver)?);
    let orchestrator = BatchOrchestrator::new(client, config.embedding.batch_size);

    let cancel = CancellationToken::new();
    let deadline = timeout.map(|t| cancel_after(&cancel, t));
    let outcome = orchestrator.embed_all(texts, &cancel).await;
    if let Some(handle) = deadline {
        handle.abort();
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    println!("embed ({})", orchestrator.client().model_name());
    for (i, result) in outcome.iter().enumerate() {
        let preview: String = result.source_text.chars().take(48).collect();
        if result.success {
            println!("  {}. ok  dims={}  \"{}\"", i + 1, result.dimension, preview);
        } else {
            println!(
                "  {}. failed  {}  \"{}\"",
                i + 1,
                result.error_reason.as_deref().unwrap_or("unknown error"),
                preview
            );
        }
    }
    println!("  embedded: {}", outcome.succeeded());
    println!("  failed: {}", outcome.failed());
    Ok(())
}
