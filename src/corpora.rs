//! Corpus overview for `cembed corpora`.
//!
//! Shows, per corpus, the embedding dimension and model recorded on first
//! write and the number of stored items. A dimension that disagrees with the
//! resolved embedding dimension (`EMBEDDING_DIMENSIONS`, else
//! `embedding.dims`) is flagged, since searches against that
//! corpus will fail until it is re-ingested.

use anyhow::Result;

use crate::config::Config;
use crate::credentials::{resolve_dims, LayeredCredentials};
use crate::sqlite_store::SqliteVectorStore;

pub async fn run_corpora(config: &Config, json: bool) -> Result<()> {
    let store = SqliteVectorStore::open(config).await?;
    let summaries = store.summaries().await?;
    store.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let configured = if config.embedding.is_enabled() {
        resolve_dims(&LayeredCredentials::from_config(config), &config.embedding).ok()
    } else {
        None
    };

    println!("  Database:  {}", config.db.path.display());
    println!("  Size:      {}", format_bytes(db_size));
    println!();
    println!(
        "  {:<16} {:>6} {:<28} {:>8}   {}",
        "CORPUS", "DIMS", "MODEL", "ITEMS", "UPDATED"
    );
    println!("  {}", "-".repeat(76));

    for s in &summaries {
        let dims = s
            .dims
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string());
        let updated = s
            .updated_at
            .map(format_ts_iso)
            .unwrap_or_else(|| "never".to_string());
        println!(
            "  {:<16} {:>6} {:<28} {:>8}   {}",
            s.corpus.as_str(),
            dims,
            s.model.as_deref().unwrap_or("-"),
            s.count,
            updated
        );
        if let (Some(stored), Some(configured)) = (s.dims, configured) {
            if stored != configured {
                println!(
                    "    warning: stored vectors have {} dims, config produces {}",
                    stored, configured
                );
            }
        }
    }
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
