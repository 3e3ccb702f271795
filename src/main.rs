//! # context-embed CLI (`cembed`)
//!
//! ## Usage
//!
//! ```bash
//! cembed --config ./config/cembed.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cembed init` | Create the SQLite vector database |
//! | `cembed embed <text>...` | Embed texts and print per-item status |
//! | `cembed ingest <file.jsonl>` | Enrich, embed, and store chunks |
//! | `cembed search "<query>"` | Similarity search over a corpus |
//! | `cembed corpora` | Dimension, model, and size of each corpus |
//!
//! Set `CEMBED_LOG` (e.g. `CEMBED_LOG=debug`) for diagnostic logs on stderr.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use context_embed::config;
use context_embed::models::Corpus;
use context_embed::progress::ProgressMode;
use context_embed::{corpora, embed_cmd, ingest, migrate, search};
use tracing_subscriber::EnvFilter;

/// Embedding generation and vector retrieval over document chunks and code
/// examples.
#[derive(Parser)]
#[command(name = "cembed", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cembed.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Embed one or more texts and print the result for each.
    Embed {
        /// Texts to embed. Duplicates are sent to the provider once.
        #[arg(required = true)]
        texts: Vec<String>,

        /// Cancel outstanding work after this many milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ingest chunks from a JSONL file.
    ///
    /// Each line: `{"url": ..., "chunk_number": ..., "content": ...,
    /// "metadata"?: {...}, "title"?: ..., "full_document"?: ...}`.
    /// Existing records for the same URLs are replaced.
    Ingest {
        file: PathBuf,

        /// Target corpus: `documents` or `code_examples` (`code`).
        #[arg(long, default_value = "documents")]
        corpus: Corpus,

        /// Progress on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Similarity search over a corpus.
    Search {
        query: String,

        #[arg(long, default_value = "documents")]
        corpus: Corpus,

        /// Maximum results. Defaults to `retrieval.top_k`.
        #[arg(long)]
        top_k: Option<usize>,

        /// Minimum cosine similarity in [0, 1]. Defaults to
        /// `retrieval.similarity_threshold`.
        #[arg(long)]
        threshold: Option<f32>,

        /// Exact-match metadata filter, `key=value`. Repeatable.
        #[arg(long = "filter")]
        filters: Vec<String>,

        /// Print hits as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show each corpus's dimension, model, and item count.
    Corpora {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env("CEMBED_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Embed {
            texts,
            timeout_ms,
            json,
        } => {
            embed_cmd::run_embed(&cfg, &texts, timeout_ms.map(Duration::from_millis), json)
                .await?;
        }
        Commands::Ingest {
            file,
            corpus,
            progress,
            json,
        } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_ingest(&cfg, &file, corpus, progress, json).await?;
        }
        Commands::Search {
            query,
            corpus,
            top_k,
            threshold,
            filters,
            json,
        } => {
            search::run_search(&cfg, &query, corpus, top_k, threshold, &filters, json).await?;
        }
        Commands::Corpora { json } => {
            corpora::run_corpora(&cfg, json).await?;
        }
    }

    Ok(())
}
