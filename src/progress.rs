//! Ingest progress reporting.
//!
//! Reports batch progress during `cembed ingest` so users see how much is
//! left. Progress is emitted on **stderr** so stdout remains parseable for
//! scripts.

use std::io::Write;

use context_embed_core::models::Corpus;

/// A single progress event for ingest.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// Existing records for the incoming URLs were removed.
    Replacing { corpus: Corpus, deleted: u64 },
    /// Batch `batch` of `batches` finished; `n` of `total` items processed.
    Batch {
        corpus: Corpus,
        batch: usize,
        batches: usize,
        n: u64,
        total: u64,
    },
}

/// Reports ingest progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest documents  batch 3/10  1,234 / 5,000 items".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Replacing { corpus, deleted } => {
                format!(
                    "ingest {}  replaced {} existing records\n",
                    corpus,
                    format_number(*deleted)
                )
            }
            IngestProgressEvent::Batch {
                corpus,
                batch,
                batches,
                n,
                total,
            } => format!(
                "ingest {}  batch {}/{}  {} / {} items\n",
                corpus,
                batch,
                batches,
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Replacing { corpus, deleted } => serde_json::json!({
                "event": "progress",
                "corpus": corpus,
                "phase": "replacing",
                "deleted": deleted
            }),
            IngestProgressEvent::Batch {
                corpus,
                batch,
                batches,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "corpus": corpus,
                "phase": "embedding",
                "batch": batch,
                "batches": batches,
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
