//! Schema for the SQLite vector store.
//!
//! One table per corpus plus `corpus_meta`, which records the dimension and
//! model of the vectors already written to each corpus. Every statement is
//! idempotent, so `ensure_schema` runs on every open.

use anyhow::Result;
use sqlx::SqlitePool;

use context_embed_core::models::Corpus;

use crate::config::Config;
use crate::db;

/// Table holding a corpus's records.
pub fn table_name(corpus: Corpus) -> &'static str {
    match corpus {
        Corpus::Documents => "document_chunks",
        Corpus::CodeExamples => "code_examples",
    }
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    ensure_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    for corpus in Corpus::ALL {
        let table = table_name(corpus);

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                item_id TEXT PRIMARY KEY,
                url TEXT,
                source_id TEXT,
                content TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{{}}',
                embedding BLOB NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#
        ))
        .execute(pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_url ON {table}(url)"
        ))
        .execute(pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_source_id ON {table}(source_id)"
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS corpus_meta (
            corpus TEXT PRIMARY KEY,
            dims INTEGER NOT NULL,
            model TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
