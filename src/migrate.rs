use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Create documents table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            content_hash TEXT NOT NULL UNIQUE,
            source BLOB NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            text TEXT,
            segment_count INTEGER NOT NULL DEFAULT 0,
            segments_ingested INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create segments table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segments (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            segment_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            word_start INTEGER NOT NULL,
            word_end INTEGER NOT NULL,
            word_count INTEGER NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            UNIQUE(document_id, segment_index),
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One schema per document, written once
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schemas (
            document_id TEXT PRIMARY KEY,
            schema_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create statement results table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS statement_results (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            segment_id TEXT,
            raw_text TEXT NOT NULL,
            corrected_text TEXT NOT NULL,
            status TEXT NOT NULL,
            error_message TEXT,
            execution_ms INTEGER,
            nodes_created INTEGER NOT NULL DEFAULT 0,
            relationships_created INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(document_id, segment_id),
            FOREIGN KEY (document_id) REFERENCES documents(id),
            FOREIGN KEY (segment_id) REFERENCES segments(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // NULL segment_id escapes the UNIQUE above; one whole-document result at most
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_results_whole_document
        ON statement_results(document_id) WHERE segment_id IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_segments_document_id ON segments(document_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_results_document_id ON statement_results(document_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
