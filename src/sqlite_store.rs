//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation onto the tables created by
//! [`migrate`](crate::migrate): `documents`, `segments`, `schemas`, and
//! `statement_results`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docgraph_core::models::{
    Document, DocumentStatus, GeneratedStatementResult, ResultStatus, Segment, SegmentStatus,
};
use docgraph_core::schema::GraphSchema;
use docgraph_core::store::{Store, StoreStats};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const DOCUMENT_COLUMNS: &str = "id, filename, mime_type, size_bytes, content_hash, status, \
     error_message, text, segment_count, segments_ingested, created_at, updated_at";

const RESULT_COLUMNS: &str = "r.id, r.document_id, r.segment_id, r.raw_text, r.corrected_text, \
     r.status, r.error_message, r.execution_ms, r.nodes_created, r.relationships_created, \
     r.created_at, r.updated_at";

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    Ok(Document {
        id: row.get("id"),
        filename: row.get("filename"),
        mime_type: row.get("mime_type"),
        size_bytes: row.get("size_bytes"),
        content_hash: row.get("content_hash"),
        status: status.parse()?,
        error_message: row.get("error_message"),
        text: row.get("text"),
        segment_count: row.get("segment_count"),
        segments_ingested: row.get("segments_ingested"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn segment_from_row(row: &SqliteRow) -> Result<Segment> {
    let status: String = row.get("status");
    Ok(Segment {
        id: row.get("id"),
        document_id: row.get("document_id"),
        index: row.get("segment_index"),
        text: row.get("text"),
        word_start: row.get("word_start"),
        word_end: row.get("word_end"),
        word_count: row.get("word_count"),
        status: status.parse()?,
        error_message: row.get("error_message"),
    })
}

fn result_from_row(row: &SqliteRow) -> Result<GeneratedStatementResult> {
    let status: String = row.get("status");
    Ok(GeneratedStatementResult {
        id: row.get("id"),
        document_id: row.get("document_id"),
        segment_id: row.get("segment_id"),
        raw_text: row.get("raw_text"),
        corrected_text: row.get("corrected_text"),
        status: status.parse()?,
        error_message: row.get("error_message"),
        execution_ms: row.get("execution_ms"),
        nodes_created: row.get("nodes_created"),
        relationships_created: row.get("relationships_created"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_document(&self, doc: &Document, source: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, mime_type, size_bytes, content_hash, source,
                                   status, error_message, text, segment_count,
                                   segments_ingested, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.filename)
        .bind(&doc.mime_type)
        .bind(doc.size_bytes)
        .bind(&doc.content_hash)
        .bind(source)
        .bind(doc.status.as_str())
        .bind(&doc.error_message)
        .bind(&doc.text)
        .bind(doc.segment_count)
        .bind(doc.segments_ingested)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert document {}", doc.filename))?;
        Ok(())
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE content_hash = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(document_from_row).transpose()
    }

    async fn get_source(&self, id: &str) -> Result<Option<Vec<u8>>> {
        let source: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT source FROM documents WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(source)
    }

    async fn list_documents(&self, statuses: &[DocumentStatus]) -> Result<Vec<Document>> {
        let mut sql = format!("SELECT {} FROM documents", DOCUMENT_COLUMNS);
        if !statuses.is_empty() {
            let placeholders = vec!["?"; statuses.len()].join(", ");
            sql.push_str(&format!(" WHERE status IN ({})", placeholders));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn update_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE documents SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if updated.rows_affected() == 0 {
            bail!("document not found: {}", id);
        }
        Ok(())
    }

    async fn set_document_text(&self, id: &str, text: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET text = ?, updated_at = ? WHERE id = ?")
            .bind(text)
            .bind(chrono::Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_segment_progress(
        &self,
        id: &str,
        segment_count: i64,
        segments_ingested: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET segment_count = ?, segments_ingested = ?, updated_at = ? WHERE id = ?",
        )
        .bind(segment_count)
        .bind(segments_ingested)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_segments(&self, document_id: &str, segments: &[Segment]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM statement_results WHERE segment_id IN (SELECT id FROM segments WHERE document_id = ?)",
        )
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM segments WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for segment in segments {
            sqlx::query(
                r#"
                INSERT INTO segments (id, document_id, segment_index, text, word_start,
                                      word_end, word_count, status, error_message)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&segment.id)
            .bind(&segment.document_id)
            .bind(segment.index)
            .bind(&segment.text)
            .bind(segment.word_start)
            .bind(segment.word_end)
            .bind(segment.word_count)
            .bind(segment.status.as_str())
            .bind(&segment.error_message)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_segments(&self, document_id: &str) -> Result<Vec<Segment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, segment_index, text, word_start, word_end, word_count,
                   status, error_message
            FROM segments WHERE document_id = ? ORDER BY segment_index ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(segment_from_row).collect()
    }

    async fn update_segment_status(
        &self,
        id: &str,
        status: SegmentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let updated = sqlx::query("UPDATE segments SET status = ?, error_message = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error_message)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if updated.rows_affected() == 0 {
            bail!("segment not found: {}", id);
        }
        Ok(())
    }

    async fn get_schema(&self, document_id: &str) -> Result<Option<GraphSchema>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT schema_json FROM schemas WHERE document_id = ?")
                .bind(document_id)
                .fetch_optional(&self.pool)
                .await?;
        json.map(|j| {
            serde_json::from_str(&j)
                .with_context(|| format!("Corrupt schema for document {}", document_id))
        })
        .transpose()
    }

    async fn save_schema(&self, document_id: &str, schema: &GraphSchema) -> Result<()> {
        sqlx::query("INSERT INTO schemas (document_id, schema_json, created_at) VALUES (?, ?, ?)")
            .bind(document_id)
            .bind(serde_json::to_string(schema)?)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to save schema for document {}", document_id))?;
        Ok(())
    }

    async fn upsert_result(&self, result: &GeneratedStatementResult) -> Result<()> {
        // Whole-document and segment results never coexist.
        let other_mode: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM statement_results
            WHERE document_id = ? AND id != ? AND (segment_id IS NULL) != (? IS NULL)
            "#,
        )
        .bind(&result.document_id)
        .bind(&result.id)
        .bind(&result.segment_id)
        .fetch_one(&self.pool)
        .await?;
        if other_mode > 0 {
            bail!(
                "document {} already has results for a different generation mode",
                result.document_id
            );
        }

        sqlx::query(
            r#"
            INSERT INTO statement_results (id, document_id, segment_id, raw_text, corrected_text,
                                           status, error_message, execution_ms, nodes_created,
                                           relationships_created, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                raw_text = excluded.raw_text,
                corrected_text = excluded.corrected_text,
                status = excluded.status,
                error_message = excluded.error_message,
                execution_ms = excluded.execution_ms,
                nodes_created = excluded.nodes_created,
                relationships_created = excluded.relationships_created,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&result.id)
        .bind(&result.document_id)
        .bind(&result.segment_id)
        .bind(&result.raw_text)
        .bind(&result.corrected_text)
        .bind(result.status.as_str())
        .bind(&result.error_message)
        .bind(result.execution_ms)
        .bind(result.nodes_created)
        .bind(result.relationships_created)
        .bind(result.created_at)
        .bind(result.updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to save result for document {}", result.document_id))?;
        Ok(())
    }

    async fn list_results(&self, document_id: &str) -> Result<Vec<GeneratedStatementResult>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM statement_results r
            LEFT JOIN segments s ON s.id = r.segment_id
            WHERE r.document_id = ?
            ORDER BY COALESCE(s.segment_index, -1) ASC
            "#,
            RESULT_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(result_from_row).collect()
    }

    async fn delete_artifacts(&self, document_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM statement_results WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM segments WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE documents SET segment_count = 0, segments_ingested = 0, updated_at = ? WHERE id = ?",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_pending_results(&self, document_id: &str) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM statement_results WHERE document_id = ? AND status != ?")
            .bind(document_id)
            .bind(ResultStatus::Executed.as_str())
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let status_rows = sqlx::query(
            "SELECT status, COUNT(*) AS cnt FROM documents GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        let documents_by_status: Vec<(String, i64)> = status_rows
            .iter()
            .map(|row| (row.get("status"), row.get("cnt")))
            .collect();

        let total_documents = documents_by_status.iter().map(|(_, n)| n).sum();

        let segment_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN status = 'ingested' THEN 1 ELSE 0 END), 0) AS ingested
            FROM segments
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let result_row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN status = 'executed' THEN 1 ELSE 0 END), 0) AS executed,
                   COALESCE(SUM(nodes_created), 0) AS nodes,
                   COALESCE(SUM(relationships_created), 0) AS rels
            FROM statement_results
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            documents_by_status,
            total_documents,
            total_segments: segment_row.get("total"),
            segments_ingested: segment_row.get("ingested"),
            total_results: result_row.get("total"),
            results_executed: result_row.get("executed"),
            nodes_created: result_row.get("nodes"),
            relationships_created: result_row.get("rels"),
        })
    }
}
