//! Persistence abstraction for pipeline state.
//!
//! The [`Store`] trait holds everything the orchestrator needs to resume a
//! document after a crash or a failed stage: the document row and its
//! source bytes, segments, the extracted schema, and generated statement
//! results.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::{Document, DocumentStatus, GeneratedStatementResult, Segment, SegmentStatus};
use crate::schema::GraphSchema;

/// Aggregate counters for the `stats` command.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    /// `(status, count)` for every status with at least one document.
    pub documents_by_status: Vec<(String, i64)>,
    pub total_documents: i64,
    pub total_segments: i64,
    pub segments_ingested: i64,
    pub total_results: i64,
    pub results_executed: i64,
    pub nodes_created: i64,
    pub relationships_created: i64,
}

/// Abstract storage backend for documents and pipeline artifacts.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_document`](Store::insert_document) | Store a new document with its source bytes |
/// | [`find_by_hash`](Store::find_by_hash) | Look up a document by content hash |
/// | [`get_document`](Store::get_document) / [`list_documents`](Store::list_documents) | Read documents |
/// | [`update_document_status`](Store::update_document_status) | Record a lifecycle transition |
/// | [`replace_segments`](Store::replace_segments) | Store the chunker output for a document |
/// | [`save_schema`](Store::save_schema) / [`get_schema`](Store::get_schema) | The per-document schema |
/// | [`upsert_result`](Store::upsert_result) | Insert or update a generated statement result |
/// | [`delete_artifacts`](Store::delete_artifacts) | Drop segments and results when the generation mode changes |
/// | [`delete_pending_results`](Store::delete_pending_results) | Drop unexecuted results after a rejected review |
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_document(&self, doc: &Document, source: &[u8]) -> Result<()>;

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<Document>>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Original uploaded bytes; only the parse stage reads them.
    async fn get_source(&self, id: &str) -> Result<Option<Vec<u8>>>;

    /// Documents ordered by creation time, optionally filtered by status.
    async fn list_documents(&self, statuses: &[DocumentStatus]) -> Result<Vec<Document>>;

    async fn update_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    async fn set_document_text(&self, id: &str, text: &str) -> Result<()>;

    async fn set_segment_progress(
        &self,
        id: &str,
        segment_count: i64,
        segments_ingested: i64,
    ) -> Result<()>;

    /// Replace all segments for a document.
    async fn replace_segments(&self, document_id: &str, segments: &[Segment]) -> Result<()>;

    /// Segments ordered by index.
    async fn list_segments(&self, document_id: &str) -> Result<Vec<Segment>>;

    async fn update_segment_status(
        &self,
        id: &str,
        status: SegmentStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    async fn get_schema(&self, document_id: &str) -> Result<Option<GraphSchema>>;

    /// Store the schema for a document. Fails if one already exists.
    async fn save_schema(&self, document_id: &str, schema: &GraphSchema) -> Result<()>;

    /// Insert a result, or update it in place when the id already exists.
    ///
    /// A document holds either one whole-document result or segment
    /// results, never both, and at most one result per segment.
    async fn upsert_result(&self, result: &GeneratedStatementResult) -> Result<()>;

    /// Results for a document, whole-document result first, then by segment index.
    async fn list_results(&self, document_id: &str) -> Result<Vec<GeneratedStatementResult>>;

    /// Delete segments and results (the schema and text are kept).
    async fn delete_artifacts(&self, document_id: &str) -> Result<()>;

    /// Delete every result that has not been executed and return how many
    /// were removed. Executed results and all segments are kept.
    async fn delete_pending_results(&self, document_id: &str) -> Result<u64>;

    async fn stats(&self) -> Result<StoreStats>;
}
