//! In-memory [`Store`] implementation for testing.
//!
//! Everything lives in one `RwLock`-guarded struct so multi-table updates
//! (artifact deletion, result upserts) are atomic with respect to readers.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{
    Document, DocumentStatus, GeneratedStatementResult, ResultStatus, Segment, SegmentStatus,
};
use crate::schema::GraphSchema;

use super::{Store, StoreStats};

#[derive(Default)]
struct State {
    docs: Vec<Document>,
    sources: HashMap<String, Vec<u8>>,
    segments: Vec<Segment>,
    schemas: HashMap<String, GraphSchema>,
    results: Vec<GeneratedStatementResult>,
}

/// In-memory store for tests and one-shot runs.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn segment_index(state: &State, segment_id: Option<&str>) -> i64 {
    segment_id
        .and_then(|id| state.segments.iter().find(|s| s.id == id))
        .map(|s| s.index)
        .unwrap_or(-1)
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_document(&self, doc: &Document, source: &[u8]) -> Result<()> {
        let mut state = self.write()?;
        if state.docs.iter().any(|d| d.id == doc.id) {
            bail!("document {} already exists", doc.id);
        }
        state.docs.push(doc.clone());
        state.sources.insert(doc.id.clone(), source.to_vec());
        Ok(())
    }

    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        let state = self.read()?;
        Ok(state
            .docs
            .iter()
            .find(|d| d.content_hash == content_hash)
            .cloned())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.read()?.docs.iter().find(|d| d.id == id).cloned())
    }

    async fn get_source(&self, id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.sources.get(id).cloned())
    }

    async fn list_documents(&self, statuses: &[DocumentStatus]) -> Result<Vec<Document>> {
        let state = self.read()?;
        let mut docs: Vec<Document> = state
            .docs
            .iter()
            .filter(|d| statuses.is_empty() || statuses.contains(&d.status))
            .cloned()
            .collect();
        docs.sort_by_key(|d| d.created_at);
        Ok(docs)
    }

    async fn update_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut state = self.write()?;
        let doc = state
            .docs
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| anyhow!("document not found: {}", id))?;
        doc.status = status;
        doc.error_message = error_message.map(str::to_string);
        doc.updated_at = now();
        Ok(())
    }

    async fn set_document_text(&self, id: &str, text: &str) -> Result<()> {
        let mut state = self.write()?;
        let doc = state
            .docs
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| anyhow!("document not found: {}", id))?;
        doc.text = Some(text.to_string());
        doc.updated_at = now();
        Ok(())
    }

    async fn set_segment_progress(
        &self,
        id: &str,
        segment_count: i64,
        segments_ingested: i64,
    ) -> Result<()> {
        let mut state = self.write()?;
        let doc = state
            .docs
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or_else(|| anyhow!("document not found: {}", id))?;
        doc.segment_count = segment_count;
        doc.segments_ingested = segments_ingested;
        doc.updated_at = now();
        Ok(())
    }

    async fn replace_segments(&self, document_id: &str, segments: &[Segment]) -> Result<()> {
        let mut state = self.write()?;
        state.segments.retain(|s| s.document_id != document_id);
        state.segments.extend(segments.iter().cloned());
        Ok(())
    }

    async fn list_segments(&self, document_id: &str) -> Result<Vec<Segment>> {
        let state = self.read()?;
        let mut segments: Vec<Segment> = state
            .segments
            .iter()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect();
        segments.sort_by_key(|s| s.index);
        Ok(segments)
    }

    async fn update_segment_status(
        &self,
        id: &str,
        status: SegmentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut state = self.write()?;
        let segment = state
            .segments
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| anyhow!("segment not found: {}", id))?;
        segment.status = status;
        segment.error_message = error_message.map(str::to_string);
        Ok(())
    }

    async fn get_schema(&self, document_id: &str) -> Result<Option<GraphSchema>> {
        Ok(self.read()?.schemas.get(document_id).cloned())
    }

    async fn save_schema(&self, document_id: &str, schema: &GraphSchema) -> Result<()> {
        let mut state = self.write()?;
        if state.schemas.contains_key(document_id) {
            bail!("schema already exists for document {}", document_id);
        }
        state
            .schemas
            .insert(document_id.to_string(), schema.clone());
        Ok(())
    }

    async fn upsert_result(&self, result: &GeneratedStatementResult) -> Result<()> {
        let mut state = self.write()?;
        let conflict = state.results.iter().find(|r| {
            r.id != result.id
                && r.document_id == result.document_id
                && (r.segment_id == result.segment_id
                    || r.segment_id.is_none() != result.segment_id.is_none())
        });
        if let Some(existing) = conflict {
            bail!(
                "document {} already has a result for {}",
                result.document_id,
                existing.segment_id.as_deref().unwrap_or("the whole document")
            );
        }
        match state.results.iter_mut().find(|r| r.id == result.id) {
            Some(existing) => *existing = result.clone(),
            None => state.results.push(result.clone()),
        }
        Ok(())
    }

    async fn list_results(&self, document_id: &str) -> Result<Vec<GeneratedStatementResult>> {
        let state = self.read()?;
        let mut results: Vec<GeneratedStatementResult> = state
            .results
            .iter()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect();
        results.sort_by_key(|r| segment_index(&state, r.segment_id.as_deref()));
        Ok(results)
    }

    async fn delete_artifacts(&self, document_id: &str) -> Result<()> {
        let mut state = self.write()?;
        state.results.retain(|r| r.document_id != document_id);
        state.segments.retain(|s| s.document_id != document_id);
        if let Some(doc) = state.docs.iter_mut().find(|d| d.id == document_id) {
            doc.segment_count = 0;
            doc.segments_ingested = 0;
        }
        Ok(())
    }

    async fn delete_pending_results(&self, document_id: &str) -> Result<u64> {
        let mut state = self.write()?;
        let before = state.results.len();
        state
            .results
            .retain(|r| r.document_id != document_id || r.status == ResultStatus::Executed);
        Ok((before - state.results.len()) as u64)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let state = self.read()?;
        let mut stats = StoreStats {
            total_documents: state.docs.len() as i64,
            total_segments: state.segments.len() as i64,
            total_results: state.results.len() as i64,
            ..StoreStats::default()
        };
        for status in DocumentStatus::ALL {
            let count = state.docs.iter().filter(|d| d.status == status).count() as i64;
            if count > 0 {
                stats.documents_by_status.push((status.to_string(), count));
            }
        }
        stats.segments_ingested = state
            .segments
            .iter()
            .filter(|s| s.status == SegmentStatus::Ingested)
            .count() as i64;
        for result in &state.results {
            if result.status == ResultStatus::Executed {
                stats.results_executed += 1;
            }
            stats.nodes_created += result.nodes_created;
            stats.relationships_created += result.relationships_created;
        }
        Ok(stats)
    }
}
