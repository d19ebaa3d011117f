//! Ingestion: apply corrected statement programs to the graph store.
//!
//! A program is split on `;` (quote-aware), partitioned into schema
//! statements (constraint/index create or drop) and data statements, and
//! applied in three steps:
//!
//! 1. Every data statement is checked with [`GraphStore::explain`]. Any
//!    failure aborts before the graph is touched.
//! 2. Schema statements run one at a time outside a transaction. An
//!    "already exists" error is expected on reruns and ignored; other
//!    errors are logged and the next statement runs.
//! 3. Data statements run in order inside one transaction. The first
//!    failure rolls the whole transaction back. Transient failures
//!    (conflict, unavailable, timeout) rerun the transaction under the
//!    retry policy.
//!
//! [`IngestionEngine::ingest_document`] applies this per whole-document
//! result or per segment result and persists the outcome of each.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use docgraph_core::graph::{GraphError, GraphStore, MutationSummary};
use docgraph_core::models::{
    Document, GeneratedStatementResult, MutationCounts, ResultStatus, SegmentStatus,
};
use docgraph_core::statement::{is_schema_statement, split_statements};
use docgraph_core::store::Store;

use crate::error::PipelineError;
use crate::retry::{execute, RetryPolicy};

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    /// A data statement failed the explain check; nothing was written.
    #[error("statement failed validation: {source} (statement: {statement})")]
    Validation {
        statement: String,
        #[source]
        source: GraphError,
    },

    /// A data statement failed inside the transaction, which was rolled back.
    #[error("statement failed: {source} (statement: {statement})")]
    Transaction {
        statement: String,
        #[source]
        source: GraphError,
    },

    /// Failure not tied to a statement: begin, unreachable server.
    #[error(transparent)]
    Graph(GraphError),
}

impl IngestionError {
    pub fn is_transient(&self) -> bool {
        match self {
            IngestionError::Validation { .. } => false,
            IngestionError::Transaction { source, .. } | IngestionError::Graph(source) => {
                source.is_transient()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Schema,
    Data,
}

pub fn classify_statement(statement: &str) -> StatementKind {
    if is_schema_statement(statement) {
        StatementKind::Schema
    } else {
        StatementKind::Data
    }
}

/// What one program run did to the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub summary: MutationSummary,
    pub schema_statements: usize,
    pub data_statements: usize,
}

impl IngestOutcome {
    pub fn counts(&self) -> MutationCounts {
        MutationCounts {
            nodes_created: self.summary.nodes_created,
            relationships_created: self.summary.relationships_created,
        }
    }
}

struct Partitioned {
    schema: Vec<String>,
    data: Vec<String>,
}

fn partition(program: &str) -> Partitioned {
    let mut parts = Partitioned {
        schema: Vec::new(),
        data: Vec::new(),
    };
    for statement in split_statements(program) {
        match classify_statement(&statement) {
            StatementKind::Schema => parts.schema.push(statement),
            StatementKind::Data => parts.data.push(statement),
        }
    }
    parts
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, GraphError>>,
) -> Result<T, GraphError> {
    tokio::time::timeout(limit, fut)
        .await
        .unwrap_or(Err(GraphError::Timeout))
}

pub struct IngestionEngine {
    graph: Arc<dyn GraphStore>,
    store: Arc<dyn Store>,
    policy: RetryPolicy<IngestionError>,
    timeout: Duration,
}

impl IngestionEngine {
    /// `policy` supplies the backoff timing; retries are decided by
    /// [`IngestionError::is_transient`]. `timeout` bounds each graph call.
    pub fn new(
        graph: Arc<dyn GraphStore>,
        store: Arc<dyn Store>,
        policy: &RetryPolicy<PipelineError>,
        timeout: Duration,
    ) -> Self {
        Self {
            graph,
            store,
            policy: policy.with_classifier(IngestionError::is_transient),
            timeout,
        }
    }

    /// Explain every data statement in `program`.
    pub async fn validate(&self, program: &str) -> Result<(), IngestionError> {
        self.validate_statements(&partition(program).data).await
    }

    async fn validate_statements(&self, data: &[String]) -> Result<(), IngestionError> {
        for statement in data {
            let checked = execute(&self.policy, || async {
                bounded(self.timeout, self.graph.explain(statement))
                    .await
                    .map_err(IngestionError::Graph)
            })
            .await;
            match checked {
                Ok(()) => {}
                Err(IngestionError::Graph(source)) if !source.is_transient() => {
                    return Err(IngestionError::Validation {
                        statement: statement.clone(),
                        source,
                    });
                }
                Err(other) => return Err(other),
            }
        }
        Ok(())
    }

    /// Validate and apply a corrected program.
    pub async fn execute_program(&self, program: &str) -> Result<IngestOutcome, IngestionError> {
        let parts = partition(program);
        self.validate_statements(&parts.data).await?;
        self.apply(&parts).await
    }

    /// Apply an already validated program: schema statements, then the
    /// data transaction.
    async fn apply(&self, parts: &Partitioned) -> Result<IngestOutcome, IngestionError> {
        let mut outcome = IngestOutcome {
            schema_statements: parts.schema.len(),
            data_statements: parts.data.len(),
            ..IngestOutcome::default()
        };

        for statement in &parts.schema {
            match bounded(self.timeout, self.graph.run_schema_statement(statement)).await {
                Ok(summary) => outcome.summary.add(&summary),
                Err(GraphError::SchemaExists(_)) => {
                    debug!(statement = %statement, "schema rule already exists");
                }
                Err(e) => warn!(statement = %statement, error = %e, "schema statement failed; continuing"),
            }
        }

        if !parts.data.is_empty() {
            let summary = execute(&self.policy, || self.run_transaction(&parts.data)).await?;
            outcome.summary.add(&summary);
        }
        Ok(outcome)
    }

    async fn run_transaction(&self, data: &[String]) -> Result<MutationSummary, IngestionError> {
        let mut tx = bounded(self.timeout, self.graph.begin())
            .await
            .map_err(IngestionError::Graph)?;
        let mut total = MutationSummary::default();
        for statement in data {
            match bounded(self.timeout, tx.run(statement)).await {
                Ok(summary) => {
                    debug!(statement = %statement, nodes = summary.nodes_created, "statement applied");
                    total.add(&summary);
                }
                Err(source) => {
                    // The server may already have discarded the transaction.
                    if let Err(e) = bounded(self.timeout, tx.rollback()).await {
                        warn!(error = %e, "rollback failed");
                    }
                    return Err(IngestionError::Transaction {
                        statement: statement.clone(),
                        source,
                    });
                }
            }
        }
        bounded(self.timeout, tx.commit())
            .await
            .map_err(|source| IngestionError::Transaction {
                statement: "COMMIT".to_string(),
                source,
            })?;
        Ok(total)
    }

    /// Apply every result of `document` that has not been executed yet.
    ///
    /// A result that fails validation is marked `error`. One that validated
    /// but failed to apply stays `validated` with its error message set.
    ///
    /// Whole-document mode applies the single result atomically. Chunked
    /// mode applies each segment's result in its own transaction; a failed
    /// segment does not stop the rest. Each outcome is persisted on the
    /// result and its segment. Returns the counts created by this call, or
    /// the first failure once every pending result was attempted.
    pub async fn ingest_document(&self, document: &Document) -> Result<MutationCounts, PipelineError> {
        let results = self.store.list_results(&document.id).await?;
        if results.is_empty() {
            return Err(PipelineError::NotFound(format!(
                "no generated statements for document {}",
                document.id
            )));
        }

        let mut counts = MutationCounts::default();
        let mut first_error: Option<PipelineError> = None;
        for result in results {
            if result.status == ResultStatus::Executed {
                continue;
            }
            match self.ingest_result(result).await {
                Ok(created) => counts.add(created),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        let segments = self.store.list_segments(&document.id).await?;
        if !segments.is_empty() {
            let ingested = segments
                .iter()
                .filter(|s| s.status == SegmentStatus::Ingested)
                .count() as i64;
            self.store
                .set_segment_progress(&document.id, segments.len() as i64, ingested)
                .await?;
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(
                    document_id = %document.id,
                    nodes = counts.nodes_created,
                    relationships = counts.relationships_created,
                    "document ingested"
                );
                Ok(counts)
            }
        }
    }

    async fn ingest_result(
        &self,
        mut result: GeneratedStatementResult,
    ) -> Result<MutationCounts, PipelineError> {
        let segment_id = result.segment_id.clone();
        if let Some(id) = &segment_id {
            self.store
                .update_segment_status(id, SegmentStatus::Ingesting, None)
                .await?;
        }

        let started = Instant::now();
        let parts = partition(&result.corrected_text);
        let applied = match self.validate_statements(&parts.data).await {
            Ok(()) => {
                result.status = ResultStatus::Validated;
                result.updated_at = chrono::Utc::now().timestamp();
                self.store.upsert_result(&result).await?;
                self.apply(&parts).await
            }
            Err(e) => Err(e),
        };
        result.execution_ms = Some(started.elapsed().as_millis() as i64);
        result.updated_at = chrono::Utc::now().timestamp();

        match applied {
            Ok(outcome) => {
                let counts = outcome.counts();
                result.status = ResultStatus::Executed;
                result.error_message = None;
                result.nodes_created = counts.nodes_created;
                result.relationships_created = counts.relationships_created;
                self.store.upsert_result(&result).await?;
                if let Some(id) = &segment_id {
                    self.store
                        .update_segment_status(id, SegmentStatus::Ingested, None)
                        .await?;
                }
                Ok(counts)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(
                    document_id = %result.document_id,
                    segment_id = segment_id.as_deref().unwrap_or("-"),
                    error = %message,
                    "ingestion failed"
                );
                // Validated statements that failed to apply are kept for
                // another ingestion attempt; unusable ones are regenerated.
                if matches!(e, IngestionError::Validation { .. }) {
                    result.status = ResultStatus::Error;
                }
                result.error_message = Some(message.clone());
                self.store.upsert_result(&result).await?;
                if let Some(id) = &segment_id {
                    self.store
                        .update_segment_status(id, SegmentStatus::Error, Some(&message))
                        .await?;
                }
                Err(e.into())
            }
        }
    }
}
