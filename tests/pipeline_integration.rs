//! End-to-end pipeline runs against the in-memory store and graph with a
//! scripted text generator.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use docgraph::error::PipelineError;
use docgraph::pipeline::{ApprovalGate, PipelineOrchestrator, PipelineSettings, ProcessOutcome, REJECTED_MESSAGE};
use docgraph::prompts::{QUERY_SYSTEM_PROMPT, SCHEMA_SYSTEM_PROMPT};
use docgraph::query::QueryEngine;
use docgraph::retry::RetryPolicy;
use docgraph::submit::submit_document;
use docgraph_core::generate::{GenerationError, GenerationOptions, TextGenerator};
use docgraph_core::graph::memory::InMemoryGraphStore;
use docgraph_core::graph::{GraphError, GraphStore, GraphTransaction, MutationSummary, QueryRow};
use docgraph_core::metrics::InMemoryMetrics;
use docgraph_core::models::{
    Document, DocumentStatus, GeneratedStatementResult, GenerationMode, MutationCounts, NewDocument,
    ResultStatus, SegmentStatus, Stage,
};
use docgraph_core::store::memory::InMemoryStore;
use docgraph_core::store::Store;

const SCHEMA_JSON: &str = r#"Here is the schema:
{"nodes": {"Account": ["accountId", "accountType"], "Position": ["positionId", "quantity"], "Security": ["securityId"]},
 "relationships": [{"type": "HAS_POSITION", "from": "Account", "to": "Position"},
                   {"type": "IN_SECURITY", "from": "Position", "to": "Security"}]}"#;

// Uses an alias with the wrong direction for the position/security link.
const STATEMENTS: &str = r#"```cypher
MERGE (a:Account {accountId: "A-100", accountType: "IRA"}) MERGE (p:Position {positionId: "P-1", quantity: 10}) MERGE (s:Security {securityId: "AAPL"}) MERGE (a)-[:HAS_POSITION]->(p) MERGE (s)-[:HELD_IN_POSITION]->(p)
```"#;

const DOCUMENT_TEXT: &str = "Account A-100 is an IRA. It holds a position of 10 shares of AAPL.";

type Reply = Box<dyn Fn(&str, &str) -> Result<String, GenerationError> + Send + Sync>;

/// Answers by system prompt and counts calls.
struct Scripted {
    calls: AtomicUsize,
    reply: Reply,
}

impl Scripted {
    fn new(reply: impl Fn(&str, &str) -> Result<String, GenerationError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            reply: Box::new(reply),
        })
    }

    fn whole_document() -> Arc<Self> {
        Self::new(|system, _| {
            if system == SCHEMA_SYSTEM_PROMPT {
                Ok(SCHEMA_JSON.to_string())
            } else if system == QUERY_SYSTEM_PROMPT {
                Ok("```cypher\nMATCH (a:Account) RETURN a.accountId AS id, a.accountType AS type\n```".to_string())
            } else {
                Ok(STATEMENTS.to_string())
            }
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for Scripted {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.reply)(system_prompt, user_prompt)
    }
}

/// Fails every `begin` with a non-retryable error while `down` is set.
struct Outage {
    inner: InMemoryGraphStore,
    down: AtomicBool,
}

#[async_trait]
impl GraphStore for Outage {
    async fn explain(&self, statement: &str) -> Result<(), GraphError> {
        self.inner.explain(statement).await
    }

    async fn run_schema_statement(&self, statement: &str) -> Result<MutationSummary, GraphError> {
        self.inner.run_schema_statement(statement).await
    }

    async fn begin(&self) -> Result<Box<dyn GraphTransaction>, GraphError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(GraphError::Other("database is read-only".into()));
        }
        self.inner.begin().await
    }

    async fn query(&self, statement: &str) -> Result<Vec<QueryRow>, GraphError> {
        self.inner.query(statement).await
    }
}

/// Lets `begins_left` transactions start, then fails every `begin`.
struct Budget {
    inner: InMemoryGraphStore,
    begins_left: AtomicUsize,
}

#[async_trait]
impl GraphStore for Budget {
    async fn explain(&self, statement: &str) -> Result<(), GraphError> {
        self.inner.explain(statement).await
    }

    async fn run_schema_statement(&self, statement: &str) -> Result<MutationSummary, GraphError> {
        self.inner.run_schema_statement(statement).await
    }

    async fn begin(&self) -> Result<Box<dyn GraphTransaction>, GraphError> {
        let allowed = self
            .begins_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return Err(GraphError::Other("database is read-only".into()));
        }
        self.inner.begin().await
    }

    async fn query(&self, statement: &str) -> Result<Vec<QueryRow>, GraphError> {
        self.inner.query(statement).await
    }
}

struct Reject;

#[async_trait]
impl ApprovalGate for Reject {
    async fn approve(&self, _document: &Document, _results: &[GeneratedStatementResult]) -> anyhow::Result<bool> {
        Ok(false)
    }
}

fn fast_retry() -> RetryPolicy<PipelineError> {
    RetryPolicy::default()
        .initial_delay(Duration::ZERO)
        .max_delay(Duration::ZERO)
}

fn orchestrator(
    store: &Arc<InMemoryStore>,
    graph: Arc<dyn GraphStore>,
    generator: &Arc<Scripted>,
) -> PipelineOrchestrator {
    PipelineOrchestrator::new(store.clone(), graph, generator.clone()).with_retry(fast_retry())
}

async fn submit(store: &InMemoryStore, filename: &str, text: &str) -> String {
    let submission = submit_document(
        store,
        NewDocument {
            filename: filename.to_string(),
            mime_type: "text/plain".to_string(),
            bytes: text.as_bytes().to_vec(),
        },
    )
    .await
    .unwrap();
    submission.document.id
}

#[tokio::test]
async fn test_whole_document_run_completes() {
    let store = Arc::new(InMemoryStore::new());
    let graph = InMemoryGraphStore::new();
    let generator = Scripted::whole_document();
    let metrics = Arc::new(InMemoryMetrics::new());
    let pipeline = orchestrator(&store, Arc::new(graph.clone()), &generator).with_metrics(metrics.clone());
    let id = submit(&store, "statement.txt", DOCUMENT_TEXT).await;

    let outcome = pipeline.process_document(&id, GenerationMode::Whole).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Completed {
            counts: MutationCounts {
                nodes_created: 3,
                relationships_created: 2
            }
        }
    );
    assert_eq!(generator.calls(), 2);
    assert!(graph.has_relationship("Account", "HAS_POSITION", "Position"));
    assert!(graph.has_relationship("Position", "IN_SECURITY", "Security"));
    assert!(!graph.constraint_names().is_empty());

    let doc = store.get_document(&id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Completed);
    assert!(doc.error_message.is_none());
    assert!(store.get_schema(&id).await.unwrap().is_some());

    let results = store.list_results(&id).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ResultStatus::Executed);
    assert!(results[0].corrected_text.contains("IN_SECURITY"));
    assert!(!results[0].corrected_text.contains("HELD_IN_POSITION"));
    assert_eq!(results[0].nodes_created, 3);

    let stages = metrics.snapshot();
    for stage in [Stage::Parse, Stage::ExtractSchema, Stage::Generate, Stage::Correct, Stage::Confirm, Stage::Ingest] {
        let stats = stages.get(&stage).unwrap_or_else(|| panic!("no samples for {}", stage));
        assert_eq!(stats.successes, 1, "stage {}", stage);
        assert_eq!(stats.failures, 0, "stage {}", stage);
    }

    let again = pipeline.process_document(&id, GenerationMode::Whole).await.unwrap();
    assert_eq!(again, ProcessOutcome::AlreadyCompleted);
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn test_unknown_document_is_not_found() {
    let store = Arc::new(InMemoryStore::new());
    let generator = Scripted::whole_document();
    let pipeline = orchestrator(&store, Arc::new(InMemoryGraphStore::new()), &generator);
    let err = pipeline
        .process_document("missing", GenerationMode::Whole)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn test_resume_after_ingest_failure_skips_generation() {
    let store = Arc::new(InMemoryStore::new());
    let graph = Arc::new(Outage {
        inner: InMemoryGraphStore::new(),
        down: AtomicBool::new(true),
    });
    let generator = Scripted::whole_document();
    let pipeline = orchestrator(&store, graph.clone(), &generator);
    let id = submit(&store, "statement.txt", DOCUMENT_TEXT).await;

    let err = pipeline
        .process_document(&id, GenerationMode::Whole)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Stage { stage: Stage::Ingest, .. }));
    let doc = store.get_document(&id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Error);
    assert!(doc.error_message.unwrap().contains("read-only"));
    let results = store.list_results(&id).await.unwrap();
    assert_eq!(results[0].status, ResultStatus::Validated);
    assert_eq!(generator.calls(), 2);

    graph.down.store(false, Ordering::SeqCst);
    let outcome = pipeline.process_document(&id, GenerationMode::Whole).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Completed { .. }));
    assert_eq!(generator.calls(), 2, "resumed run must not call the generator");
    assert_eq!(graph.inner.node_count(), 3);
}

#[tokio::test]
async fn test_rejected_review_discards_statements() {
    let store = Arc::new(InMemoryStore::new());
    let graph = InMemoryGraphStore::new();
    let generator = Scripted::whole_document();
    let id = submit(&store, "statement.txt", DOCUMENT_TEXT).await;

    let rejecting = orchestrator(&store, Arc::new(graph.clone()), &generator).with_approval(Arc::new(Reject));
    let outcome = rejecting.process_document(&id, GenerationMode::Whole).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Rejected);
    assert!(store.list_results(&id).await.unwrap().is_empty());
    assert_eq!(graph.node_count(), 0);
    let doc = store.get_document(&id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Error);
    assert_eq!(doc.error_message.as_deref(), Some(REJECTED_MESSAGE));

    // Schema survives the rejection; only statements are generated again.
    let approving = orchestrator(&store, Arc::new(graph.clone()), &generator);
    let outcome = approving.process_document(&id, GenerationMode::Whole).await.unwrap();
    assert!(matches!(outcome, ProcessOutcome::Completed { .. }));
    assert_eq!(generator.calls(), 3);
    assert_eq!(graph.node_count(), 3);
}

#[tokio::test]
async fn test_fence_only_reply_fails_generation() {
    let store = Arc::new(InMemoryStore::new());
    let graph = InMemoryGraphStore::new();
    let generator = Scripted::new(|system, _| {
        if system == SCHEMA_SYSTEM_PROMPT {
            Ok(SCHEMA_JSON.to_string())
        } else {
            Ok("```cypher\n```".to_string())
        }
    });
    let pipeline = orchestrator(&store, Arc::new(graph.clone()), &generator);
    let id = submit(&store, "statement.txt", DOCUMENT_TEXT).await;

    let err = pipeline
        .process_document(&id, GenerationMode::Whole)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Stage { stage: Stage::Generate, .. }));
    assert!(store.list_results(&id).await.unwrap().is_empty());
    let doc = store.get_document(&id).await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Error);
    assert!(doc.error_message.unwrap().contains("no statements"));
    assert_eq!(graph.node_count(), 0);
}

#[tokio::test]
async fn test_chunked_run_with_one_failing_chunk() {
    let store = Arc::new(InMemoryStore::new());
    let graph = InMemoryGraphStore::new();
    let part_two_down = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&part_two_down);
    let generator = Scripted::new(move |system, user| {
        if system == SCHEMA_SYSTEM_PROMPT {
            return Ok(SCHEMA_JSON.to_string());
        }
        if user.contains("part 1 of 3") {
            Ok(r#"MERGE (a:Account {accountId: "A-1"})"#.to_string())
        } else if user.contains("part 2 of 3") {
            if flag.load(Ordering::SeqCst) {
                Err(GenerationError::Request("prompt rejected".into()))
            } else {
                Ok(r#"MERGE (p:Position {positionId: "P-1"})"#.to_string())
            }
        } else {
            Ok(r#"MERGE (s:Security {securityId: "AAPL"})"#.to_string())
        }
    });
    let pipeline = orchestrator(&store, Arc::new(graph.clone()), &generator).with_settings(PipelineSettings {
        window_words: 10,
        overlap_words: 0,
        ..PipelineSettings::default()
    });
    let text = (1..=30).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
    let id = submit(&store, "positions.txt", &text).await;

    let err = pipeline
        .process_document(&id, GenerationMode::Chunked)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Stage { stage: Stage::Generate, .. }));
    let segments = store.list_segments(&id).await.unwrap();
    let statuses: Vec<SegmentStatus> = segments.iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![SegmentStatus::Generated, SegmentStatus::Error, SegmentStatus::Generated]
    );
    assert!(segments[1].error_message.is_some());
    assert_eq!(graph.node_count(), 0, "nothing is ingested while a chunk is missing");
    assert_eq!(generator.calls(), 4);

    part_two_down.store(false, Ordering::SeqCst);
    let outcome = pipeline.process_document(&id, GenerationMode::Chunked).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Completed {
            counts: MutationCounts {
                nodes_created: 3,
                relationships_created: 0
            }
        }
    );
    assert_eq!(generator.calls(), 5, "only the failed chunk is regenerated");

    let doc = store.get_document(&id).await.unwrap().unwrap();
    assert_eq!(doc.segment_count, 3);
    assert_eq!(doc.segments_ingested, 3);
    let results = store.list_results(&id).await.unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.status == ResultStatus::Executed));
}

#[tokio::test]
async fn test_rejection_keeps_chunks_already_ingested() {
    let store = Arc::new(InMemoryStore::new());
    let graph = Arc::new(Budget {
        inner: InMemoryGraphStore::new(),
        begins_left: AtomicUsize::new(1),
    });
    let generator = Scripted::new(|system, user| {
        if system == SCHEMA_SYSTEM_PROMPT {
            Ok(SCHEMA_JSON.to_string())
        } else if user.contains("part 1 of 2") {
            Ok(r#"MERGE (a:Account {accountId: "A-1"})"#.to_string())
        } else {
            Ok(r#"MERGE (p:Position {positionId: "P-1"})"#.to_string())
        }
    });
    let settings = PipelineSettings {
        window_words: 10,
        overlap_words: 0,
        ..PipelineSettings::default()
    };
    let text = (1..=20).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
    let id = submit(&store, "positions.txt", &text).await;

    let pipeline = orchestrator(&store, graph.clone(), &generator).with_settings(settings.clone());
    let err = pipeline
        .process_document(&id, GenerationMode::Chunked)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Stage { stage: Stage::Ingest, .. }));
    let statuses: Vec<ResultStatus> = store.list_results(&id).await.unwrap().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![ResultStatus::Executed, ResultStatus::Validated]);
    assert_eq!(graph.inner.node_count(), 1);

    let rejecting = orchestrator(&store, graph.clone(), &generator)
        .with_settings(settings.clone())
        .with_approval(Arc::new(Reject));
    let outcome = rejecting.process_document(&id, GenerationMode::Chunked).await.unwrap();
    assert_eq!(outcome, ProcessOutcome::Rejected);
    assert_eq!(generator.calls(), 3);

    let results = store.list_results(&id).await.unwrap();
    assert_eq!(results.len(), 1, "the executed chunk keeps its record");
    assert_eq!(results[0].status, ResultStatus::Executed);
    assert_eq!(results[0].nodes_created, 1);
    let segments = store.list_segments(&id).await.unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].status, SegmentStatus::Ingested);
    assert_eq!(segments[1].status, SegmentStatus::Error);
    assert_eq!(segments[1].error_message.as_deref(), Some(REJECTED_MESSAGE));
    assert_eq!(graph.inner.node_count(), 1);

    // Only the rejected chunk is generated and ingested again.
    graph.begins_left.store(usize::MAX, Ordering::SeqCst);
    let outcome = pipeline.process_document(&id, GenerationMode::Chunked).await.unwrap();
    assert_eq!(
        outcome,
        ProcessOutcome::Completed {
            counts: MutationCounts {
                nodes_created: 1,
                relationships_created: 0
            }
        }
    );
    assert_eq!(generator.calls(), 4);
    assert_eq!(graph.inner.node_count(), 2);
    let doc = store.get_document(&id).await.unwrap().unwrap();
    assert_eq!(doc.segments_ingested, 2);
}

#[tokio::test]
async fn test_switching_mode_discards_earlier_statements() {
    let store = Arc::new(InMemoryStore::new());
    let graph = Arc::new(Outage {
        inner: InMemoryGraphStore::new(),
        down: AtomicBool::new(true),
    });
    let generator = Scripted::whole_document();
    let pipeline = orchestrator(&store, graph.clone(), &generator);
    let id = submit(&store, "statement.txt", DOCUMENT_TEXT).await;

    assert!(pipeline.process_document(&id, GenerationMode::Whole).await.is_err());
    let whole = store.list_results(&id).await.unwrap();
    assert!(whole[0].segment_id.is_none());

    graph.down.store(false, Ordering::SeqCst);
    pipeline
        .process_document(&id, GenerationMode::Chunked)
        .await
        .unwrap();
    let results = store.list_results(&id).await.unwrap();
    assert!(!results.is_empty());
    assert!(results.iter().all(|r| r.segment_id.is_some()));
    assert!(results.iter().all(|r| r.id != whole[0].id));
}

#[tokio::test]
async fn test_process_pending_handles_each_document() {
    let store = Arc::new(InMemoryStore::new());
    let graph = InMemoryGraphStore::new();
    let generator = Scripted::whole_document();
    let pipeline = Arc::new(orchestrator(&store, Arc::new(graph.clone()), &generator));
    let first = submit(&store, "a.txt", DOCUMENT_TEXT).await;
    let second = submit(&store, "b.txt", "Account A-100 again, with the same AAPL position.").await;

    let outcomes = pipeline.process_pending(GenerationMode::Whole).await.unwrap();
    let ids: Vec<&str> = outcomes.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec![first.as_str(), second.as_str()]);
    for (id, outcome) in &outcomes {
        assert!(
            matches!(outcome, Ok(ProcessOutcome::Completed { .. })),
            "{} ended with {:?}",
            id,
            outcome
        );
    }
    // Both documents describe the same entities.
    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.relationship_count(), 2);

    let rerun = pipeline.process_pending(GenerationMode::Whole).await.unwrap();
    assert!(rerun.is_empty());
}

#[tokio::test]
async fn test_query_over_completed_documents() {
    let store = Arc::new(InMemoryStore::new());
    let graph = InMemoryGraphStore::new();
    let generator = Scripted::whole_document();
    let pipeline = orchestrator(&store, Arc::new(graph.clone()), &generator);
    let id = submit(&store, "statement.txt", DOCUMENT_TEXT).await;
    pipeline.process_document(&id, GenerationMode::Whole).await.unwrap();

    let engine = QueryEngine::new(
        store.clone(),
        Arc::new(graph.clone()),
        generator.clone(),
        GenerationOptions::default(),
        fast_retry(),
    );
    let schema = engine.combined_schema().await.unwrap();
    assert!(schema.properties("Account").is_some());

    let answer = engine.ask("Which accounts exist?").await.unwrap();
    assert_eq!(
        answer.statement,
        "MATCH (a:Account) RETURN a.accountId AS id, a.accountType AS type"
    );
    assert_eq!(answer.rows.len(), 1);
    assert_eq!(answer.rows[0]["id"], "A-100");
    assert_eq!(answer.rows[0]["type"], "IRA");
}
