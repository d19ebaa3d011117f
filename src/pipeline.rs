//! Document pipeline orchestration.
//!
//! [`PipelineOrchestrator::process_document`] drives one document through
//! its lifecycle:
//!
//! ```text
//! parse → extract schema → generate (+ correct) → confirm → ingest
//! ```
//!
//! Every stage persists its artifact before the next one starts, and a
//! rerun starts from the first missing artifact: stored text skips
//! parsing, a stored schema skips extraction, usable statement results
//! skip generation, and executed results skip ingestion. A failing stage
//! records `error` with its message on the document, reports a failed
//! [`StageSample`], and stops the run.
//!
//! In chunked mode, generation runs concurrently across segments (bounded
//! by `generation_concurrency`) and ingestion runs segment by segment.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use docgraph_core::chunk::{chunk_words, segments_for_document};
use docgraph_core::generate::{GenerationOptions, TextGenerator};
use docgraph_core::graph::GraphStore;
use docgraph_core::metrics::{MetricsRecorder, NoopMetrics, StageSample};
use docgraph_core::models::{
    Document, DocumentStatus, GeneratedStatementResult, GenerationMode, MutationCounts,
    ResultStatus, Segment, SegmentStatus, Stage,
};
use docgraph_core::schema::GraphSchema;
use docgraph_core::statement::{split_statements, RuleSet, StatementCorrector};
use docgraph_core::store::Store;

use crate::config::{Config, CorrectionConfig};
use crate::error::PipelineError;
use crate::extract::{DefaultExtractor, TextExtractor};
use crate::ingest::IngestionEngine;
use crate::prompts::{statement_user_prompt, STATEMENT_SYSTEM_PROMPT};
use crate::retry::{deadline, execute, RetryPolicy};
use crate::schema_extract::extract_schema;

/// Error message recorded when a reviewer declines a document's statements.
pub const REJECTED_MESSAGE: &str = "statements rejected at review";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Completed { counts: MutationCounts },
    AlreadyCompleted,
    Rejected,
}

/// Decision point between statement generation and ingestion.
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Return `true` to ingest `results`, `false` to discard them.
    async fn approve(&self, document: &Document, results: &[GeneratedStatementResult])
        -> Result<bool>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalGate for AutoApprove {
    async fn approve(&self, _document: &Document, _results: &[GeneratedStatementResult]) -> Result<bool> {
        Ok(true)
    }
}

/// Prints the corrected statements and asks on the terminal.
///
/// Prompts are serialized so concurrent documents do not interleave.
#[derive(Debug, Default)]
pub struct TerminalApproval {
    prompt: tokio::sync::Mutex<()>,
}

impl TerminalApproval {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApprovalGate for TerminalApproval {
    async fn approve(&self, document: &Document, results: &[GeneratedStatementResult]) -> Result<bool> {
        let _turn = self.prompt.lock().await;
        println!("== {} ({}) ==", document.filename, document.id);
        for result in results {
            if let Some(segment_id) = &result.segment_id {
                println!("// segment {}", segment_id);
            }
            println!("{}", result.corrected_text);
        }
        let answer = tokio::task::spawn_blocking(|| -> std::io::Result<String> {
            eprint!("Ingest these statements into the graph? [y/N] ");
            std::io::stderr().flush()?;
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            Ok(line)
        })
        .await??;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

/// Sizing and deadlines for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub window_words: usize,
    pub overlap_words: usize,
    /// Documents processed at once by [`PipelineOrchestrator::process_pending`].
    pub workers: usize,
    pub generation_concurrency: usize,
    /// Bound on text extraction and on each graph call.
    pub stage_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            window_words: 800,
            overlap_words: 100,
            workers: 2,
            generation_concurrency: 4,
            stage_timeout: Duration::from_secs(60),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window_words: config.chunking.window_words,
            overlap_words: config.chunking.overlap_words,
            workers: config.pipeline.workers,
            generation_concurrency: config.pipeline.generation_concurrency,
            stage_timeout: config.pipeline.stage_timeout(),
        }
    }
}

/// Build the corrector from `[correction]`: the rules file if one is
/// configured, the financial rules otherwise.
pub fn load_corrector(config: &CorrectionConfig) -> Result<StatementCorrector> {
    let corrector = match &config.rules_path {
        Some(path) => StatementCorrector::new(load_rules(path)?)
            .with_context(|| format!("invalid rules in {}", path.display()))?,
        None => StatementCorrector::financial(),
    };
    Ok(corrector.with_completion(config.complete_required_links))
}

fn load_rules(path: &Path) -> Result<RuleSet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read rules file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse rules file: {}", path.display()))
}

/// Generates and stores statements for one unit of text.
#[derive(Clone)]
struct GenerationJob {
    store: Arc<dyn Store>,
    generator: Arc<dyn TextGenerator>,
    corrector: Arc<StatementCorrector>,
    metrics: Arc<dyn MetricsRecorder>,
    policy: RetryPolicy<PipelineError>,
    options: GenerationOptions,
    schema: Arc<GraphSchema>,
}

impl GenerationJob {
    /// Generate, correct, and store a result. `reuse_id` replaces an
    /// earlier unusable result in place.
    async fn run(
        &self,
        document_id: &str,
        text: &str,
        part: Option<(usize, usize)>,
        segment_id: Option<&str>,
        reuse_id: Option<String>,
    ) -> Result<(), PipelineError> {
        let prompt = statement_user_prompt(&self.schema, text, part);
        let raw = execute(&self.policy, || {
            deadline("statement generation", self.options.timeout, async {
                self.generator
                    .generate(STATEMENT_SYSTEM_PROMPT, &prompt, &self.options)
                    .await
                    .map_err(PipelineError::from)
            })
        })
        .await?;

        let started = Instant::now();
        let correction = self.corrector.correct(&raw, Some(&self.schema));
        self.metrics.record(StageSample {
            stage: Stage::Correct,
            document_id: document_id.to_string(),
            duration: started.elapsed(),
            success: correction.is_structured(),
        });
        if !correction.is_structured() {
            warn!(document_id, segment_id, "no node upserts recovered; keeping repaired text");
        }
        debug!(document_id, segment_id, report = ?correction.report, "statements corrected");
        if split_statements(&correction.text).is_empty() {
            return Err(PipelineError::PermanentRequest(
                "model returned no statements".to_string(),
            ));
        }

        let mut result = GeneratedStatementResult::new(document_id, segment_id, raw, correction.text);
        if let Some(id) = reuse_id {
            result.id = id;
        }
        self.store.upsert_result(&result).await?;
        Ok(())
    }

    async fn run_segment(
        &self,
        segment: Segment,
        total: usize,
        reuse_id: Option<String>,
    ) -> Result<(), PipelineError> {
        self.store
            .update_segment_status(&segment.id, SegmentStatus::Generating, None)
            .await?;
        let generated = self
            .run(
                &segment.document_id,
                &segment.text,
                Some((segment.index as usize, total)),
                Some(&segment.id),
                reuse_id,
            )
            .await;
        match generated {
            Ok(()) => {
                self.store
                    .update_segment_status(&segment.id, SegmentStatus::Generated, None)
                    .await?;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                warn!(segment_id = %segment.id, index = segment.index, error = %message, "segment generation failed");
                self.store
                    .update_segment_status(&segment.id, SegmentStatus::Error, Some(&message))
                    .await?;
                Err(e)
            }
        }
    }
}

pub struct PipelineOrchestrator {
    store: Arc<dyn Store>,
    graph: Arc<dyn GraphStore>,
    generator: Arc<dyn TextGenerator>,
    extractor: Arc<dyn TextExtractor>,
    corrector: Arc<StatementCorrector>,
    metrics: Arc<dyn MetricsRecorder>,
    approval: Arc<dyn ApprovalGate>,
    policy: RetryPolicy<PipelineError>,
    options: GenerationOptions,
    settings: PipelineSettings,
}

impl PipelineOrchestrator {
    /// Orchestrator with default extraction, financial correction rules,
    /// auto-approval, and no metrics.
    pub fn new(
        store: Arc<dyn Store>,
        graph: Arc<dyn GraphStore>,
        generator: Arc<dyn TextGenerator>,
    ) -> Self {
        Self {
            store,
            graph,
            generator,
            extractor: Arc::new(DefaultExtractor),
            corrector: Arc::new(StatementCorrector::financial()),
            metrics: Arc::new(NoopMetrics),
            approval: Arc::new(AutoApprove),
            policy: RetryPolicy::default(),
            options: GenerationOptions::default(),
            settings: PipelineSettings::default(),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn Store>,
        graph: Arc<dyn GraphStore>,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self> {
        Ok(Self::new(store, graph, generator)
            .with_corrector(load_corrector(&config.correction)?)
            .with_retry(RetryPolicy::from_config(&config.retry))
            .with_options(config.generation.options())
            .with_settings(PipelineSettings::from_config(config)))
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_corrector(mut self, corrector: StatementCorrector) -> Self {
        self.corrector = Arc::new(corrector);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_approval(mut self, approval: Arc<dyn ApprovalGate>) -> Self {
        self.approval = approval;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy<PipelineError>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Run or resume the pipeline for one document.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id. Stage failures come back as
    /// [`PipelineError::Stage`] after the document was marked `error`.
    pub async fn process_document(
        &self,
        id: &str,
        mode: GenerationMode,
    ) -> Result<ProcessOutcome, PipelineError> {
        let mut doc = self
            .store
            .get_document(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("document {}", id)))?;
        if doc.status.is_terminal() {
            debug!(document_id = %doc.id, "already completed");
            return Ok(ProcessOutcome::AlreadyCompleted);
        }
        info!(document_id = %doc.id, filename = %doc.filename, mode = mode.as_str(), "processing document");

        let text = match doc.text.clone() {
            Some(text) => text,
            None => {
                self.advance(&mut doc, DocumentStatus::Parsing).await?;
                let started = Instant::now();
                let parsed = self.parse(&doc).await;
                let text = self.finish(&doc, Stage::Parse, started, parsed).await?;
                self.advance(&mut doc, DocumentStatus::Parsed).await?;
                text
            }
        };

        let schema = match self.store.get_schema(&doc.id).await? {
            Some(schema) => schema,
            None => {
                self.advance(&mut doc, DocumentStatus::SchemaExtracting).await?;
                let started = Instant::now();
                let extracted = self.extract_schema(&doc, &text).await;
                let schema = self
                    .finish(&doc, Stage::ExtractSchema, started, extracted)
                    .await?;
                self.advance(&mut doc, DocumentStatus::SchemaExtracted).await?;
                schema
            }
        };

        let mut results = self.store.list_results(&doc.id).await?;
        let segments = self.store.list_segments(&doc.id).await?;
        let other_mode = results
            .iter()
            .any(|r| r.segment_id.is_some() != (mode == GenerationMode::Chunked));
        if other_mode || (mode == GenerationMode::Whole && !segments.is_empty()) {
            info!(document_id = %doc.id, mode = mode.as_str(), "generation mode changed; discarding earlier statements");
            self.store.delete_artifacts(&doc.id).await?;
            results.clear();
        }

        if needs_generation(mode, &results, &segments) {
            self.advance(&mut doc, DocumentStatus::StatementGenerating).await?;
            let started = Instant::now();
            let generated = self.generate(&doc, mode, &text, schema, results).await;
            self.finish(&doc, Stage::Generate, started, generated).await?;
            self.advance(&mut doc, DocumentStatus::StatementGenerated).await?;
        }

        let pending: Vec<GeneratedStatementResult> = self
            .store
            .list_results(&doc.id)
            .await?
            .into_iter()
            .filter(|r| r.status != ResultStatus::Executed)
            .collect();
        if !pending.is_empty() {
            let started = Instant::now();
            let decision = self
                .approval
                .approve(&doc, &pending)
                .await
                .map_err(PipelineError::Store);
            if !self.finish(&doc, Stage::Confirm, started, decision).await? {
                self.discard_rejected(&doc, &pending).await?;
                return Ok(ProcessOutcome::Rejected);
            }
        }

        self.advance(&mut doc, DocumentStatus::Ingesting).await?;
        let started = Instant::now();
        let engine = IngestionEngine::new(
            Arc::clone(&self.graph),
            Arc::clone(&self.store),
            &self.policy,
            self.settings.stage_timeout,
        );
        let ingested = engine.ingest_document(&doc).await;
        let counts = self.finish(&doc, Stage::Ingest, started, ingested).await?;
        self.advance(&mut doc, DocumentStatus::Completed).await?;
        info!(
            document_id = %doc.id,
            nodes = counts.nodes_created,
            relationships = counts.relationships_created,
            "document completed"
        );
        Ok(ProcessOutcome::Completed { counts })
    }

    /// Process every `uploaded` or `error` document, `workers` at a time.
    ///
    /// One document's failure does not affect the others; outcomes are
    /// returned in submission order.
    pub async fn process_pending(
        self: &Arc<Self>,
        mode: GenerationMode,
    ) -> Result<Vec<(String, Result<ProcessOutcome, PipelineError>)>, PipelineError> {
        let docs = self
            .store
            .list_documents(&[DocumentStatus::Uploaded, DocumentStatus::Error])
            .await?;
        info!(documents = docs.len(), workers = self.settings.workers, "processing pending documents");

        let semaphore = Arc::new(Semaphore::new(self.settings.workers.max(1)));
        let mut tasks = JoinSet::new();
        for (position, doc) in docs.into_iter().enumerate() {
            let this = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => this.process_document(&doc.id, mode).await,
                    Err(e) => Err(PipelineError::Store(e.into())),
                };
                (position, doc.id, outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => outcomes.push(entry),
                Err(e) => error!(error = %e, "document task panicked"),
            }
        }
        outcomes.sort_by_key(|(position, _, _)| *position);
        Ok(outcomes
            .into_iter()
            .map(|(_, id, outcome)| (id, outcome))
            .collect())
    }

    async fn advance(&self, doc: &mut Document, next: DocumentStatus) -> Result<(), PipelineError> {
        if !doc.status.can_transition_to(next) {
            return Err(PipelineError::PermanentRequest(format!(
                "document {} cannot move from {} to {}",
                doc.id, doc.status, next
            )));
        }
        self.store.update_document_status(&doc.id, next, None).await?;
        debug!(document_id = %doc.id, from = %doc.status, to = %next, "status changed");
        doc.status = next;
        Ok(())
    }

    /// Record the stage sample; on failure also mark the document `error`.
    async fn finish<T>(
        &self,
        doc: &Document,
        stage: Stage,
        started: Instant,
        result: Result<T, PipelineError>,
    ) -> Result<T, PipelineError> {
        self.metrics.record(StageSample {
            stage,
            document_id: doc.id.clone(),
            duration: started.elapsed(),
            success: result.is_ok(),
        });
        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        let message = err.root().to_string();
        error!(document_id = %doc.id, stage = %stage, error = %message, "stage failed");
        if let Err(e) = self
            .store
            .update_document_status(&doc.id, DocumentStatus::Error, Some(&message))
            .await
        {
            warn!(document_id = %doc.id, error = %e, "failed to record stage failure");
        }
        Err(err.in_stage(&doc.id, stage))
    }

    async fn parse(&self, doc: &Document) -> Result<String, PipelineError> {
        let source = self
            .store
            .get_source(&doc.id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("source bytes for document {}", doc.id)))?;
        let source = Arc::new(source);
        let text = execute(&self.policy, || {
            let extractor = Arc::clone(&self.extractor);
            let source = Arc::clone(&source);
            let mime_type = doc.mime_type.clone();
            deadline("text extraction", self.settings.stage_timeout, async move {
                tokio::task::spawn_blocking(move || extractor.extract(&source, &mime_type))
                    .await
                    .map_err(|e| PipelineError::Store(e.into()))?
                    .map_err(PipelineError::from)
            })
        })
        .await?;
        if text.trim().is_empty() {
            return Err(PipelineError::PermanentRequest(
                "no text could be extracted".to_string(),
            ));
        }
        self.store.set_document_text(&doc.id, &text).await?;
        debug!(document_id = %doc.id, chars = text.len(), "text extracted");
        Ok(text)
    }

    async fn extract_schema(&self, doc: &Document, text: &str) -> Result<GraphSchema, PipelineError> {
        let schema = extract_schema(self.generator.as_ref(), &self.options, &self.policy, text).await?;
        self.store.save_schema(&doc.id, &schema).await?;
        Ok(schema)
    }

    fn job(&self, schema: GraphSchema) -> GenerationJob {
        GenerationJob {
            store: Arc::clone(&self.store),
            generator: Arc::clone(&self.generator),
            corrector: Arc::clone(&self.corrector),
            metrics: Arc::clone(&self.metrics),
            policy: self.policy.clone(),
            options: self.options.clone(),
            schema: Arc::new(schema),
        }
    }

    async fn generate(
        &self,
        doc: &Document,
        mode: GenerationMode,
        text: &str,
        schema: GraphSchema,
        results: Vec<GeneratedStatementResult>,
    ) -> Result<(), PipelineError> {
        let job = self.job(schema);
        match mode {
            GenerationMode::Whole => {
                let reuse_id = results.into_iter().next().map(|r| r.id);
                job.run(&doc.id, text, None, None, reuse_id).await
            }
            GenerationMode::Chunked => self.generate_chunks(doc, text, job, results).await,
        }
    }

    /// Drop the reviewed results. Executed results stay as the record of
    /// what an earlier run already wrote to the graph, and segments stay so
    /// a later run regenerates only the rejected ones.
    async fn discard_rejected(
        &self,
        doc: &Document,
        rejected: &[GeneratedStatementResult],
    ) -> Result<(), PipelineError> {
        let deleted = self.store.delete_pending_results(&doc.id).await?;
        for segment_id in rejected.iter().filter_map(|r| r.segment_id.as_deref()) {
            self.store
                .update_segment_status(segment_id, SegmentStatus::Error, Some(REJECTED_MESSAGE))
                .await?;
        }
        self.store
            .update_document_status(&doc.id, DocumentStatus::Error, Some(REJECTED_MESSAGE))
            .await?;
        info!(document_id = %doc.id, discarded = deleted, "statements rejected");
        Ok(())
    }

    async fn generate_chunks(
        &self,
        doc: &Document,
        text: &str,
        job: GenerationJob,
        results: Vec<GeneratedStatementResult>,
    ) -> Result<(), PipelineError> {
        let mut segments = self.store.list_segments(&doc.id).await?;
        if segments.is_empty() {
            let windows = chunk_words(text, self.settings.window_words, self.settings.overlap_words);
            segments = segments_for_document(&doc.id, &windows);
            self.store.replace_segments(&doc.id, &segments).await?;
            self.store
                .set_segment_progress(&doc.id, segments.len() as i64, 0)
                .await?;
            info!(document_id = %doc.id, segments = segments.len(), "document chunked");
        }

        let total = segments.len();
        let existing: HashMap<String, GeneratedStatementResult> = results
            .into_iter()
            .filter_map(|r| r.segment_id.clone().map(|id| (id, r)))
            .collect();
        let semaphore = Arc::new(Semaphore::new(self.settings.generation_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for segment in segments {
            let previous = existing.get(&segment.id);
            if previous.is_some_and(|r| r.status != ResultStatus::Error) {
                continue;
            }
            let reuse_id = previous.map(|r| r.id.clone());
            let job = job.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| PipelineError::Store(e.into()))?;
                job.run_segment(segment, total, reuse_id).await
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(PipelineError::Store(e.into())),
            };
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Whether any statements are missing or unusable for `mode`.
fn needs_generation(
    mode: GenerationMode,
    results: &[GeneratedStatementResult],
    segments: &[Segment],
) -> bool {
    let usable = |r: &GeneratedStatementResult| r.status != ResultStatus::Error;
    match mode {
        GenerationMode::Whole => !results.first().is_some_and(usable),
        GenerationMode::Chunked => {
            segments.is_empty()
                || segments.iter().any(|segment| {
                    !results
                        .iter()
                        .any(|r| r.segment_id.as_deref() == Some(segment.id.as_str()) && usable(r))
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(segment_id: Option<&str>, status: ResultStatus) -> GeneratedStatementResult {
        let mut result = GeneratedStatementResult::new("doc", segment_id, String::new(), String::new());
        result.status = status;
        result
    }

    fn segment(id: &str) -> Segment {
        Segment {
            id: id.to_string(),
            document_id: "doc".to_string(),
            index: 0,
            text: "words".to_string(),
            word_start: 0,
            word_end: 1,
            word_count: 1,
            status: SegmentStatus::Pending,
            error_message: None,
        }
    }

    #[test]
    fn test_needs_generation_whole() {
        assert!(needs_generation(GenerationMode::Whole, &[], &[]));
        assert!(!needs_generation(
            GenerationMode::Whole,
            &[result(None, ResultStatus::Validated)],
            &[]
        ));
        assert!(needs_generation(
            GenerationMode::Whole,
            &[result(None, ResultStatus::Error)],
            &[]
        ));
    }

    #[test]
    fn test_needs_generation_chunked() {
        let segments = [segment("s1"), segment("s2")];
        assert!(needs_generation(GenerationMode::Chunked, &[], &[]));
        assert!(needs_generation(
            GenerationMode::Chunked,
            &[result(Some("s1"), ResultStatus::Executed)],
            &segments
        ));
        assert!(!needs_generation(
            GenerationMode::Chunked,
            &[
                result(Some("s1"), ResultStatus::Executed),
                result(Some("s2"), ResultStatus::Generated)
            ],
            &segments
        ));
    }

    #[test]
    fn test_load_corrector_from_rules_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(
            &path,
            r#"
[prefixes]
Invoice = "inv"

[aliases]
BILLED_TO = "BILLS"
"#,
        )
        .unwrap();
        let corrector = load_corrector(&CorrectionConfig {
            complete_required_links: false,
            rules_path: Some(path),
        })
        .unwrap();
        assert_eq!(corrector.rules().prefix_for("Invoice"), "inv");
        assert_eq!(corrector.rules().canonical_type("BILLED_TO"), "BILLS");
        assert!(corrector.rules().directions.is_empty());
    }

    #[test]
    fn test_load_corrector_rejects_alias_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.toml");
        std::fs::write(&path, "[aliases]\nA = \"B\"\nB = \"A\"\n").unwrap();
        let err = load_corrector(&CorrectionConfig {
            complete_required_links: true,
            rules_path: Some(path),
        })
        .unwrap_err();
        assert!(format!("{:#}", err).contains("cycle"));
    }

    #[test]
    fn test_default_corrector_is_financial() {
        let corrector = load_corrector(&CorrectionConfig::default()).unwrap();
        assert_eq!(corrector.rules(), &RuleSet::financial());
    }
}
