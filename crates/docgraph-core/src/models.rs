//! Core data models used throughout docgraph.
//!
//! These types represent the documents, segments, and generated statement
//! results that flow through the document-to-graph pipeline, together with
//! the lifecycle state machines that govern them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifecycle of a [`Document`] through the pipeline.
///
/// ```text
/// uploaded → parsing → parsed → schema_extracting → schema_extracted
///          → statement_generating → statement_generated → ingesting → completed
/// ```
///
/// `error` is reachable from every non-terminal state. A document in
/// `error` may be resumed into any in-progress state; which one depends on
/// the artifacts that already exist for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Parsing,
    Parsed,
    SchemaExtracting,
    SchemaExtracted,
    StatementGenerating,
    StatementGenerated,
    Ingesting,
    Completed,
    Error,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 10] = [
        DocumentStatus::Uploaded,
        DocumentStatus::Parsing,
        DocumentStatus::Parsed,
        DocumentStatus::SchemaExtracting,
        DocumentStatus::SchemaExtracted,
        DocumentStatus::StatementGenerating,
        DocumentStatus::StatementGenerated,
        DocumentStatus::Ingesting,
        DocumentStatus::Completed,
        DocumentStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Parsing => "parsing",
            DocumentStatus::Parsed => "parsed",
            DocumentStatus::SchemaExtracting => "schema_extracting",
            DocumentStatus::SchemaExtracted => "schema_extracted",
            DocumentStatus::StatementGenerating => "statement_generating",
            DocumentStatus::StatementGenerated => "statement_generated",
            DocumentStatus::Ingesting => "ingesting",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed)
    }

    fn rank(&self) -> u8 {
        match self {
            DocumentStatus::Uploaded => 0,
            DocumentStatus::Parsing => 1,
            DocumentStatus::Parsed => 2,
            DocumentStatus::SchemaExtracting => 3,
            DocumentStatus::SchemaExtracted => 4,
            DocumentStatus::StatementGenerating => 5,
            DocumentStatus::StatementGenerated => 6,
            DocumentStatus::Ingesting => 7,
            DocumentStatus::Completed => 8,
            DocumentStatus::Error => 9,
        }
    }

    /// Whether the pipeline may move a document from `self` to `next`.
    ///
    /// Moves are strictly forward. Skipping ahead is allowed because a
    /// resumed run jumps past stages whose artifacts already exist, and
    /// re-entering the current state lets a resumed stage record itself
    /// again. From `error`, any in-progress state may be re-entered.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        match (self, next) {
            (Completed, _) => false,
            (_, Error) => true,
            (Error, Parsing | SchemaExtracting | StatementGenerating | Ingesting) => true,
            (Error, _) => false,
            (current, next) if *current == next => true,
            (current, next) => next.rank() > current.rank(),
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown document status: '{}'", s))
    }
}

/// Lifecycle of a [`Segment`]: `pending → generating → generated → ingesting → ingested`,
/// with `error` reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Pending,
    Generating,
    Generated,
    Ingesting,
    Ingested,
    Error,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentStatus::Pending => "pending",
            SegmentStatus::Generating => "generating",
            SegmentStatus::Generated => "generated",
            SegmentStatus::Ingesting => "ingesting",
            SegmentStatus::Ingested => "ingested",
            SegmentStatus::Error => "error",
        }
    }

    /// Same-state transitions are allowed so an interrupted stage can rerun.
    pub fn can_transition_to(&self, next: SegmentStatus) -> bool {
        use SegmentStatus::*;
        if *self == next {
            return true;
        }
        match (self, next) {
            (_, Error) => true,
            (Pending | Error, Generating)
            | (Generating, Generated)
            | (Generated | Error, Ingesting)
            | (Ingesting, Ingested) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SegmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SegmentStatus::Pending),
            "generating" => Ok(SegmentStatus::Generating),
            "generated" => Ok(SegmentStatus::Generated),
            "ingesting" => Ok(SegmentStatus::Ingesting),
            "ingested" => Ok(SegmentStatus::Ingested),
            "error" => Ok(SegmentStatus::Error),
            other => anyhow::bail!("unknown segment status: '{}'", other),
        }
    }
}

/// Status of a [`GeneratedStatementResult`]: `generated → validated → executed`, or `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Generated,
    Validated,
    Executed,
    Error,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Generated => "generated",
            ResultStatus::Validated => "validated",
            ResultStatus::Executed => "executed",
            ResultStatus::Error => "error",
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generated" => Ok(ResultStatus::Generated),
            "validated" => Ok(ResultStatus::Validated),
            "executed" => Ok(ResultStatus::Executed),
            "error" => Ok(ResultStatus::Error),
            other => anyhow::bail!("unknown result status: '{}'", other),
        }
    }
}

/// Whether statements are generated once for the whole document or once per segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    #[default]
    Whole,
    Chunked,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Whole => "whole",
            GenerationMode::Chunked => "chunked",
        }
    }
}

impl FromStr for GenerationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "whole" => Ok(GenerationMode::Whole),
            "chunked" => Ok(GenerationMode::Chunked),
            other => anyhow::bail!("unknown generation mode: '{}'. Must be whole or chunked.", other),
        }
    }
}

/// One unit of the pipeline state machine, used for metrics and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Parse,
    ExtractSchema,
    Generate,
    Correct,
    Confirm,
    Ingest,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Parse => "parse",
            Stage::ExtractSchema => "extract_schema",
            Stage::Generate => "generate",
            Stage::Correct => "correct",
            Stage::Confirm => "confirm",
            Stage::Ingest => "ingest",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted source file, before it has been stored.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Identity and lifecycle of one source file.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub content_hash: String,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    /// Full extracted text; `None` until the parse stage completes.
    #[serde(skip_serializing)]
    pub text: Option<String>,
    pub segment_count: i64,
    pub segments_ingested: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    /// A freshly uploaded document for `source`, hashed with SHA-256.
    pub fn new(source: &NewDocument) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            filename: source.filename.clone(),
            mime_type: source.mime_type.clone(),
            size_bytes: source.bytes.len() as i64,
            content_hash: content_hash(&source.bytes),
            status: DocumentStatus::Uploaded,
            error_message: None,
            text: None,
            segment_count: 0,
            segments_ingested: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Hex SHA-256 of `bytes`, used to detect resubmitted files.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// A contiguous, possibly overlapping slice of a document's text.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    pub id: String,
    pub document_id: String,
    pub index: i64,
    pub text: String,
    pub word_start: i64,
    pub word_end: i64,
    pub word_count: i64,
    pub status: SegmentStatus,
    pub error_message: Option<String>,
}

/// Raw and corrected statements produced for a whole document or one segment.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedStatementResult {
    pub id: String,
    pub document_id: String,
    /// `None` for a whole-document result.
    pub segment_id: Option<String>,
    pub raw_text: String,
    pub corrected_text: String,
    pub status: ResultStatus,
    pub error_message: Option<String>,
    pub execution_ms: Option<i64>,
    pub nodes_created: i64,
    pub relationships_created: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl GeneratedStatementResult {
    pub fn new(
        document_id: &str,
        segment_id: Option<&str>,
        raw_text: String,
        corrected_text: String,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            segment_id: segment_id.map(str::to_string),
            raw_text,
            corrected_text,
            status: ResultStatus::Generated,
            error_message: None,
            execution_ms: None,
            nodes_created: 0,
            relationships_created: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Graph mutations attributable to one ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MutationCounts {
    pub nodes_created: i64,
    pub relationships_created: i64,
}

impl MutationCounts {
    pub fn add(&mut self, other: MutationCounts) {
        self.nodes_created += other.nodes_created;
        self.relationships_created += other.relationships_created;
    }
}
