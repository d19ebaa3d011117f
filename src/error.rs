//! Pipeline error taxonomy.
//!
//! | Variant | Retried | Typical source |
//! |---------|---------|----------------|
//! | [`TransientIo`](PipelineError::TransientIo) | yes | network, timeout, rate limit, 5xx |
//! | [`PermanentRequest`](PipelineError::PermanentRequest) | no | bad prompt, auth, unsupported format |
//! | [`Validation`](PipelineError::Validation) | no | statement fails the explain check |
//! | [`Transaction`](PipelineError::Transaction) | if `retryable` | write failure mid-transaction |
//! | [`NotFound`](PipelineError::NotFound) | no | unknown document id |
//! | [`Stage`](PipelineError::Stage) | as its source | any of the above, tagged with document and stage |
//! | [`Store`](PipelineError::Store) | no | persistence failure |
//!
//! [`is_transient`] is the default classifier for [`RetryPolicy`](crate::retry::RetryPolicy).

use docgraph_core::generate::GenerationError;
use docgraph_core::graph::GraphError;
use docgraph_core::models::Stage;

use crate::extract::ExtractError;
use crate::ingest::IngestionError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("transient I/O failure: {0}")]
    TransientIo(String),

    #[error("request rejected: {0}")]
    PermanentRequest(String),

    #[error("statement failed validation: {message} (statement: {statement})")]
    Validation { statement: String, message: String },

    #[error("transaction failed: {message} (statement: {statement})")]
    Transaction {
        statement: String,
        message: String,
        retryable: bool,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("document {document_id} failed at stage {stage}: {source}")]
    Stage {
        document_id: String,
        stage: Stage,
        #[source]
        source: Box<PipelineError>,
    },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl PipelineError {
    /// Tag an error with the document and stage it happened in.
    pub fn in_stage(self, document_id: &str, stage: Stage) -> Self {
        match self {
            already @ PipelineError::Stage { .. } => already,
            other => PipelineError::Stage {
                document_id: document_id.to_string(),
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The offending statement, when the failure is tied to one.
    pub fn statement(&self) -> Option<&str> {
        match self {
            PipelineError::Validation { statement, .. }
            | PipelineError::Transaction { statement, .. } => Some(statement),
            PipelineError::Stage { source, .. } => source.statement(),
            _ => None,
        }
    }

    /// Innermost error, past any stage tags.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Default retry classifier: transient I/O and retryable transaction failures.
pub fn is_transient(err: &PipelineError) -> bool {
    match err {
        PipelineError::TransientIo(_) => true,
        PipelineError::Transaction { retryable, .. } => *retryable,
        PipelineError::Stage { source, .. } => is_transient(source),
        _ => false,
    }
}

impl From<GenerationError> for PipelineError {
    fn from(err: GenerationError) -> Self {
        if err.is_retryable() {
            PipelineError::TransientIo(err.to_string())
        } else {
            PipelineError::PermanentRequest(err.to_string())
        }
    }
}

impl From<GraphError> for PipelineError {
    fn from(err: GraphError) -> Self {
        match err {
            e if e.is_transient() => PipelineError::TransientIo(e.to_string()),
            GraphError::Syntax(message) => PipelineError::Validation {
                statement: String::new(),
                message,
            },
            e => PipelineError::PermanentRequest(e.to_string()),
        }
    }
}

impl From<ExtractError> for PipelineError {
    fn from(err: ExtractError) -> Self {
        PipelineError::PermanentRequest(err.to_string())
    }
}

impl From<IngestionError> for PipelineError {
    fn from(err: IngestionError) -> Self {
        match err {
            IngestionError::Validation { statement, source } => PipelineError::Validation {
                statement,
                message: source.to_string(),
            },
            IngestionError::Transaction { statement, source } => PipelineError::Transaction {
                statement,
                retryable: source.is_transient(),
                message: source.to_string(),
            },
            IngestionError::Graph(source) => source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_classification() {
        assert!(is_transient(&GenerationError::RateLimited("429".into()).into()));
        assert!(is_transient(&GenerationError::Timeout(Duration::from_secs(5)).into()));
        assert!(!is_transient(&GenerationError::ModelNotFound("m".into()).into()));
        assert!(is_transient(&GraphError::Conflict("deadlock".into()).into()));
        assert!(!is_transient(&GraphError::Syntax("bad".into()).into()));

        let conflict = PipelineError::Transaction {
            statement: "MERGE (a:A {id: 1})".into(),
            message: "conflict".into(),
            retryable: true,
        };
        assert!(is_transient(&conflict));
        let violation = PipelineError::Transaction {
            statement: "MERGE (a:A {id: 1})".into(),
            message: "constraint".into(),
            retryable: false,
        };
        assert!(!is_transient(&violation));
        assert!(!is_transient(&PipelineError::Validation {
            statement: "x".into(),
            message: "y".into(),
        }));
    }

    #[test]
    fn test_stage_context_is_preserved() {
        let err = PipelineError::Validation {
            statement: "MERGE (x".into(),
            message: "unexpected end".into(),
        }
        .in_stage("doc-1", Stage::Ingest)
        .in_stage("doc-1", Stage::Generate);

        let text = err.to_string();
        assert!(text.contains("doc-1"));
        assert!(text.contains("ingest"));
        assert_eq!(err.statement(), Some("MERGE (x"));
        assert!(matches!(err.root(), PipelineError::Validation { .. }));
    }

    #[test]
    fn test_stage_tag_keeps_transience() {
        let err = PipelineError::TransientIo("reset".into()).in_stage("d", Stage::Parse);
        assert!(is_transient(&err));
    }
}
