//! Graph store abstraction.
//!
//! The [`GraphStore`] trait is the boundary between the ingestion engine and
//! a property-graph database. It exposes exactly what ingestion needs:
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`explain`](GraphStore::explain) | Syntax-check a statement without mutating anything |
//! | [`run_schema_statement`](GraphStore::run_schema_statement) | Run a constraint/index statement outside any transaction |
//! | [`begin`](GraphStore::begin) | Open an explicit write transaction |
//! | [`query`](GraphStore::query) | Run a read-only statement and return rows |
//!
//! Implementations must be `Send + Sync`; the store is shared process-wide
//! behind an `Arc` and acquired per operation.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

/// Counters reported by the graph for one statement or transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MutationSummary {
    pub nodes_created: i64,
    pub relationships_created: i64,
    pub properties_set: i64,
    pub constraints_added: i64,
}

impl MutationSummary {
    pub fn add(&mut self, other: &MutationSummary) {
        self.nodes_created += other.nodes_created;
        self.relationships_created += other.relationships_created;
        self.properties_set += other.properties_set;
        self.constraints_added += other.constraints_added;
    }
}

/// One result row: column name → JSON value.
pub type QueryRow = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("syntax error: {0}")]
    Syntax(String),
    /// An equivalent constraint or index already exists.
    #[error("schema object already exists: {0}")]
    SchemaExists(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    /// Concurrent write conflict; the transaction may be retried.
    #[error("transaction conflict: {0}")]
    Conflict(String),
    #[error("graph store unavailable: {0}")]
    Unavailable(String),
    #[error("graph operation timed out")]
    Timeout,
    #[error("unsupported by this graph store: {0}")]
    Unsupported(String),
    #[error("graph error: {0}")]
    Other(String),
}

impl GraphError {
    /// Conflicts, unavailability, and timeouts are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GraphError::Conflict(_) | GraphError::Unavailable(_) | GraphError::Timeout
        )
    }
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Check a statement without executing it.
    async fn explain(&self, statement: &str) -> Result<(), GraphError>;

    /// Run a schema-definition statement outside any transaction.
    async fn run_schema_statement(&self, statement: &str) -> Result<MutationSummary, GraphError>;

    /// Open a write transaction.
    async fn begin(&self) -> Result<Box<dyn GraphTransaction>, GraphError>;

    /// Run a read-only statement and return its rows.
    async fn query(&self, statement: &str) -> Result<Vec<QueryRow>, GraphError> {
        let _ = statement;
        Err(GraphError::Unsupported("read queries".to_string()))
    }
}

/// An open write transaction. Dropping it without committing discards it.
#[async_trait]
pub trait GraphTransaction: Send {
    async fn run(&mut self, statement: &str) -> Result<MutationSummary, GraphError>;

    async fn commit(self: Box<Self>) -> Result<(), GraphError>;

    async fn rollback(self: Box<Self>) -> Result<(), GraphError>;
}
