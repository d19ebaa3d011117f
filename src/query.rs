//! Natural-language questions over the ingested graph.
//!
//! The question and the merged schema of every completed document go to the
//! generator, which answers with one query. The query must parse as a
//! single read-only statement and pass `explain` before it is run.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use docgraph_core::generate::{GenerationOptions, TextGenerator};
use docgraph_core::graph::{GraphError, GraphStore, QueryRow};
use docgraph_core::models::DocumentStatus;
use docgraph_core::schema::GraphSchema;
use docgraph_core::statement::decode::repair_encoding;
use docgraph_core::statement::{parse_statement, split_statements, ParseMode};
use docgraph_core::store::Store;

use crate::error::PipelineError;
use crate::prompts::{query_user_prompt, QUERY_SYSTEM_PROMPT};
use crate::retry::{deadline, execute, RetryPolicy};

#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub question: String,
    pub statement: String,
    pub rows: Vec<QueryRow>,
}

pub struct QueryEngine {
    store: Arc<dyn Store>,
    graph: Arc<dyn GraphStore>,
    generator: Arc<dyn TextGenerator>,
    options: GenerationOptions,
    policy: RetryPolicy<PipelineError>,
}

impl QueryEngine {
    pub fn new(
        store: Arc<dyn Store>,
        graph: Arc<dyn GraphStore>,
        generator: Arc<dyn TextGenerator>,
        options: GenerationOptions,
        policy: RetryPolicy<PipelineError>,
    ) -> Self {
        Self {
            store,
            graph,
            generator,
            options,
            policy,
        }
    }

    /// Union of the schemas of all completed documents.
    pub async fn combined_schema(&self) -> Result<GraphSchema, PipelineError> {
        let mut combined = GraphSchema::new();
        for doc in self.store.list_documents(&[DocumentStatus::Completed]).await? {
            if let Some(schema) = self.store.get_schema(&doc.id).await? {
                for node in schema.nodes() {
                    combined.add_node(&node.label, &node.properties);
                }
                for rel in schema.relationships() {
                    combined.add_relationship(&rel.rel_type, &rel.from_label, &rel.to_label);
                }
            }
        }
        Ok(combined)
    }

    pub async fn ask(&self, question: &str) -> Result<QueryAnswer, PipelineError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::PermanentRequest("question is empty".to_string()));
        }
        let schema = self.combined_schema().await?;
        if schema.is_empty() {
            return Err(PipelineError::NotFound(
                "no completed documents to query".to_string(),
            ));
        }

        let prompt = query_user_prompt(&schema, question);
        let raw = execute(&self.policy, || {
            deadline("query generation", self.options.timeout, async {
                self.generator
                    .generate(QUERY_SYSTEM_PROMPT, &prompt, &self.options)
                    .await
                    .map_err(PipelineError::from)
            })
        })
        .await?;
        let statement = read_only_statement(&raw)?;
        debug!(statement = %statement, "generated query");

        let invalid = |e: GraphError| PipelineError::Validation {
            statement: statement.clone(),
            message: e.to_string(),
        };
        self.graph.explain(&statement).await.map_err(|e| {
            if e.is_transient() {
                PipelineError::from(e)
            } else {
                invalid(e)
            }
        })?;
        let rows = execute(&self.policy, || {
            deadline("graph query", self.options.timeout, async {
                self.graph.query(&statement).await.map_err(PipelineError::from)
            })
        })
        .await?;
        info!(rows = rows.len(), "query answered");
        Ok(QueryAnswer {
            question: question.to_string(),
            statement,
            rows,
        })
    }
}

/// Extract the single read-only statement from model output.
pub fn read_only_statement(raw: &str) -> Result<String, PipelineError> {
    let repaired = repair_encoding(raw);
    let mut statements = split_statements(&repaired);
    let statement = match statements.len() {
        1 => statements.remove(0),
        0 => {
            return Err(PipelineError::Validation {
                statement: raw.trim().to_string(),
                message: "model returned no query".to_string(),
            })
        }
        n => {
            return Err(PipelineError::Validation {
                statement: repaired.trim().to_string(),
                message: format!("expected one query, found {}", n),
            })
        }
    };
    let parsed = parse_statement(&statement, ParseMode::Strict).map_err(|e| {
        PipelineError::Validation {
            statement: statement.clone(),
            message: e.to_string(),
        }
    })?;
    if !parsed.is_read_only() {
        return Err(PipelineError::Validation {
            statement,
            message: "query must be read-only".to_string(),
        });
    }
    Ok(statement)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_statement_strips_fences() {
        let raw = "```cypher\nMATCH (a:Account) RETURN a.accountId AS id;\n```";
        assert_eq!(
            read_only_statement(raw).unwrap(),
            "MATCH (a:Account) RETURN a.accountId AS id"
        );
    }

    #[test]
    fn test_write_query_is_rejected() {
        let err = read_only_statement("MATCH (a:Account) SET a.flag = true RETURN a").unwrap_err();
        match err {
            PipelineError::Validation { message, .. } => assert!(message.contains("read-only")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(read_only_statement("MATCH (a) DETACH DELETE a").is_err());
    }

    #[test]
    fn test_multiple_statements_are_rejected() {
        assert!(read_only_statement("MATCH (a) RETURN a; MATCH (b) RETURN b").is_err());
        assert!(read_only_statement("   ").is_err());
    }
}
