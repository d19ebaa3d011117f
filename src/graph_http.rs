//! [`GraphStore`] over the Neo4j transactional HTTP API.
//!
//! | Operation | Request |
//! |-----------|---------|
//! | `explain` | `POST /db/{db}/tx/commit` with `EXPLAIN <statement>` |
//! | `run_schema_statement` | `POST /db/{db}/tx/commit` (auto-commit) |
//! | `begin` | `POST /db/{db}/tx`, transaction URL from the `commit` field |
//! | `run` | `POST /db/{db}/tx/{id}` |
//! | `commit` | `POST /db/{db}/tx/{id}/commit` |
//! | `rollback` | `DELETE /db/{db}/tx/{id}` |
//! | `query` | `POST /db/{db}/tx/commit`, rows zipped with `columns` |
//!
//! Neo4j reports failures in an `errors` array with HTTP 200; error codes
//! are mapped onto [`GraphError`] by [`classify_neo4j_error`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use docgraph_core::graph::memory::InMemoryGraphStore;
use docgraph_core::graph::{GraphError, GraphStore, GraphTransaction, MutationSummary, QueryRow};

use crate::config::{GraphBackend, GraphConfig};

pub const PASSWORD_ENV: &str = "DOCGRAPH_GRAPH_PASSWORD";

/// Build the configured graph store.
pub fn create_graph_store(config: &GraphConfig) -> Result<Arc<dyn GraphStore>> {
    match &config.backend {
        GraphBackend::Memory => Ok(Arc::new(InMemoryGraphStore::new())),
        GraphBackend::Http {
            url,
            database,
            user,
        } => Ok(Arc::new(HttpGraphStore::new(
            url,
            database,
            user,
            Duration::from_secs(config.timeout_secs),
        )?)),
    }
}

#[derive(Clone)]
struct Endpoint {
    client: reqwest::Client,
    authorization: String,
    timeout: Duration,
}

impl Endpoint {
    async fn post(&self, url: &str, statements: &[&str]) -> Result<Value, GraphError> {
        let body = json!({
            "statements": statements
                .iter()
                .map(|s| json!({"statement": s, "includeStats": true}))
                .collect::<Vec<_>>(),
        });
        let response = self
            .client
            .post(url)
            .header("Authorization", &self.authorization)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(send_error)?;
        read_body(response).await
    }

    async fn delete(&self, url: &str) -> Result<Value, GraphError> {
        let response = self
            .client
            .delete(url)
            .header("Authorization", &self.authorization)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(send_error)?;
        read_body(response).await
    }
}

fn send_error(err: reqwest::Error) -> GraphError {
    if err.is_timeout() {
        GraphError::Timeout
    } else {
        GraphError::Unavailable(err.to_string())
    }
}

async fn read_body(response: reqwest::Response) -> Result<Value, GraphError> {
    let status = response.status();
    let text = response.text().await.map_err(send_error)?;
    if status.is_server_error() {
        return Err(GraphError::Unavailable(format!("HTTP {}: {}", status, text)));
    }
    if status.as_u16() == 401 || status.as_u16() == 403 {
        return Err(GraphError::Other(format!("authentication failed: HTTP {}", status)));
    }
    let body: Value = serde_json::from_str(&text)
        .map_err(|e| GraphError::Other(format!("invalid response (HTTP {}): {}", status, e)))?;
    if let Some(error) = body
        .get("errors")
        .and_then(|e| e.as_array())
        .and_then(|errors| errors.first())
    {
        let code = error.get("code").and_then(|c| c.as_str()).unwrap_or("");
        let message = error.get("message").and_then(|m| m.as_str()).unwrap_or("");
        return Err(classify_neo4j_error(code, message));
    }
    if !status.is_success() {
        return Err(GraphError::Other(format!("HTTP {}: {}", status, text)));
    }
    Ok(body)
}

/// Map a Neo4j status code onto the graph error taxonomy.
pub fn classify_neo4j_error(code: &str, message: &str) -> GraphError {
    let message = format!("{}: {}", code, message);
    match code {
        "Neo.ClientError.Statement.SyntaxError"
        | "Neo.ClientError.Statement.SemanticError"
        | "Neo.ClientError.Statement.ParameterMissing" => GraphError::Syntax(message),
        "Neo.ClientError.Schema.EquivalentSchemaRuleAlreadyExists"
        | "Neo.ClientError.Schema.ConstraintAlreadyExists"
        | "Neo.ClientError.Schema.IndexAlreadyExists" => GraphError::SchemaExists(message),
        "Neo.ClientError.Schema.ConstraintValidationFailed"
        | "Neo.ClientError.Schema.ConstraintViolation" => GraphError::ConstraintViolation(message),
        c if c.starts_with("Neo.TransientError.") => GraphError::Conflict(message),
        c if c.starts_with("Neo.DatabaseError.") => GraphError::Unavailable(message),
        _ => GraphError::Other(message),
    }
}

fn summary_of(body: &Value) -> MutationSummary {
    let mut total = MutationSummary::default();
    for result in body
        .get("results")
        .and_then(|r| r.as_array())
        .into_iter()
        .flatten()
    {
        let stat = |name: &str| {
            result
                .pointer(&format!("/stats/{}", name))
                .and_then(|v| v.as_i64())
                .unwrap_or(0)
        };
        total.add(&MutationSummary {
            nodes_created: stat("nodes_created"),
            relationships_created: stat("relationships_created"),
            properties_set: stat("properties_set"),
            constraints_added: stat("constraints_added"),
        });
    }
    total
}

fn rows_of(body: &Value) -> Vec<QueryRow> {
    let Some(result) = body.pointer("/results/0") else {
        return Vec::new();
    };
    let columns: Vec<String> = result
        .get("columns")
        .and_then(|c| c.as_array())
        .map(|cols| {
            cols.iter()
                .filter_map(|c| c.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    result
        .get("data")
        .and_then(|d| d.as_array())
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("row").and_then(|r| r.as_array()))
        .map(|row| columns.iter().cloned().zip(row.iter().cloned()).collect())
        .collect()
}

/// Neo4j server reached over HTTP.
pub struct HttpGraphStore {
    endpoint: Endpoint,
    db_url: String,
}

impl HttpGraphStore {
    /// # Errors
    ///
    /// Returns an error if the password variable is not set.
    pub fn new(url: &str, database: &str, user: &str, timeout: Duration) -> Result<Self> {
        let password = match std::env::var(PASSWORD_ENV) {
            Ok(p) => p,
            Err(_) => bail!("{} environment variable not set", PASSWORD_ENV),
        };
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", user, password));
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            endpoint: Endpoint {
                client,
                authorization: format!("Basic {}", credentials),
                timeout,
            },
            db_url: format!("{}/db/{}", url.trim_end_matches('/'), database),
        })
    }

    fn auto_commit_url(&self) -> String {
        format!("{}/tx/commit", self.db_url)
    }
}

#[async_trait]
impl GraphStore for HttpGraphStore {
    async fn explain(&self, statement: &str) -> Result<(), GraphError> {
        let explain = format!("EXPLAIN {}", statement);
        self.endpoint
            .post(&self.auto_commit_url(), &[&explain])
            .await
            .map(|_| ())
    }

    async fn run_schema_statement(&self, statement: &str) -> Result<MutationSummary, GraphError> {
        let body = self
            .endpoint
            .post(&self.auto_commit_url(), &[statement])
            .await?;
        Ok(summary_of(&body))
    }

    async fn begin(&self) -> Result<Box<dyn GraphTransaction>, GraphError> {
        let body = self
            .endpoint
            .post(&format!("{}/tx", self.db_url), &[])
            .await?;
        let commit_url = body
            .get("commit")
            .and_then(|c| c.as_str())
            .ok_or_else(|| GraphError::Other("begin response has no commit URL".to_string()))?
            .to_string();
        let tx_url = commit_url.trim_end_matches("/commit").to_string();
        Ok(Box::new(HttpTransaction {
            endpoint: self.endpoint.clone(),
            tx_url,
            commit_url,
        }))
    }

    async fn query(&self, statement: &str) -> Result<Vec<QueryRow>, GraphError> {
        let body = self
            .endpoint
            .post(&self.auto_commit_url(), &[statement])
            .await?;
        Ok(rows_of(&body))
    }
}

pub struct HttpTransaction {
    endpoint: Endpoint,
    tx_url: String,
    commit_url: String,
}

#[async_trait]
impl GraphTransaction for HttpTransaction {
    async fn run(&mut self, statement: &str) -> Result<MutationSummary, GraphError> {
        let body = self.endpoint.post(&self.tx_url, &[statement]).await?;
        Ok(summary_of(&body))
    }

    async fn commit(self: Box<Self>) -> Result<(), GraphError> {
        self.endpoint.post(&self.commit_url, &[]).await.map(|_| ())
    }

    async fn rollback(self: Box<Self>) -> Result<(), GraphError> {
        self.endpoint.delete(&self.tx_url).await.map(|_| ())
    }
}
