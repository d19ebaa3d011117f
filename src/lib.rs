//! # docgraph
//!
//! Turns unstructured documents into a property graph. Each document moves
//! through a persisted lifecycle:
//!
//! ```text
//! ┌──────────┐   ┌────────┐   ┌─────────┐   ┌──────────┐   ┌─────────┐   ┌────────┐
//! │ uploaded │──▶│ parsed │──▶│ schema  │──▶│ generate │──▶│ confirm │──▶│ ingest │
//! └──────────┘   └────────┘   │ extract │   │ +correct │   └─────────┘   └───┬────┘
//!                             └─────────┘   └──────────┘                     ▼
//!                                                                      ┌───────────┐
//!                                                                      │ completed │
//!                                                                      └───────────┘
//! ```
//!
//! A text-generation model proposes a graph schema and then graph-mutation
//! statements; the statement corrector repairs and normalizes them; the
//! ingestion engine validates and applies them to the graph store in one
//! transaction per statement set. Every stage writes its artifact to the
//! SQLite store first, so a failed run resumes where it stopped.
//!
//! ## Quick Start
//!
//! ```bash
//! docgraph init
//! docgraph submit ./statements/
//! docgraph process --all --mode chunked
//! docgraph query "Which accounts hold positions in AAPL?"
//! docgraph serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the pipeline store |
//! | [`error`] | Pipeline error taxonomy |
//! | [`retry`] | Retry with exponential backoff and per-call deadlines |
//! | [`extract`] | Text extraction from PDF, DOCX and text formats |
//! | [`generation`] | Text-generation providers |
//! | [`graph_http`] | Graph store over the Neo4j HTTP API |
//! | [`prompts`] | Prompt templates |
//! | [`schema_extract`] | Graph schema extraction |
//! | [`ingest`] | Statement validation and transactional execution |
//! | [`pipeline`] | Per-document orchestration |
//! | [`query`] | Natural-language questions over the graph |
//! | [`submit`] | File and directory submission |
//! | [`stats`] | Store statistics |
//! | [`server`] | HTTP API |

pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod generation;
pub mod graph_http;
pub mod ingest;
pub mod migrate;
pub mod pipeline;
pub mod prompts;
pub mod query;
pub mod retry;
pub mod schema_extract;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod submit;
