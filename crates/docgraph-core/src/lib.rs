//! # docgraph core
//!
//! Runtime-free logic for docgraph: data models and lifecycle state
//! machines, text chunking, the per-document graph schema, the statement
//! corrector, and the trait boundaries the pipeline is built on (graph
//! store, persistent store, text generation, metrics).
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The
//! native adapters and the orchestrator live in the `docgraph` crate.

pub mod chunk;
pub mod generate;
pub mod graph;
pub mod metrics;
pub mod models;
pub mod schema;
pub mod statement;
pub mod store;
