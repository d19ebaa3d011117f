//! # docgraph CLI
//!
//! The `docgraph` binary drives documents from upload to graph:
//!
//! ```bash
//! docgraph --config ./config/docgraph.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docgraph init` | Create the SQLite database and run schema migrations |
//! | `docgraph submit <path>` | Submit a file, or every matching file under a directory |
//! | `docgraph status <id>` | Show a document with its segments and statement results |
//! | `docgraph list` | List documents, optionally filtered by status |
//! | `docgraph process <id>` | Run or resume the pipeline for one document |
//! | `docgraph process --all` | Process every uploaded or failed document |
//! | `docgraph query "<q>"` | Answer a question from the ingested graph |
//! | `docgraph stats` | Document, segment and mutation totals |
//! | `docgraph serve` | Start the HTTP API |
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `docgraph=info`);
//! command output goes to stdout.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docgraph::config::{self, Config};
use docgraph::generation::create_generator;
use docgraph::graph_http::create_graph_store;
use docgraph::pipeline::{PipelineOrchestrator, ProcessOutcome, TerminalApproval};
use docgraph::query::QueryEngine;
use docgraph::retry::RetryPolicy;
use docgraph::server::{self, AppState};
use docgraph::sqlite_store::SqliteStore;
use docgraph::stats::{format_stage_metrics, format_ts_relative, run_stats};
use docgraph::submit::submit_path;
use docgraph::{db, migrate};
use docgraph_core::metrics::InMemoryMetrics;
use docgraph_core::models::{DocumentStatus, GenerationMode};
use docgraph_core::store::Store;

/// docgraph: turn documents into a property graph.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docgraph.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docgraph",
    about = "docgraph: extract a graph schema and statements from documents and ingest them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docgraph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Submit a file or a directory of files.
    ///
    /// Directories are walked recursively using `[submit] include_globs`
    /// and `exclude_globs`. Resubmitting identical bytes returns the
    /// existing document.
    Submit {
        path: PathBuf,
    },

    /// Show one document with its segments and statement results.
    Status {
        id: String,
    },

    /// List documents.
    List {
        /// Only documents in this status (e.g. `error`, `completed`).
        #[arg(long)]
        status: Option<DocumentStatus>,
    },

    /// Run or resume the pipeline.
    Process {
        /// Document id. Omit with `--all`.
        id: Option<String>,

        /// Process every uploaded or failed document.
        #[arg(long, conflicts_with = "id")]
        all: bool,

        /// `whole` or `chunked`. Defaults to `[pipeline] mode`.
        #[arg(long)]
        mode: Option<GenerationMode>,

        /// Ask for confirmation before ingesting generated statements.
        #[arg(long)]
        confirm: bool,
    },

    /// Ask a question about the ingested graph.
    Query {
        question: String,
    },

    /// Show pipeline statistics.
    Stats,

    /// Start the HTTP API on `[server] bind`.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Submit { path } => {
            let store = open_store(&cfg).await?;
            let submissions = submit_path(store.as_ref(), &cfg.submit, &path).await?;
            if submissions.is_empty() {
                println!("No matching files under {}", path.display());
            }
            for s in &submissions {
                let note = if s.created { "submitted" } else { "already submitted" };
                println!("{}  {}  ({})", s.document.id, s.document.filename, note);
            }
        }
        Commands::Status { id } => {
            let store = open_store(&cfg).await?;
            run_status(store.as_ref(), &id).await?;
        }
        Commands::List { status } => {
            let store = open_store(&cfg).await?;
            let statuses: Vec<DocumentStatus> = status.into_iter().collect();
            run_list(store.as_ref(), &statuses).await?;
        }
        Commands::Process {
            id,
            all,
            mode,
            confirm,
        } => {
            let mode = mode.unwrap_or(cfg.pipeline.mode);
            run_process(&cfg, id, all, mode, confirm).await?;
        }
        Commands::Query { question } => {
            let store = open_store(&cfg).await?;
            let engine = QueryEngine::new(
                store,
                create_graph_store(&cfg.graph)?,
                create_generator(&cfg.generation)?,
                cfg.generation.options(),
                RetryPolicy::from_config(&cfg.retry),
            );
            let answer = engine.ask(&question).await?;
            println!("{}", serde_json::to_string_pretty(&answer)?);
        }
        Commands::Stats => {
            let store = open_store(&cfg).await?;
            run_stats(&cfg, store.as_ref()).await?;
        }
        Commands::Serve => {
            let store = open_store(&cfg).await?;
            let graph = create_graph_store(&cfg.graph)?;
            let generator = create_generator(&cfg.generation)?;
            let orchestrator =
                PipelineOrchestrator::from_config(&cfg, store.clone(), graph.clone(), generator.clone())?;
            let query = QueryEngine::new(
                store,
                graph,
                generator,
                cfg.generation.options(),
                RetryPolicy::from_config(&cfg.retry),
            );
            let state = AppState {
                orchestrator: Arc::new(orchestrator),
                query: Arc::new(query),
                default_mode: cfg.pipeline.mode,
            };
            server::run_server(&cfg.server.bind, state).await?;
        }
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docgraph=info,docgraph_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_store(cfg: &Config) -> Result<Arc<dyn Store>> {
    let pool = db::connect(cfg).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

async fn run_status(store: &dyn Store, id: &str) -> Result<()> {
    let Some(doc) = store.get_document(id).await? else {
        bail!("document not found: {}", id);
    };
    println!("Document:  {}", doc.id);
    println!("File:      {} ({}, {} bytes)", doc.filename, doc.mime_type, doc.size_bytes);
    println!("Status:    {}", doc.status);
    if let Some(message) = &doc.error_message {
        println!("Error:     {}", message);
    }
    println!("Updated:   {}", format_ts_relative(doc.updated_at));
    if doc.segment_count > 0 {
        println!(
            "Segments:  {} ingested / {}",
            doc.segments_ingested, doc.segment_count
        );
        for seg in store.list_segments(id).await? {
            let error = seg.error_message.as_deref().unwrap_or("");
            println!(
                "  #{:<4} words {:>6}-{:<6} {:<10} {}",
                seg.index, seg.word_start, seg.word_end, seg.status.as_str(), error
            );
        }
    }

    let results = store.list_results(id).await?;
    if !results.is_empty() {
        println!("Results:");
        for r in &results {
            println!(
                "  {}  {:<10} nodes {:>4}  rels {:>4}{}",
                r.id,
                r.status.as_str(),
                r.nodes_created,
                r.relationships_created,
                r.error_message
                    .as_deref()
                    .map(|m| format!("  {}", m))
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}

async fn run_list(store: &dyn Store, statuses: &[DocumentStatus]) -> Result<()> {
    let docs = store.list_documents(statuses).await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    println!("{:<36}  {:<22}  {:<16}  FILE", "ID", "STATUS", "UPDATED");
    for doc in docs {
        println!(
            "{:<36}  {:<22}  {:<16}  {}",
            doc.id,
            doc.status.as_str(),
            format_ts_relative(doc.updated_at),
            doc.filename
        );
    }
    Ok(())
}

async fn run_process(
    cfg: &Config,
    id: Option<String>,
    all: bool,
    mode: GenerationMode,
    confirm: bool,
) -> Result<()> {
    if id.is_none() && !all {
        bail!("process needs a document id or --all");
    }

    let store = open_store(cfg).await?;
    let metrics = Arc::new(InMemoryMetrics::new());
    let mut orchestrator = PipelineOrchestrator::from_config(
        cfg,
        store,
        create_graph_store(&cfg.graph)?,
        create_generator(&cfg.generation)?,
    )?
    .with_metrics(metrics.clone());
    if confirm {
        orchestrator = orchestrator.with_approval(Arc::new(TerminalApproval::new()));
    }
    let orchestrator = Arc::new(orchestrator);

    let outcomes = match id {
        Some(id) => {
            let outcome = orchestrator.process_document(&id, mode).await;
            vec![(id, outcome)]
        }
        None => orchestrator.process_pending(mode).await?,
    };

    let mut failed = 0;
    for (doc_id, outcome) in &outcomes {
        match outcome {
            Ok(ProcessOutcome::Completed { counts }) => println!(
                "{}  completed: {} nodes, {} relationships created",
                doc_id, counts.nodes_created, counts.relationships_created
            ),
            Ok(ProcessOutcome::AlreadyCompleted) => println!("{}  already completed", doc_id),
            Ok(ProcessOutcome::Rejected) => println!("{}  rejected at review", doc_id),
            Err(e) => {
                failed += 1;
                println!("{}  failed: {}", doc_id, e);
            }
        }
    }
    if all && outcomes.is_empty() {
        println!("Nothing to process.");
    }

    let table = format_stage_metrics(&metrics.snapshot());
    if !table.is_empty() {
        println!();
        print!("{}", table);
    }

    if failed > 0 {
        bail!("{} of {} document(s) failed", failed, outcomes.len());
    }
    Ok(())
}
