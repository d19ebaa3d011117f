//! TOML configuration.
//!
//! Only `[db]` is required; every other section has defaults so a minimal
//! config file is two lines. [`load_config`] parses and validates; invalid
//! values are rejected up front rather than surfacing mid-pipeline.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docgraph_core::generate::GenerationOptions;
use docgraph_core::models::GenerationMode;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub correction: CorrectionConfig,
    #[serde(default)]
    pub submit: SubmitConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// In-code defaults with the database at `db_path`. Used by tests.
    pub fn minimal(db_path: PathBuf) -> Self {
        Self {
            db: DbConfig { path: db_path },
            chunking: ChunkingConfig::default(),
            pipeline: PipelineConfig::default(),
            retry: RetryConfig::default(),
            generation: GenerationConfig::default(),
            graph: GraphConfig::default(),
            correction: CorrectionConfig::default(),
            submit: SubmitConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_window_words")]
    pub window_words: usize,
    #[serde(default = "default_overlap_words")]
    pub overlap_words: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_words: default_window_words(),
            overlap_words: default_overlap_words(),
        }
    }
}

fn default_window_words() -> usize {
    800
}
fn default_overlap_words() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default)]
    pub mode: GenerationMode,
    /// Documents processed concurrently by `process --all`.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Chunk generation calls in flight per document.
    #[serde(default = "default_generation_concurrency")]
    pub generation_concurrency: usize,
    /// Deadline for each extraction and graph call.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: GenerationMode::default(),
            workers: default_workers(),
            generation_concurrency: default_generation_concurrency(),
            stage_timeout_secs: default_stage_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

fn default_workers() -> usize {
    2
}
fn default_generation_concurrency() -> usize {
    4
}
fn default_stage_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_backoff_factor() -> f64 {
    2.0
}

/// Which text-generation backend to call.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum GenerationProvider {
    #[default]
    Disabled,
    /// OpenAI-compatible chat completions. Reads `OPENAI_API_KEY`.
    Openai {
        model: String,
        #[serde(default = "default_openai_url")]
        url: String,
    },
    Ollama {
        model: String,
        #[serde(default = "default_ollama_url")]
        url: String,
    },
}

fn default_openai_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(flatten)]
    pub provider: GenerationProvider,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: GenerationProvider::Disabled,
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn options(&self) -> GenerationOptions {
        GenerationOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

fn default_max_tokens() -> u32 {
    4096
}
fn default_generation_timeout_secs() -> u64 {
    120
}

/// Where the property graph lives.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum GraphBackend {
    /// Process-local graph; contents are lost on exit.
    #[default]
    Memory,
    /// Neo4j transactional HTTP API. Password from `DOCGRAPH_GRAPH_PASSWORD`.
    Http {
        url: String,
        #[serde(default = "default_graph_database")]
        database: String,
        #[serde(default = "default_graph_user")]
        user: String,
    },
}

fn default_graph_database() -> String {
    "neo4j".to_string()
}
fn default_graph_user() -> String {
    "neo4j".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    #[serde(flatten)]
    pub backend: GraphBackend,
    #[serde(default = "default_graph_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: GraphBackend::Memory,
            timeout_secs: default_graph_timeout_secs(),
        }
    }
}

fn default_graph_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorrectionConfig {
    /// Synthesize required domain links the model left out.
    #[serde(default = "default_true")]
    pub complete_required_links: bool,
    /// TOML rule set replacing the built-in financial rules.
    #[serde(default)]
    pub rules_path: Option<PathBuf>,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            complete_required_links: true,
            rules_path: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubmitConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.txt", "**/*.md", "**/*.csv", "**/*.json", "**/*.pdf", "**/*.docx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7331".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.window_words == 0 {
        anyhow::bail!("chunking.window_words must be > 0");
    }
    if config.chunking.overlap_words >= config.chunking.window_words {
        anyhow::bail!("chunking.overlap_words must be < chunking.window_words");
    }

    if config.pipeline.workers == 0 {
        anyhow::bail!("pipeline.workers must be >= 1");
    }
    if config.pipeline.generation_concurrency == 0 {
        anyhow::bail!("pipeline.generation_concurrency must be >= 1");
    }
    if config.pipeline.stage_timeout_secs == 0 {
        anyhow::bail!("pipeline.stage_timeout_secs must be > 0");
    }

    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }
    if config.retry.backoff_factor < 1.0 {
        anyhow::bail!("retry.backoff_factor must be >= 1.0");
    }
    if config.retry.max_delay_ms < config.retry.initial_delay_ms {
        anyhow::bail!("retry.max_delay_ms must be >= retry.initial_delay_ms");
    }

    if !(0.0..=2.0).contains(&config.generation.temperature) {
        anyhow::bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if config.generation.max_tokens == 0 {
        anyhow::bail!("generation.max_tokens must be > 0");
    }
    match &config.generation.provider {
        GenerationProvider::Openai { model, .. } | GenerationProvider::Ollama { model, .. }
            if model.trim().is_empty() =>
        {
            anyhow::bail!("generation.model must not be empty");
        }
        _ => {}
    }

    if let GraphBackend::Http { url, .. } = &config.graph.backend {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            anyhow::bail!("graph.url must be an http(s) URL, got '{}'", url);
        }
    }

    Ok(())
}
