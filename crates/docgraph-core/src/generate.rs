//! Text-generation capability and its error taxonomy.
//!
//! The pipeline treats "send a prompt, get text back" as an opaque
//! capability behind [`TextGenerator`]. Concrete providers (OpenAI-compatible
//! chat completions, Ollama) live in the `docgraph` app crate and are
//! selected once from configuration.
//!
//! Providers make a single attempt per call. Retrying is the caller's job;
//! [`GenerationError::is_retryable`] tells it which failures are worth
//! another attempt.

use std::time::Duration;

use async_trait::async_trait;

/// Per-call sampling and deadline options.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 4096,
            timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    /// Malformed request, rejected credentials, or an unusable response.
    #[error("generation request failed: {0}")]
    Request(String),
}

impl GenerationError {
    /// Transient failures: provider down, rate limit, timeout.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::ProviderUnavailable(_)
                | GenerationError::RateLimited(_)
                | GenerationError::Timeout(_)
        )
    }
}

/// A text-generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier, recorded with stage logs.
    fn model_name(&self) -> &str;

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError>;
}
