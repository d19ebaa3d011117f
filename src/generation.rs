//! Text-generation providers.
//!
//! Implementations of [`TextGenerator`]:
//! - **[`DisabledGenerator`]**: always fails; used when `[generation]` is not configured.
//! - **[`OpenAiGenerator`]**: OpenAI-compatible `POST {url}/chat/completions`.
//! - **[`OllamaGenerator`]**: a local Ollama instance's `POST /api/chat`.
//!
//! Use [`create_generator`] to build the provider selected by
//! [`GenerationProvider`] once at startup.
//!
//! # Error mapping
//!
//! | Response | [`GenerationError`] |
//! |----------|---------------------|
//! | connect failure, HTTP 5xx | `ProviderUnavailable` |
//! | HTTP 429 | `RateLimited` |
//! | HTTP 404 | `ModelNotFound` |
//! | request deadline elapsed | `Timeout` |
//! | other 4xx, unparseable body | `Request` |
//!
//! Providers make one attempt; the pipeline retries through
//! [`retry`](crate::retry).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;

use docgraph_core::generate::{GenerationError, GenerationOptions, TextGenerator};

use crate::config::{GenerationConfig, GenerationProvider};

/// Build the configured generator.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn TextGenerator>> {
    match &config.provider {
        GenerationProvider::Disabled => Ok(Arc::new(DisabledGenerator)),
        GenerationProvider::Openai { model, url } => {
            Ok(Arc::new(OpenAiGenerator::new(model, url)?))
        }
        GenerationProvider::Ollama { model, url } => Ok(Arc::new(OllamaGenerator::new(model, url)?)),
    }
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?)
}

fn classify_send_error(err: reqwest::Error, timeout: Duration, provider: &str) -> GenerationError {
    if err.is_timeout() {
        GenerationError::Timeout(timeout)
    } else if err.is_connect() || err.is_request() {
        GenerationError::ProviderUnavailable(format!("{} connection error: {}", provider, err))
    } else {
        GenerationError::Request(format!("{}: {}", provider, err))
    }
}

fn classify_status(status: StatusCode, body: &str, provider: &str, model: &str) -> GenerationError {
    let message = format!("{} API error {}: {}", provider, status, body);
    match status.as_u16() {
        429 => GenerationError::RateLimited(message),
        404 => GenerationError::ModelNotFound(format!("{} ({})", model, message)),
        s if s >= 500 => GenerationError::ProviderUnavailable(message),
        _ => GenerationError::Request(message),
    }
}

// ============ Disabled ============

/// Generator used when no provider is configured.
#[derive(Debug, Default)]
pub struct DisabledGenerator;

#[async_trait]
impl TextGenerator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _system_prompt: &str,
        _user_prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        Err(GenerationError::Request(
            "text generation is disabled; set [generation] provider in the config".to_string(),
        ))
    }
}

// ============ OpenAI ============

/// OpenAI-compatible chat completions. Requires `OPENAI_API_KEY`.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
}

impl OpenAiGenerator {
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not in the environment.
    pub fn new(model: &str, url: &str) -> Result<Self> {
        let api_key = match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        Ok(Self {
            client: http_client()?,
            model: model.to_string(),
            url: url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.url))
            .bearer_auth(&self.api_key)
            .timeout(options.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send_error(e, options.timeout, "OpenAI"))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body_text, "OpenAI", &self.model));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify_send_error(e, options.timeout, "OpenAI"))?;
        parse_openai_response(&json)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<String, GenerationError> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            GenerationError::Request(
                "Invalid OpenAI response: missing choices[0].message.content".to_string(),
            )
        })
}

// ============ Ollama ============

/// Generator backed by a local Ollama instance.
pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
}

impl OllamaGenerator {
    pub fn new(model: &str, url: &str) -> Result<Self> {
        Ok(Self {
            client: http_client()?,
            model: model.to_string(),
            url: url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            },
        });

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .timeout(options.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                classify_send_error(e, options.timeout, &format!("Ollama at {}", self.url))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body_text, "Ollama", &self.model));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify_send_error(e, options.timeout, "Ollama"))?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<String, GenerationError> {
    json.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            GenerationError::Request("Invalid Ollama response: missing message.content".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "", "OpenAI", "m"),
            GenerationError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, "", "Ollama", "llama"),
            GenerationError::ModelNotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, "", "OpenAI", "m"),
            GenerationError::ProviderUnavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key", "OpenAI", "m"),
            GenerationError::Request(_)
        ));
    }

    #[test]
    fn test_parse_responses() {
        let openai = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "MERGE (a:Account {accountId: 'A1'})"}}]
        });
        assert_eq!(
            parse_openai_response(&openai).unwrap(),
            "MERGE (a:Account {accountId: 'A1'})"
        );
        assert!(parse_openai_response(&serde_json::json!({"choices": []})).is_err());

        let ollama = serde_json::json!({"message": {"role": "assistant", "content": "ok"}, "done": true});
        assert_eq!(parse_ollama_response(&ollama).unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_disabled_generator_is_permanent_failure() {
        let err = DisabledGenerator
            .generate("s", "u", &GenerationOptions::default())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_ollama_is_unavailable() {
        let generator = OllamaGenerator::new("llama3.1", "http://127.0.0.1:1").unwrap();
        let options = GenerationOptions {
            timeout: Duration::from_secs(5),
            ..GenerationOptions::default()
        };
        let err = generator.generate("s", "u", &options).await.unwrap_err();
        assert!(err.is_retryable(), "{:?}", err);
    }

    #[test]
    fn test_create_disabled() {
        let generator = create_generator(&GenerationConfig::default()).unwrap();
        assert_eq!(generator.model_name(), "disabled");
    }
}
