//! Schema-extraction stage: one generation call per document.

use docgraph_core::generate::{GenerationOptions, TextGenerator};
use docgraph_core::schema::GraphSchema;

use crate::error::PipelineError;
use crate::prompts::{schema_user_prompt, SCHEMA_SYSTEM_PROMPT};
use crate::retry::{deadline, execute, RetryPolicy};

/// Ask the model for a schema and parse it.
///
/// Each generation attempt is bounded by `options.timeout` and retried
/// per `policy`; a response that does not parse into a schema is a
/// permanent failure.
pub async fn extract_schema(
    generator: &dyn TextGenerator,
    options: &GenerationOptions,
    policy: &RetryPolicy<PipelineError>,
    text: &str,
) -> Result<GraphSchema, PipelineError> {
    let prompt = schema_user_prompt(text);
    let raw = execute(policy, || {
        deadline("schema extraction", options.timeout, async {
            generator
                .generate(SCHEMA_SYSTEM_PROMPT, &prompt, options)
                .await
                .map_err(PipelineError::from)
        })
    })
    .await?;

    let schema = GraphSchema::from_model_output(&raw).map_err(|e| {
        PipelineError::PermanentRequest(format!("schema extraction returned unusable output: {}", e))
    })?;
    tracing::debug!(
        labels = schema.nodes().len(),
        relationships = schema.relationships().len(),
        "extracted schema"
    );
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use docgraph_core::generate::GenerationError;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Replies(Mutex<Vec<Result<String, GenerationError>>>);

    #[async_trait]
    impl TextGenerator for Replies {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _system: &str,
            _user: &str,
            _options: &GenerationOptions,
        ) -> Result<String, GenerationError> {
            self.0.lock().unwrap().remove(0)
        }
    }

    fn policy() -> RetryPolicy<PipelineError> {
        RetryPolicy::default().initial_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_retries_transient_then_parses() {
        let generator = Replies(Mutex::new(vec![
            Err(GenerationError::RateLimited("slow down".into())),
            Ok(r#"{"nodes": {"Account": ["accountId"]}, "relationships": []}"#.into()),
        ]));
        let schema = extract_schema(&generator, &GenerationOptions::default(), &policy(), "text")
            .await
            .unwrap();
        assert_eq!(schema.properties("Account").unwrap(), &["accountId"]);
    }

    #[tokio::test]
    async fn test_unparseable_schema_is_permanent() {
        let generator = Replies(Mutex::new(vec![Ok("I cannot help with that".into())]));
        let err = extract_schema(&generator, &GenerationOptions::default(), &policy(), "text")
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::PermanentRequest(_)));
    }
}
