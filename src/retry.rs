//! Exponential-backoff retry with a pluggable classifier.
//!
//! [`execute`] runs an async operation until it succeeds, fails with an
//! error the policy does not consider retryable, or uses up
//! `max_attempts` calls. The delay before retry `n` is
//! `min(initial_delay * backoff_factor^(n-1), max_delay)`.
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), docgraph::error::PipelineError> {
//! use std::time::Duration;
//! use docgraph::retry::{execute, RetryPolicy};
//!
//! let policy = RetryPolicy::default()
//!     .max_attempts(5)
//!     .initial_delay(Duration::from_millis(200));
//! let text = execute(&policy, || async { Ok::<_, docgraph::error::PipelineError>("ok") }).await?;
//! # Ok(()) }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{is_transient, PipelineError};

/// When and how often to retry.
pub struct RetryPolicy<E> {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    is_retryable: Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            backoff_factor: self.backoff_factor,
            is_retryable: Arc::clone(&self.is_retryable),
        }
    }
}

impl<E> RetryPolicy<E> {
    pub fn new(is_retryable: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
            is_retryable: Arc::new(is_retryable),
        }
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn retry_if(mut self, is_retryable: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.is_retryable = Arc::new(is_retryable);
        self
    }

    /// Same timing, different error type.
    pub fn with_classifier<E2>(
        &self,
        is_retryable: impl Fn(&E2) -> bool + Send + Sync + 'static,
    ) -> RetryPolicy<E2> {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            backoff_factor: self.backoff_factor,
            is_retryable: Arc::new(is_retryable),
        }
    }

    pub fn is_retryable(&self, err: &E) -> bool {
        (self.is_retryable)(err)
    }

    /// Delay after the `attempt`-th failed call (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}

impl RetryPolicy<PipelineError> {
    pub fn from_config(config: &RetryConfig) -> Self {
        RetryPolicy::new(is_transient)
            .max_attempts(config.max_attempts)
            .initial_delay(Duration::from_millis(config.initial_delay_ms))
            .max_delay(Duration::from_millis(config.max_delay_ms))
            .backoff_factor(config.backoff_factor)
    }
}

impl Default for RetryPolicy<PipelineError> {
    fn default() -> Self {
        RetryPolicy::new(is_transient)
    }
}

/// Run `operation` under `policy`, returning its first success or final error.
///
/// `max_attempts == 0` is treated as 1.
pub async fn execute<T, E, F, Fut>(policy: &RetryPolicy<E>, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !policy.is_retryable(&err) {
            return Err(err);
        }
        if attempt >= max_attempts {
            tracing::warn!(attempt, max_attempts, error = %err, "giving up after final attempt");
            return Err(err);
        }
        let delay = policy.delay_for(attempt);
        tracing::warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "attempt failed; retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Bound `fut` by `limit`; an elapsed deadline is a transient failure.
pub async fn deadline<T, Fut>(what: &str, limit: Duration, fut: Fut) -> Result<T, PipelineError>
where
    Fut: Future<Output = Result<T, PipelineError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::TransientIo(format!(
            "{} timed out after {:?}",
            what, limit
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy<PipelineError> {
        RetryPolicy::default()
            .initial_delay(Duration::ZERO)
            .max_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_non_retryable_error_calls_once() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute(&fast().max_attempts(5), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::PermanentRequest("401".into()))
        })
        .await;
        assert!(matches!(result, Err(PipelineError::PermanentRequest(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retryable_error_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = execute(&fast().max_attempts(3), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(PipelineError::TransientIo(format!("attempt {}", n)))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(PipelineError::TransientIo(msg)) => assert_eq!(msg, "attempt 3"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = execute(&fast().max_attempts(4), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PipelineError::TransientIo("reset".into()))
            } else {
                Ok("done")
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_attempts_runs_once() {
        let calls = AtomicU32::new(0);
        let _: Result<(), _> = execute(&fast().max_attempts(0), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::TransientIo("x".into()))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(|e: &String| e.starts_with("retry"))
            .initial_delay(Duration::ZERO)
            .max_attempts(4);
        let _: Result<(), String> = execute(&policy, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(if n == 0 { "retry me".to_string() } else { "fatal".to_string() })
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_delay_grows_geometrically_and_caps() {
        let policy = RetryPolicy::default()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_millis(500))
            .backoff_factor(2.0);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(60), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_deadline_maps_to_transient() {
        let result: Result<(), _> = deadline("extract", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(PipelineError::TransientIo(_))));
    }
}
