//! Retry utilities for transient backend errors.

use crate::core::{MetricsError, Result};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Decides whether a failed attempt is worth repeating.
pub type Classifier = Arc<dyn Fn(&MetricsError) -> bool + Send + Sync>;

/// Bounded retry with a fixed sequence of backoff delays.
///
/// A failed attempt is retried after each configured delay in turn. Once the
/// delays are used up one final attempt is made, so a policy with `n` delays
/// makes at most `n + 2` attempts.
#[derive(Clone)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
    classifier: Classifier,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("delays", &self.delays)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(vec![
            Duration::from_secs(1),
            Duration::from_secs(3),
            Duration::from_secs(5),
        ])
    }
}

impl RetryPolicy {
    /// Create a policy that retries transient errors after each delay.
    pub fn new(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            classifier: Arc::new(MetricsError::is_transient),
        }
    }

    /// Replace the retriable-error classifier.
    pub fn with_classifier<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&MetricsError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Configured backoff delays, in order.
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Maximum number of attempts this policy will make.
    pub fn max_attempts(&self) -> usize {
        self.delays.len().saturating_add(2)
    }

    /// Execute an operation with retry logic.
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with_cancel(&CancellationToken::new(), operation).await
    }

    /// Execute an operation with retry logic, giving up when `cancel` fires.
    ///
    /// Cancellation is observed before every attempt and while sleeping
    /// between attempts.
    pub async fn run_with_cancel<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(MetricsError::Cancelled);
            }
            attempt += 1;

            let error = match operation().await {
                Ok(result) => return Ok(result),
                Err(error) => error,
            };

            if !(self.classifier)(&error) {
                return Err(error);
            }

            if attempt >= max_attempts {
                tracing::error!("Operation failed after {} attempts: {}", attempt, error);
                return Err(MetricsError::RetriesExhausted {
                    attempts: attempt,
                    last: error.to_string(),
                });
            }

            match self.delays.get(attempt - 1) {
                Some(delay) => {
                    tracing::warn!(
                        "Attempt {} failed: {}. Retrying in {:?}...",
                        attempt,
                        error,
                        delay
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(MetricsError::Cancelled),
                        _ = sleep(*delay) => {},
                    }
                },
                None => {
                    tracing::warn!("Attempt {} failed: {}. Making final attempt", attempt, error);
                },
            }
        }
    }
}
