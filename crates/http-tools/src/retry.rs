use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Exponential backoff for transient upstream failures.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (`0` disables retrying).
    pub max_retries: usize,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f32,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn strategy(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.min_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms.max(self.min_delay_ms)))
            .with_factor(self.backoff_factor.max(1.0))
            .with_max_times(self.max_retries);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Run `operation`, retrying while `should_retry` accepts the error.
    ///
    /// `notify` is called before each backoff sleep with the error and the delay.
    ///
    /// # Errors
    ///
    /// Returns the last error once retries are exhausted or the error is not retryable.
    pub async fn run<F, Fut, T, E, P, N>(
        &self,
        operation: F,
        should_retry: P,
        notify: N,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: FnMut(&E) -> bool,
        N: FnMut(&E, Duration),
    {
        let strategy = self.strategy();
        operation
            .retry(strategy)
            .when(should_retry)
            .notify(notify)
            .await
    }
}

/// Server-side failures are worth another attempt; client errors never are.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    (500..=599).contains(&status)
}
