//! Shared retry configuration.
//!
//! Cursor commits retry through [`with_retry`]. Fetch and upload retries are
//! driven by the engine's state machine, which pulls its delays from
//! [`RetryConfig::delays`].

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder, Retryable};

/// Initial backoff delay.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Backoff delay ceiling.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: INITIAL_BACKOFF,
            max_delay: MAX_BACKOFF,
            max_retries: DEFAULT_MAX_RETRIES,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }

    /// Backoff delays for a retry loop the caller drives itself. Yields
    /// `max_retries` delays, then `None`.
    #[must_use]
    pub fn delays(self) -> ExponentialBackoff {
        self.into_backoff().build()
    }
}

/// Run `operation`, retrying errors accepted by `is_transient` with
/// exponential backoff. `on_retry` sees every error that will be retried,
/// with the delay before the next attempt.
pub async fn with_retry<T, E, F, Fut, IsTransient, OnRetry>(
    operation: F,
    config: RetryConfig,
    is_transient: IsTransient,
    mut on_retry: OnRetry,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    IsTransient: FnMut(&E) -> bool,
    OnRetry: FnMut(&E, Duration),
{
    operation
        .retry(config.into_backoff())
        .notify(|err, dur| on_retry(err, dur))
        .when(is_transient)
        .await
}
