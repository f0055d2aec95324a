//! Retry middleware.
//!
//! Retries requests that fail with a transient error or come back with a
//! retryable status, sleeping with exponential backoff and jitter between
//! attempts.

use super::{HttpMiddleware, Next};
use crate::backoff::ExponentialBackoff;
use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Request, Response, StatusCode};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Policy for determining which errors should be retried.
pub trait RetryPolicy: Send + Sync {
    /// Check if the given error should be retried.
    fn should_retry(&self, error: &TransportError) -> bool;
}

impl<F> RetryPolicy for F
where
    F: Fn(&TransportError) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &TransportError) -> bool {
        self(error)
    }
}

/// Retries connect failures, timeouts and I/O errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {
    fn should_retry(&self, error: &TransportError) -> bool {
        error.is_transient()
    }
}

/// Configuration for [`RetryMiddleware`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay schedule between attempts.
    pub backoff: ExponentialBackoff,
    /// Status codes worth another attempt.
    pub retry_statuses: Vec<u16>,
    /// Use the server's `Retry-After` on 429 and 503, capped at the
    /// backoff's `max_delay`.
    pub respect_retry_after: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(30), 2.0)
                .with_jitter(0.1),
            retry_statuses: vec![429, 502, 503, 504],
            respect_retry_after: true,
        }
    }
}

impl RetryConfig {
    /// Set the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff schedule.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Replace the retryable status set.
    #[must_use]
    pub fn with_retry_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_statuses = statuses.into_iter().collect();
        self
    }

    /// Ignore `Retry-After` headers.
    #[must_use]
    pub const fn ignore_retry_after(mut self) -> Self {
        self.respect_retry_after = false;
        self
    }
}

/// Middleware that retries transient failures.
#[derive(Clone)]
pub struct RetryMiddleware {
    config: RetryConfig,
    policy: Arc<dyn RetryPolicy>,
}

impl fmt::Debug for RetryMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryMiddleware")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for RetryMiddleware {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryMiddleware {
    /// Create a retry middleware with the default error policy.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            policy: Arc::new(DefaultRetryPolicy),
        }
    }

    /// Set a custom retry policy for errors.
    #[must_use]
    pub fn with_policy<P: RetryPolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn retry_after(&self, response: &Response) -> Option<Duration> {
        if !self.config.respect_retry_after {
            return None;
        }
        if !matches!(
            response.status(),
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
        ) {
            return None;
        }
        let seconds: u64 = response
            .headers()
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()?;
        Some(Duration::from_secs(seconds).min(self.config.backoff.max_delay))
    }
}

async fn status_error(response: Response) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransportError::HttpStatus { status, body }
}

#[async_trait]
impl HttpMiddleware for RetryMiddleware {
    async fn handle(&self, request: Request, next: Next<'_>) -> Result<Response, TransportError> {
        let mut attempt = 0u32;
        let mut pending = request;

        loop {
            let spare = if attempt < self.config.max_retries {
                pending.try_clone()
            } else {
                None
            };

            let (request, delay, reason) = match next.run(pending).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if !self.config.retry_statuses.contains(&status) {
                        return Ok(response);
                    }
                    let Some(request) = spare else {
                        debug!(attempt, status, "retries exhausted");
                        return Err(status_error(response).await);
                    };
                    let delay = self
                        .retry_after(&response)
                        .unwrap_or_else(|| self.config.backoff.jittered_delay(attempt));
                    (request, delay, format!("HTTP {status}"))
                }
                Err(error) => {
                    if !self.policy.should_retry(&error) {
                        debug!(attempt, error = %error, "error is not retriable, giving up");
                        return Err(error);
                    }
                    let Some(request) = spare else {
                        debug!(attempt, error = %error, "retries exhausted");
                        return Err(error);
                    };
                    let delay = self.config.backoff.jittered_delay(attempt);
                    (request, delay, error.to_string())
                }
            };

            warn!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                reason = %reason,
                "request failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
            pending = request;
        }
    }
}
