//! Retry wrapper for generation providers
//!
//! Retries transient failures with exponential backoff, but only while the
//! failing attempt has not produced any event yet. Once text has reached the
//! caller a retry would duplicate it, so mid-stream failures pass through.

use async_trait::async_trait;
use futures::{stream, StreamExt};
use std::time::Duration;
use tracing::{error, warn};

use super::{EventStream, GenerationProvider, GenerationRequest, Result};

/// Backoff settings
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt` (1-based):
    /// `min(initial * base^(attempt-1), max)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_base.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }
}

/// Provider wrapper that retries transient failures
pub struct RetryingProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: GenerationProvider> RetryingProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl<P: GenerationProvider> GenerationProvider for RetryingProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn stream(&self, request: GenerationRequest) -> Result<EventStream> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let failure = match self.inner.stream(request.clone()).await {
                Ok(mut events) => match events.next().await {
                    // Nothing yielded yet, so a transient first-item error is retryable.
                    Some(Err(e)) => e,
                    Some(Ok(first)) => {
                        return Ok(Box::pin(stream::once(async move { Ok(first) }).chain(events)))
                    }
                    None => return Ok(Box::pin(stream::empty())),
                },
                Err(e) => e,
            };

            if !failure.is_transient() {
                return Err(failure);
            }
            if attempt >= max_attempts {
                error!("All {} generation attempts failed: {}", max_attempts, failure);
                return Err(failure);
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                "Generation attempt {}/{} failed, retrying in {:.1}s: {}",
                attempt,
                max_attempts,
                delay.as_secs_f64(),
                failure
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
