//! Exponential-backoff retry for calls to unreliable upstreams.
//!
//! Every attempt runs under a deadline; an expired deadline counts as a
//! transient failure. Attempt `n` (1-based) that fails waits
//! `base_delay * 2^(n-1)`, capped at `max_delay`, before attempt `n + 1`.
//! Non-transient errors stop the loop immediately.

use showtime_common::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{BotError, BotResult};

/// Progress of a single [`RetryPolicy::execute`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAttempt {
    /// Attempts made so far
    pub count: u32,
    /// Wait before the next attempt
    pub next_delay: Duration,
    pub max_attempts: u32,
}

impl RetryAttempt {
    fn first(policy: &RetryPolicy) -> Self {
        Self {
            count: 0,
            next_delay: policy.base_delay,
            max_attempts: policy.max_attempts,
        }
    }

    fn exhausted(&self) -> bool {
        self.count >= self.max_attempts
    }
}

/// Retry settings applied to one kind of upstream call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    name: &'static str,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    call_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(
        name: &'static str,
        max_attempts: u32,
        base_delay: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            name,
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: Duration::from_secs(60),
            call_timeout,
        }
    }

    pub fn from_config(name: &'static str, config: &RetryConfig) -> Self {
        Self::new(
            name,
            config.max_attempts,
            config.base_delay(),
            config.call_timeout(),
        )
        .with_max_delay(config.max_delay())
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `operation` until it succeeds, fails permanently or attempts run out.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> BotResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BotResult<T>>,
    {
        let mut attempt = RetryAttempt::first(self);

        loop {
            attempt.count += 1;

            let result = match tokio::time::timeout(self.call_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(BotError::Timeout(self.call_timeout.as_millis() as u64)),
            };

            let err = match result {
                Ok(value) => {
                    if attempt.count > 1 {
                        info!(
                            operation = self.name,
                            attempt = attempt.count,
                            "Upstream recovered after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                warn!(
                    operation = self.name,
                    attempt = attempt.count,
                    error = %err,
                    "Upstream call failed permanently, not retrying"
                );
                return Err(err);
            }

            if attempt.exhausted() {
                warn!(
                    operation = self.name,
                    attempts = attempt.count,
                    error = %err,
                    "Upstream call failed, retries exhausted"
                );
                return Err(err);
            }

            attempt.next_delay = self.backoff_delay(attempt.count);
            warn!(
                operation = self.name,
                attempt = attempt.count,
                max_attempts = attempt.max_attempts,
                delay_ms = attempt.next_delay.as_millis() as u64,
                error = %err,
                "Upstream call failed, retrying"
            );
            tokio::time::sleep(attempt.next_delay).await;
        }
    }
}
