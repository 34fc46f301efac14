//! Bounded retry with exponential backoff for external service calls.
//!
//! Both the vision and inference stages run their provider calls through the same
//! [`RetryPolicy`]. Each attempt is bounded by the per-call timeout; only failures classified
//! as [`FailureClass::Transient`] are retried. With a 250 ms base, multiplier 2 and three
//! attempts the waits are 250 ms → 500 ms, so a stage never takes longer than
//! [`RetryPolicy::worst_case_duration`].

use crate::upstream::FailureClass;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Errors that can be sorted into retryable and terminal failures.
pub trait Classify: Sized {
    /// Whether the failure may succeed on another attempt.
    fn class(&self) -> FailureClass;

    /// Error reported when an attempt exceeds the per-call timeout.
    fn timed_out(after: Duration) -> Self;
}

/// Retry discipline shared by every external call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Wait before the first retry.
    pub base_delay: Duration,
    /// Growth factor applied to the wait after each retry.
    pub multiplier: f64,
    /// Upper bound for a single wait.
    pub max_delay: Duration,
    /// Budget for a single attempt; elapsed attempts are cancelled.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            multiplier: 2.0,
            max_delay: Duration::from_secs(4),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Wait applied before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Longest time a stage can take: every attempt timing out plus every backoff.
    pub fn worst_case_duration(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let backoff: Duration = (1..attempts).map(|retry| self.backoff_for(retry)).sum();
        self.call_timeout * attempts + backoff
    }

    /// Run `operation` until it succeeds, fails permanently, or the attempt budget is spent.
    ///
    /// The closure receives the 1-based attempt number. The last error is returned once
    /// attempts are exhausted.
    pub async fn run<T, E, F, Fut>(&self, stage: &'static str, mut operation: F) -> Result<T, E>
    where
        E: Classify + Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = match timeout(self.call_timeout, operation(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(E::timed_out(self.call_timeout)),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(stage, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    let class = error.class();
                    if class == FailureClass::Permanent || attempt >= attempts {
                        tracing::warn!(
                            stage,
                            attempt,
                            max_attempts = attempts,
                            class = %class,
                            error = %error,
                            "Giving up on external call"
                        );
                        return Err(error);
                    }

                    let wait = self.backoff_for(attempt);
                    tracing::warn!(
                        stage,
                        attempt,
                        max_attempts = attempts,
                        backoff_ms = wait.as_millis() as u64,
                        error = %error,
                        "Transient failure; retrying"
                    );
                    sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}
