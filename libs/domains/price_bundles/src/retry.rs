//! Retry with exponential backoff for remote calls
//!
//! Every remote operation (catalog page, store lookup, create, update) runs
//! through [`RetryPolicy::run`], which retries transient and rate-limited
//! failures up to a fixed attempt ceiling and reports how many retries it used.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{ErrorCategory, Retryable};

/// Backoff configuration shared by catalog and store workers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Outcome of a retried operation plus the number of retries spent
#[derive(Debug)]
pub struct Retried<T, E> {
    pub result: Result<T, E>,
    pub retries: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Retries without sleeping between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
        }
    }

    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Delay before retry number `retry` (0-based); rate limits wait twice as long
    pub fn backoff(&self, retry: u32, category: ErrorCategory) -> Duration {
        let scale = match category {
            ErrorCategory::Permanent => return Duration::ZERO,
            ErrorCategory::Transient => 1.0,
            ErrorCategory::RateLimited => 2.0,
        };
        let exp = self.multiplier.max(1.0).powi(retry.min(32) as i32);
        let delay = (self.base_delay_ms as f64 * exp * scale).min(self.max_delay_ms as f64);
        Duration::from_millis(delay as u64)
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt ceiling is hit
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut op: F) -> Retried<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Ok(value) => {
                    return Retried {
                        result: Ok(value),
                        retries,
                    };
                }
                Err(err) => {
                    let category = err.category();
                    let attempt = retries + 1;
                    if category == ErrorCategory::Permanent || attempt >= self.max_attempts {
                        return Retried {
                            result: Err(err),
                            retries,
                        };
                    }

                    let wait = self.backoff(retries, category);
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Remote call failed, retrying with backoff"
                    );
                    tokio::time::sleep(wait).await;
                    retries += 1;
                }
            }
        }
    }
}
