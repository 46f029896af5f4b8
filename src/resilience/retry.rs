// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded retry with exponential backoff.
//!
//! Only used while establishing the store connection: a misconfigured URL
//! should fail within a few seconds, a database that is still booting should
//! not.
//!
//! ```
//! use query_engine::resilience::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::connect(5);
//! assert_eq!(policy.attempts, 5);
//! assert_eq!(policy.delay_before(2), Duration::from_millis(400));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub attempts: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl RetryPolicy {
    /// Connection preset: 200ms doubling up to 2s between attempts.
    #[must_use]
    pub fn connect(attempts: usize) -> Self {
        Self {
            attempts,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Sleep preceding attempt number `attempt` (0-based; attempt 0 never waits).
    #[must_use]
    pub fn delay_before(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX).min(16);
        self.initial_delay
            .mul_f64(self.factor.powi(exponent))
            .min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or the policy's attempts are used up,
/// returning the last error.
pub async fn retry<F, Fut, T, E>(label: &str, policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        sleep(policy.delay_before(attempt)).await;

        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    info!(label, attempt, "succeeded after retrying");
                }
                return Ok(value);
            }
            Err(err) if attempt + 1 >= attempts => return Err(err),
            Err(err) => {
                attempt += 1;
                warn!(
                    label,
                    attempt,
                    attempts,
                    error = %err,
                    next_delay = ?policy.delay_before(attempt),
                    "attempt failed, retrying"
                );
            }
        }
    }
}
