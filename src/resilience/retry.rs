// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Only used while opening the durable store, where a locked database file
//! or a slow filesystem mount can fail the first attempt.
//!
//! # Example
//!
//! ```
//! use lead_sync::RetryConfig;
//!
//! // Startup: a handful of attempts, then surface the error
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_attempts, 5);
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Backoff settings for a retried operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts including the first one (at least 1)
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::startup()
    }
}

impl RetryConfig {
    /// Fast-fail retry for opening the store.
    /// 5 attempts with exponential backoff, giving up after ~3 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Delay before attempt `n + 1`, given the delay used before attempt `n`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.factor).min(self.max_delay)
    }
}

pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= max_attempts {
                    return Err(err);
                }

                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempts, max_attempts, err, delay
                );

                sleep(delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}
