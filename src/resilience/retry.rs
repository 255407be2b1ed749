// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded retry for connection setup.
//!
//! Per-request store, cache and audit calls are never retried here; they
//! have their own deadlines and fallbacks.
//!
//! ```
//! use ranked_store::RetryConfig;
//!
//! assert_eq!(RetryConfig::startup().attempts, 5);
//! assert_eq!(RetryConfig::query().attempts, 3);
//! ```

use std::future::Future;
use std::iter;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// How many times to try, and how long to pause in between.
///
/// Pauses start at `first_delay` and double up to `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, the first one included
    pub attempts: u32,
    pub first_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::startup()
    }
}

impl RetryConfig {
    /// Pool and client connections at startup: five tries, about three
    /// seconds of waiting in total.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            attempts: 5,
            first_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }

    /// One-off setup statements such as schema creation.
    #[must_use]
    pub fn query() -> Self {
        Self {
            attempts: 3,
            first_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            attempts: 3,
            first_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    /// The pauses between attempts, in order.
    pub fn pauses(&self) -> impl Iterator<Item = Duration> {
        let max = self.max_delay;
        iter::successors(Some(self.first_delay.min(max)), move |pause| {
            Some(pause.saturating_mul(2).min(max))
        })
        .take(self.attempts.saturating_sub(1) as usize)
    }
}

/// Run `operation` until it succeeds or the attempts are used up; the last
/// error is returned.
pub async fn retry<F, Fut, T, E>(name: &str, config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut pauses = config.pauses();
    let mut attempt = 1;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = name, attempt, "Succeeded after retrying");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        let Some(pause) = pauses.next() else {
            warn!(operation = name, attempt, error = %err, "Giving up");
            return Err(err);
        };
        warn!(operation = name, attempt, of = config.attempts, error = %err, ?pause, "Attempt failed, retrying");
        sleep(pause).await;
        attempt += 1;
    }
}
