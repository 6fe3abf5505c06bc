//! Bounded retries and timeouts for forwarded replication calls.
//!
//! A write or fetch that has to reach a remote leader is retried only while
//! the failure is transient ([`TidelogError::is_retryable`]). Once the attempts
//! are exhausted the last error is handed back to the caller.

use crate::config::humantime_serde;
use crate::error::{Result, TidelogError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Add up to 25% jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, used for best-effort notifications.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Short delays, for tests and local clusters.
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(200),
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Backoff before retry number `attempt` (1-based), capped at
    /// `max_delay`, then stretched by up to 25% when jitter is on.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let grown = self.initial_delay.as_secs_f64()
            * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = Duration::from_secs_f64(grown.min(self.max_delay.as_secs_f64()));
        if self.jitter {
            capped.mul_f64(1.0 + clock_jitter() * 0.25)
        } else {
            capped
        }
    }
}

/// Value in `0.0..1.0` taken from the clock's sub-second nanos.
fn clock_jitter() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

/// Runs calls under a [`RetryConfig`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `f` until it succeeds, fails with a non-retryable error, or the
    /// attempts run out. The error of the last attempt is returned.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let error = match f().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() || attempt >= max_attempts => return Err(e),
                Err(e) => e,
            };

            let delay = self.config.delay_for_attempt(attempt);
            warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Call failed, backing off"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Runs `f`, failing with [`TidelogError::Timeout`] once `timeout` passes.
pub async fn with_timeout<F, Fut, T>(timeout: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, f())
        .await
        .map_err(|_| TidelogError::Timeout(timeout.as_millis() as u64))?
}
