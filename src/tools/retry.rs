//! Retry manager with exponential backoff
//!
//! Used for idempotent calls to the peer service (tool discovery). Tool
//! forwarding is never retried: a forwarded call may already have had
//! effects on the other side.
//! - Binary exponential delay with ±25% jitter
//! - Delay capped at 16s
//! - Only transport-level failures are retried

use crate::errors::{EngineError, Result};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Maximum number of attempts
pub const MAX_RETRIES: u32 = 5;

/// Base delay for exponential backoff (1 second)
const BASE_DELAY_MS: u64 = 1000;

/// Maximum delay cap (16 seconds)
const MAX_DELAY_MS: u64 = 16000;

/// Retry manager with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryManager {
    /// Maximum attempts, including the first
    max_retries: u32,

    /// Base delay in milliseconds
    base_delay_ms: u64,

    /// Maximum delay cap in milliseconds
    max_delay_ms: u64,

    enable_jitter: bool,
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryManager {
    pub fn new() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay_ms: BASE_DELAY_MS,
            max_delay_ms: MAX_DELAY_MS,
            enable_jitter: true,
        }
    }

    /// Create retry manager with custom settings
    pub fn with_config(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay_ms,
            max_delay_ms: MAX_DELAY_MS,
            enable_jitter: true,
        }
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts
    /// run out. The last error is returned unchanged.
    pub async fn execute_with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !self.is_retryable(&e) {
                        return Err(e);
                    }

                    attempt += 1;
                    if attempt >= self.max_retries {
                        return Err(e);
                    }

                    let delay = self.calculate_delay(attempt - 1);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying");
                    sleep(delay).await;
                }
            }
        }
    }

    /// Delay before retry number `attempt` (0-based)
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponential_delay = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        let delay_ms = exponential_delay.min(self.max_delay_ms);

        let final_delay = if self.enable_jitter {
            let jitter = (delay_ms / 4) as i64;
            let random_jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter as f64;
            ((delay_ms as i64) + random_jitter as i64).max(0) as u64
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }

    fn is_retryable(&self, error: &EngineError) -> bool {
        matches!(
            error,
            EngineError::ProxyUnreachable(_) | EngineError::HttpError(_) | EngineError::Timeout { .. }
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}
