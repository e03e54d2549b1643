//! Retry policy for the per-block scan
//!
//! Exponential backoff with an optional cap, optional jitter and an optional
//! attempt limit. Only errors that report `is_retryable()` are retried; a
//! rate-limit `Retry-After` is honoured when it is longer than the backoff.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::Result;

/// Upper bound on any single wait when no cap is configured
const DELAY_CEILING_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Wait before the first retry
    pub initial_delay: Duration,
    /// Growth factor per attempt (historically 1.2)
    pub multiplier: f64,
    /// Cap on a single wait
    pub max_delay: Option<Duration>,
    /// Extra random wait, as a fraction of the computed delay (0.0 = none)
    pub jitter: f64,
    /// Total attempts including the first; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(15),
            multiplier: 1.2,
            max_delay: Some(Duration::from_secs(300)),
            jitter: 0.0,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let mut secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        if let Some(cap) = self.max_delay {
            secs = secs.min(cap.as_secs_f64());
        }
        if !secs.is_finite() {
            secs = DELAY_CEILING_SECS;
        }
        Duration::from_secs_f64(secs.clamp(0.0, DELAY_CEILING_SECS))
    }

    /// Delay before retry number `attempt`, jitter included
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
        base + base.mul_f64(extra)
    }

    fn has_attempts_left(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt + 1 < max)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. `op` receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && self.has_attempts_left(attempt) => {
                    let delay = self
                        .delay_for(attempt)
                        .max(e.retry_after().unwrap_or_default());
                    warn!(
                        "Attempt {} failed: {} - retrying in {:.1}s",
                        attempt + 1,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
