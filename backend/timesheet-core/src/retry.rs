// src/retry.rs
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::ServiceError;

/// Runs `call` with a deadline; running past it counts as a transient timeout.
pub async fn with_deadline<T, Fut>(deadline: Duration, context: &str, call: Fut) -> Result<T, ServiceError>
where
    Fut: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout {
            context: context.to_string(),
            timeout_secs: deadline.as_secs(),
        }),
    }
}

/// Single retry policy shared by the fetcher and the batch executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Backoff is capped here.
    pub max_delay: Duration,
    /// Adds up to 10% random spread so parallel workers don't retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        let raw = self.base_delay.saturating_mul(factor);
        let capped = raw.min(self.max_delay);
        if !self.jitter || capped.is_zero() {
            return capped;
        }
        let spread_ms = (capped.as_millis() / 10) as u64;
        if spread_ms == 0 {
            return capped;
        }
        let extra = rand::thread_rng().gen_range(0..=spread_ms);
        capped + Duration::from_millis(extra)
    }

    /// Runs `call` until it succeeds, fails permanently, or retries run out.
    ///
    /// Backoff sleeps end early when `cancel` fires; the result is then
    /// `ServiceError::Cancelled`. A call already in progress is never interrupted.
    pub async fn run<T, F, Fut>(
        &self,
        context: &str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, ServiceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(
                        "Transient failure for '{}' (attempt {}/{}): {}. Retrying in {:?}",
                        context,
                        attempt,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            info!("Retry of '{}' cancelled during backoff", context);
                            return Err(ServiceError::Cancelled {
                                context: context.to_string(),
                            });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
