//! Retry with exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use scout_core::config::RetryConfig;
use scout_core::{ApiError, RawError, normalize_error};

/// Jitter is applied as a uniform factor in `1 ± JITTER`.
const JITTER: f64 = 0.2;

/// Backoff schedule for one call site.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts after the first; `0` disables retries.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay before retry number `attempt` (1-based):
    /// `min(initial × multiplier^(attempt-1), max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        if capped.is_finite() && capped > 0.0 { Duration::from_secs_f64(capped / 1000.0) } else { Duration::ZERO }
    }

    /// Delay actually slept before retry number `attempt`.
    ///
    /// A rate-limit error's `retry_after` raises the delay, bounded by `max_delay`.
    fn delay_for(&self, attempt: u32, err: &ApiError) -> Duration {
        let factor = rand::thread_rng().gen_range((1.0 - JITTER)..=(1.0 + JITTER));
        let delay = self.backoff_delay(attempt).mul_f64(factor);
        match err.retry_after() {
            Some(after) => delay.max(after.min(self.max_delay)),
            None => delay,
        }
    }
}

/// Run `f` until it succeeds, fails with a non-retryable error, or the
/// retry budget is spent.
///
/// Every failure is normalized with [`normalize_error`] for `provider` and
/// `endpoint`; the last normalized error is returned.
pub async fn with_retry<T, F, Fut>(f: F, policy: &RetryPolicy, provider: &str, endpoint: &str) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RawError>>,
{
    with_retry_notify(f, policy, provider, endpoint, |_, _| {}).await
}

/// [`with_retry`] with a hook called as `on_retry(attempt, &err)` before
/// each backoff sleep. `attempt` is the 1-based number of the failed attempt.
pub async fn with_retry_notify<T, F, Fut, N>(
    mut f: F, policy: &RetryPolicy, provider: &str, endpoint: &str, mut on_retry: N,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RawError>>,
    N: FnMut(u32, &ApiError),
{
    let mut attempt: u32 = 1;
    loop {
        let err = match f().await {
            Ok(value) => return Ok(value),
            Err(raw) => normalize_error(raw, provider, endpoint),
        };

        if !err.is_retryable() {
            tracing::debug!(provider, endpoint, kind = err.kind(), "not retrying: {err}");
            return Err(err);
        }
        if attempt > policy.max_retries {
            tracing::debug!(provider, endpoint, attempts = attempt, "retry budget exhausted: {err}");
            return Err(err);
        }

        let delay = policy.delay_for(attempt, &err);
        tracing::debug!(provider, endpoint, attempt, delay_ms = delay.as_millis() as u64, "retrying after {err}");
        on_retry(attempt, &err);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
