//! Per-provider token bucket rate limiter with a FIFO wait queue.
//!
//! Each provider gets a bucket holding up to `burst_limit` tokens, refilled
//! continuously at `requests_per_minute`. A caller that finds no token (or
//! finds others already waiting) joins the provider's queue and is served
//! in arrival order as tokens accrue. Queued callers wake on their own when
//! the next token is due, so a waiter is served even if no further
//! `acquire` arrives.
//!
//! State is in-memory and owned by the limiter instance.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use scout_core::ApiError;
use scout_core::config::{ProviderRateLimit, RateLimiterConfig};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Lower bound on a waiter's sleep, so float rounding cannot spin.
const MIN_WAKE: Duration = Duration::from_millis(1);

type Grant = Result<(), ApiError>;

#[derive(Debug)]
struct Waiter {
    endpoint: String,
    enqueued_at: Instant,
    tx: oneshot::Sender<Grant>,
}

#[derive(Debug)]
struct Bucket {
    config: ProviderRateLimit,
    tokens: f64,
    last_refill: Instant,
    queue: VecDeque<Waiter>,
    hits: u64,
    limited: u64,
}

impl Bucket {
    fn new(config: ProviderRateLimit) -> Self {
        let tokens = config.burst() as f64;
        Self { config, tokens, last_refill: Instant::now(), queue: VecDeque::new(), hits: 0, limited: 0 }
    }

    fn capacity(&self) -> f64 {
        self.config.burst() as f64
    }

    /// Tokens per second.
    fn rate(&self) -> f64 {
        self.config.requests_per_minute as f64 / 60.0
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate()).min(self.capacity());
        self.last_refill = now;
    }

    fn time_until_token(&self) -> Duration {
        if self.tokens >= 1.0 || self.rate() <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - self.tokens) / self.rate())
    }

    /// No token now and none will ever accrue (zero rate or zero capacity).
    fn exhausted(&self) -> bool {
        self.tokens < 1.0 && (self.rate() <= 0.0 || self.capacity() < 1.0)
    }

    fn take(&mut self) {
        self.tokens -= 1.0;
        self.hits += 1;
    }

    /// Refill, then expire and serve queued waiters from the front.
    ///
    /// A waiter whose caller has gone away is skipped without spending a token.
    fn drain(&mut self, provider: &str, queue_timeout: Duration, now: Instant) {
        self.refill(now);

        while let Some(front) = self.queue.front() {
            if front.tx.is_closed() {
                self.queue.pop_front();
                continue;
            }

            if now.saturating_duration_since(front.enqueued_at) >= queue_timeout {
                if let Some(waiter) = self.queue.pop_front() {
                    tracing::warn!(provider, endpoint = %waiter.endpoint, "rate limit wait timed out");
                    let err = ApiError::timeout(
                        provider,
                        &waiter.endpoint,
                        format!("waited longer than {queue_timeout:?} for a rate limit token"),
                    );
                    let _ = waiter.tx.send(Err(err));
                }
                continue;
            }

            if self.exhausted() {
                if let Some(waiter) = self.queue.pop_front() {
                    let err = ApiError::rate_limit(provider, &waiter.endpoint, "rate limit allows no further requests", None);
                    let _ = waiter.tx.send(Err(err));
                }
                continue;
            }

            if self.tokens < 1.0 {
                break;
            }

            if let Some(waiter) = self.queue.pop_front()
                && waiter.tx.send(Ok(())).is_ok()
            {
                self.take();
            }
        }
    }

    /// When a queued waiter should next check the bucket.
    fn next_wake(&self, queue_timeout: Duration, now: Instant) -> Duration {
        let until_token = self.time_until_token();
        let until_expiry = self
            .queue
            .front()
            .map(|w| (w.enqueued_at + queue_timeout).saturating_duration_since(now))
            .unwrap_or(until_token);
        until_token.min(until_expiry).max(MIN_WAKE)
    }
}

/// Snapshot of one provider's bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStatus {
    pub provider: String,
    pub tokens_available: f64,
    pub burst_limit: u32,
    pub requests_per_minute: u32,
    pub queue_depth: usize,
    /// Tokens granted.
    pub hits: u64,
    /// Calls that had to queue.
    pub limited: u64,
}

#[derive(Debug, Default)]
struct State {
    buckets: HashMap<String, Bucket>,
    configs: HashMap<String, ProviderRateLimit>,
}

impl State {
    fn bucket(&mut self, provider: &str) -> &mut Bucket {
        let configs = &self.configs;
        self.buckets.entry(provider.to_string()).or_insert_with(|| {
            let config = configs.get(provider).cloned().unwrap_or_default();
            tracing::debug!(provider, rpm = config.requests_per_minute, burst = config.burst(), "creating rate limit bucket");
            Bucket::new(config)
        })
    }
}

/// Token bucket rate limiter keyed by provider.
///
/// Buckets are created on first use from the provider's configured limits,
/// or [`ProviderRateLimit::default`] if none were configured.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<State>,
    settings: RateLimiterConfig,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}

impl RateLimiter {
    pub fn new(settings: RateLimiterConfig) -> Self {
        Self { state: Mutex::new(State::default()), settings }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Set the limits for a provider.
    ///
    /// An existing bucket keeps its queue; its tokens are capped to the new
    /// burst and queued waiters are re-checked against the new limits.
    pub fn configure(&self, provider: &str, config: ProviderRateLimit) {
        let mut state = self.lock();
        if let Some(bucket) = state.buckets.get_mut(provider) {
            let now = Instant::now();
            bucket.refill(now);
            bucket.config = config.clone();
            bucket.tokens = bucket.tokens.min(bucket.capacity());
            bucket.drain(provider, self.settings.queue_timeout(), now);
        }
        state.configs.insert(provider.to_string(), config);
    }

    /// Wait for a token for `provider`.
    ///
    /// Returns immediately when a token is free and nobody is queued ahead.
    ///
    /// # Errors
    ///
    /// - `ApiError::RateLimit` if the queue overflowed while this caller was
    ///   the oldest waiter, the provider was [`reset`](Self::reset), or its
    ///   limits can never yield another token
    /// - `ApiError::Timeout` if the caller waited longer than the queue timeout
    pub async fn acquire(&self, provider: &str, endpoint: &str) -> Result<(), ApiError> {
        let rx = {
            let mut state = self.lock();
            let now = Instant::now();
            let bucket = state.bucket(provider);
            bucket.drain(provider, self.settings.queue_timeout(), now);

            if bucket.queue.is_empty() && bucket.tokens >= 1.0 {
                bucket.take();
                return Ok(());
            }

            bucket.limited += 1;
            if bucket.exhausted() {
                tracing::warn!(provider, endpoint, rpm = bucket.config.requests_per_minute, "rate limit allows no further requests");
                return Err(ApiError::rate_limit(provider, endpoint, "rate limit allows no further requests", None));
            }

            let (tx, rx) = oneshot::channel();
            bucket.queue.push_back(Waiter { endpoint: endpoint.to_string(), enqueued_at: now, tx });
            tracing::debug!(provider, endpoint, depth = bucket.queue.len(), "rate limited, queueing");

            if bucket.queue.len() > self.settings.max_queue_size {
                let retry_after = bucket.time_until_token();
                if let Some(oldest) = bucket.queue.pop_front() {
                    tracing::warn!(provider, endpoint = %oldest.endpoint, "rate limit queue full, rejecting oldest waiter");
                    let err = ApiError::rate_limit(provider, &oldest.endpoint, "rate limit queue is full", Some(retry_after));
                    let _ = oldest.tx.send(Err(err));
                }
            }
            rx
        };

        self.wait(provider, endpoint, rx).await
    }

    async fn wait(&self, provider: &str, endpoint: &str, mut rx: oneshot::Receiver<Grant>) -> Result<(), ApiError> {
        loop {
            let pause = self.next_wake(provider);
            tokio::select! {
                outcome = &mut rx => {
                    return outcome.unwrap_or_else(|_| {
                        Err(ApiError::rate_limit(provider, endpoint, "rate limiter was reset", None))
                    });
                }
                _ = tokio::time::sleep(pause) => {
                    let mut state = self.lock();
                    if let Some(bucket) = state.buckets.get_mut(provider) {
                        bucket.drain(provider, self.settings.queue_timeout(), Instant::now());
                    }
                }
            }
        }
    }

    fn next_wake(&self, provider: &str) -> Duration {
        let mut state = self.lock();
        let now = Instant::now();
        match state.buckets.get_mut(provider) {
            Some(bucket) => {
                bucket.drain(provider, self.settings.queue_timeout(), now);
                bucket.next_wake(self.settings.queue_timeout(), now)
            }
            None => MIN_WAKE,
        }
    }

    /// Whether an `acquire` right now would have to wait. Consumes nothing.
    pub fn would_limit(&self, provider: &str) -> bool {
        let mut state = self.lock();
        let bucket = state.bucket(provider);
        bucket.drain(provider, self.settings.queue_timeout(), Instant::now());
        !bucket.queue.is_empty() || bucket.tokens < 1.0
    }

    /// Status of one provider, or `None` if it has not been used yet.
    pub fn status(&self, provider: &str) -> Option<RateLimitStatus> {
        let mut state = self.lock();
        let bucket = state.buckets.get_mut(provider)?;
        bucket.refill(Instant::now());
        Some(snapshot(provider, bucket))
    }

    /// Status of every provider with a bucket, sorted by provider.
    pub fn all_status(&self) -> Vec<RateLimitStatus> {
        let mut state = self.lock();
        let now = Instant::now();
        let mut all: Vec<RateLimitStatus> = state
            .buckets
            .iter_mut()
            .map(|(provider, bucket)| {
                bucket.refill(now);
                snapshot(provider, bucket)
            })
            .collect();
        all.sort_by(|a, b| a.provider.cmp(&b.provider));
        all
    }

    /// Drop a provider's bucket, rejecting everyone queued on it.
    pub fn reset(&self, provider: &str) {
        let removed = self.lock().buckets.remove(provider);
        if let Some(bucket) = removed {
            tracing::info!(provider, rejected = bucket.queue.len(), "rate limiter reset");
            for waiter in bucket.queue {
                let err = ApiError::rate_limit(provider, &waiter.endpoint, "rate limiter was reset", None);
                let _ = waiter.tx.send(Err(err));
            }
        }
    }
}

fn snapshot(provider: &str, bucket: &Bucket) -> RateLimitStatus {
    RateLimitStatus {
        provider: provider.to_string(),
        tokens_available: bucket.tokens,
        burst_limit: bucket.config.burst(),
        requests_per_minute: bucket.config.requests_per_minute,
        queue_depth: bucket.queue.len(),
        hits: bucket.hits,
        limited: bucket.limited,
    }
}
