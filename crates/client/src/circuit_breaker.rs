//! Per-provider circuit breaker.
//!
//! The circuit has three states:
//!
//! - **Closed**: calls pass through; consecutive failures are counted.
//! - **Open**: calls fail with `CircuitOpen` without reaching the provider.
//! - **HalfOpen**: the reset timeout has passed since the last failure and
//!   the next call goes through as a probe. Other calls are refused while
//!   the probe is in flight. Success closes the circuit, failure opens it
//!   again.
//!
//! State is in-memory and owned by the breaker instance.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use scout_core::ApiError;
use scout_core::config::CircuitBreakerConfig;
use serde::Serialize;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    probing: bool,
    total_successes: u64,
    total_failures: u64,
    rejected: u64,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            probing: false,
            total_successes: 0,
            total_failures: 0,
            rejected: 0,
        }
    }
}

/// Counters for one provider's circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitMetrics {
    pub provider: String,
    pub state: CircuitState,
    /// Consecutive failures since the last success.
    pub failure_count: u32,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Calls refused while open, or while a half-open probe was in flight.
    pub rejected: u64,
}

/// Clears a half-open probe slot if the probe is dropped before it records
/// an outcome.
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    provider: &'a str,
    armed: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed
            && let Some(circuit) = self.breaker.lock_circuits().get_mut(self.provider)
        {
            tracing::debug!(provider = self.provider, "half-open probe abandoned");
            circuit.probing = false;
        }
    }
}

/// Circuit breaker keyed by provider.
#[derive(Debug)]
pub struct CircuitBreaker {
    circuits: Mutex<HashMap<String, Circuit>>,
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { circuits: Mutex::new(HashMap::new()), config }
    }

    fn lock_circuits(&self) -> MutexGuard<'_, HashMap<String, Circuit>> {
        self.circuits.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("circuit breaker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` unless the provider's circuit is open.
    ///
    /// The open to half-open transition happens here, before `f` is
    /// considered. The outcome of `f` is recorded and returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::CircuitOpen` without calling `f` while the circuit
    /// is open or another call is probing it, otherwise whatever `f` returns.
    pub async fn execute<T, F, Fut>(&self, provider: &str, endpoint: &str, f: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let Some(probe) = self.allow(provider) else {
            tracing::debug!(provider, endpoint, "circuit open, refusing call");
            return Err(ApiError::circuit_open(provider, endpoint));
        };
        let mut guard = ProbeGuard { breaker: self, provider, armed: probe };

        let result = f().await;
        match &result {
            Ok(_) => self.record_success(provider),
            Err(err) => self.record_failure(provider, err),
        }
        guard.armed = false;
        result
    }

    /// `None` refuses the call; `Some(true)` admits it as the half-open probe.
    fn allow(&self, provider: &str) -> Option<bool> {
        let mut circuits = self.lock_circuits();
        let circuit = circuits.entry(provider.to_string()).or_insert_with(Circuit::new);

        match circuit.state {
            CircuitState::Closed => Some(false),
            CircuitState::HalfOpen if !circuit.probing => {
                circuit.probing = true;
                Some(true)
            }
            CircuitState::HalfOpen => {
                circuit.rejected += 1;
                None
            }
            CircuitState::Open => {
                let cooled_down =
                    circuit.last_failure.is_none_or(|at| at.elapsed() >= self.config.reset_timeout());
                if cooled_down {
                    tracing::info!(provider, "circuit breaker: open -> half-open");
                    circuit.state = CircuitState::HalfOpen;
                    circuit.probing = true;
                    Some(true)
                } else {
                    circuit.rejected += 1;
                    None
                }
            }
        }
    }

    fn record_success(&self, provider: &str) {
        let mut circuits = self.lock_circuits();
        let circuit = circuits.entry(provider.to_string()).or_insert_with(Circuit::new);
        circuit.total_successes += 1;

        if circuit.state != CircuitState::Closed {
            tracing::info!(provider, from = %circuit.state, "circuit breaker: closing after successful probe");
        }
        circuit.state = CircuitState::Closed;
        circuit.failure_count = 0;
        circuit.last_failure = None;
        circuit.probing = false;
    }

    fn record_failure(&self, provider: &str, err: &ApiError) {
        let mut circuits = self.lock_circuits();
        let circuit = circuits.entry(provider.to_string()).or_insert_with(Circuit::new);
        circuit.total_failures += 1;
        circuit.failure_count = circuit.failure_count.saturating_add(1);
        circuit.last_failure = Some(Instant::now());
        circuit.probing = false;

        tracing::debug!(
            provider,
            failures = circuit.failure_count,
            threshold = self.config.threshold,
            kind = err.kind(),
            "circuit breaker: failure recorded"
        );

        if circuit.failure_count >= self.config.threshold {
            if circuit.state != CircuitState::Open {
                tracing::warn!(
                    provider,
                    from = %circuit.state,
                    failures = circuit.failure_count,
                    "circuit breaker: opening circuit"
                );
            }
            circuit.state = CircuitState::Open;
        }
    }

    /// Current state. Unknown providers are closed.
    ///
    /// Does not perform the open to half-open transition.
    pub fn state(&self, provider: &str) -> CircuitState {
        self.lock_circuits().get(provider).map(|c| c.state).unwrap_or(CircuitState::Closed)
    }

    pub fn failure_count(&self, provider: &str) -> u32 {
        self.lock_circuits().get(provider).map(|c| c.failure_count).unwrap_or(0)
    }

    pub fn metrics(&self, provider: &str) -> Option<CircuitMetrics> {
        self.lock_circuits().get(provider).map(|c| snapshot(provider, c))
    }

    /// Metrics for every provider seen so far, sorted by provider.
    pub fn all_metrics(&self) -> Vec<CircuitMetrics> {
        let circuits = self.lock_circuits();
        let mut all: Vec<CircuitMetrics> = circuits.iter().map(|(p, c)| snapshot(p, c)).collect();
        all.sort_by(|a, b| a.provider.cmp(&b.provider));
        all
    }

    pub fn reset(&self, provider: &str) {
        if self.lock_circuits().remove(provider).is_some() {
            tracing::info!(provider, "circuit breaker reset");
        }
    }

    pub fn reset_all(&self) {
        self.lock_circuits().clear();
        tracing::info!("all circuit breakers reset");
    }
}

fn snapshot(provider: &str, circuit: &Circuit) -> CircuitMetrics {
    CircuitMetrics {
        provider: provider.to_string(),
        state: circuit.state,
        failure_count: circuit.failure_count,
        total_successes: circuit.total_successes,
        total_failures: circuit.total_failures,
        rejected: circuit.rejected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn breaker(threshold: u32, reset_timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig { threshold, reset_timeout_ms })
    }

    fn boom() -> ApiError {
        ApiError::network("adzuna", "search", "connection reset", Some("ECONNRESET".into()))
    }

    async fn fail(breaker: &CircuitBreaker, calls: &AtomicUsize) -> Result<(), ApiError> {
        breaker
            .execute("adzuna", "search", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(boom())
            })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker, calls: &AtomicUsize) -> Result<u32, ApiError> {
        breaker
            .execute("adzuna", "search", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            })
            .await
    }

    #[tokio::test]
    async fn test_closed_passes_through() {
        let breaker = breaker(3, 1000);
        let calls = AtomicUsize::new(0);

        assert_eq!(succeed(&breaker, &calls).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state("adzuna"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_and_fails_fast() {
        let breaker = breaker(3, 60_000);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            assert!(matches!(fail(&breaker, &calls).await, Err(ApiError::Network { .. })));
        }
        assert_eq!(breaker.state("adzuna"), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let err = succeed(&breaker, &calls).await.unwrap_err();
        assert!(matches!(err, ApiError::CircuitOpen { .. }));
        assert!(!err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.metrics("adzuna").unwrap().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_runs_once_and_closes() {
        let breaker = breaker(2, 1000);
        let calls = AtomicUsize::new(0);
        fail(&breaker, &calls).await.unwrap_err();
        fail(&breaker, &calls).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        tokio::time::advance(Duration::from_millis(1000)).await;

        assert_eq!(succeed(&breaker, &calls).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.state("adzuna"), CircuitState::Closed);
        assert_eq!(breaker.failure_count("adzuna"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_one_probe_at_a_time() {
        let breaker = breaker(1, 1000);
        let calls = AtomicUsize::new(0);
        fail(&breaker, &calls).await.unwrap_err();

        tokio::time::advance(Duration::from_millis(1000)).await;

        let slow_probe = breaker.execute("adzuna", "search", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, ApiError>(1)
        });
        let (probe, second, third) =
            tokio::join!(slow_probe, succeed(&breaker, &calls), succeed(&breaker, &calls));

        assert_eq!(probe.unwrap(), 1);
        assert!(matches!(second, Err(ApiError::CircuitOpen { .. })));
        assert!(matches!(third, Err(ApiError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.state("adzuna"), CircuitState::Closed);
        assert_eq!(breaker.metrics("adzuna").unwrap().rejected, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_frees_the_slot() {
        let breaker = breaker(1, 1000);
        let calls = AtomicUsize::new(0);
        fail(&breaker, &calls).await.unwrap_err();

        tokio::time::advance(Duration::from_millis(1000)).await;

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            breaker.execute("adzuna", "search", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, ApiError>(1)
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(breaker.state("adzuna"), CircuitState::HalfOpen);

        assert_eq!(succeed(&breaker, &calls).await.unwrap(), 7);
        assert_eq!(breaker.state("adzuna"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = breaker(2, 1000);
        let calls = AtomicUsize::new(0);
        fail(&breaker, &calls).await.unwrap_err();
        fail(&breaker, &calls).await.unwrap_err();

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert!(matches!(fail(&breaker, &calls).await, Err(ApiError::Network { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(breaker.state("adzuna"), CircuitState::Open);

        // last failure was refreshed, so the cooldown starts over
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(matches!(succeed(&breaker, &calls).await, Err(ApiError::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let breaker = breaker(3, 1000);
        let calls = AtomicUsize::new(0);
        fail(&breaker, &calls).await.unwrap_err();
        fail(&breaker, &calls).await.unwrap_err();
        succeed(&breaker, &calls).await.unwrap();
        fail(&breaker, &calls).await.unwrap_err();

        assert_eq!(breaker.state("adzuna"), CircuitState::Closed);
        assert_eq!(breaker.failure_count("adzuna"), 1);

        let metrics = breaker.metrics("adzuna").unwrap();
        assert_eq!(metrics.total_failures, 3);
        assert_eq!(metrics.total_successes, 1);
    }

    #[tokio::test]
    async fn test_providers_are_isolated() {
        let breaker = breaker(1, 60_000);
        let calls = AtomicUsize::new(0);
        fail(&breaker, &calls).await.unwrap_err();

        let other = breaker.execute("rapidapi", "search", || async { Ok::<_, ApiError>(1) }).await;
        assert_eq!(other.unwrap(), 1);
        assert_eq!(breaker.state("adzuna"), CircuitState::Open);
        assert_eq!(breaker.state("rapidapi"), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset() {
        let breaker = breaker(1, 60_000);
        let calls = AtomicUsize::new(0);
        fail(&breaker, &calls).await.unwrap_err();
        assert_eq!(breaker.state("adzuna"), CircuitState::Open);

        breaker.reset("adzuna");
        assert_eq!(breaker.state("adzuna"), CircuitState::Closed);
        assert!(breaker.metrics("adzuna").is_none());

        fail(&breaker, &calls).await.unwrap_err();
        breaker.reset_all();
        assert!(breaker.all_metrics().is_empty());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
        assert_eq!(serde_json::to_string(&CircuitState::HalfOpen).unwrap(), "\"half-open\"");
    }
}
