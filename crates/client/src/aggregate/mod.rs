//! Parallel fan-out across sources with merge, dedup, pagination and caching.
//!
//! Each source call runs through its own pipeline:
//!
//! ```text
//! rate limiter acquire -> circuit breaker execute -> with_retry -> adapter search -> normalize
//! ```
//!
//! A failure anywhere in a source's pipeline is logged and counted as zero
//! items for that source. Searches never fail; the worst case is an empty
//! response with every source at 0.

pub mod dedup;
pub mod response;

#[cfg(test)]
mod testing;

pub use response::{SearchResponse, SourceStatus};

use std::collections::BTreeMap;
use std::sync::Arc;

use futures_util::future::join_all;
use scout_core::cache::{Cache, CacheOptions};
use scout_core::config::{AppConfig, CacheConfig, ResourceCacheConfig};
use scout_core::{ApiError, ConfigError};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::circuit_breaker::CircuitBreaker;
use crate::item::{ItemKind, NormalizedItem};
use crate::rate_limit::RateLimiter;
use crate::request::SearchRequest;
use crate::retry::{RetryPolicy, with_retry_notify};
use crate::source::{SourceAdapter, SourceRegistry};

/// Entry point for job and offer searches.
pub struct Aggregator {
    registry: SourceRegistry,
    cache: Cache,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    cache_config: CacheConfig,
    sweeper: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl Aggregator {
    /// Build an aggregator over `registry` using `cache`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `config` fails
    /// [`AppConfig::validate`], or `ConfigError::Missing` if an enabled
    /// source has no entry in `config.rate_limits`.
    pub fn new(registry: SourceRegistry, cache: Cache, config: &AppConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let limiter = RateLimiter::new(config.rate_limiter.clone());
        for provider in registry.enabled_ids() {
            let limits = config.require_rate_limit(provider)?;
            limiter.configure(provider, limits.clone());
        }

        Ok(Self::with_components(
            registry,
            cache,
            Arc::new(limiter),
            Arc::new(CircuitBreaker::new(config.circuit_breaker.clone())),
            RetryPolicy::from(&config.retry),
            config.cache.clone(),
        ))
    }

    /// Build an aggregator with the cache described by `config.cache`, and
    /// start its expiry sweeper. The sweeper stops when the aggregator is dropped.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Same as [`Aggregator::new`]. An unavailable SQLite cache is not an
    /// error; the in-memory backend is used instead.
    pub async fn connect(registry: SourceRegistry, config: &AppConfig) -> Result<Self, ConfigError> {
        let cache = Cache::connect(&config.cache).await;
        let mut aggregator = Self::new(registry, cache, config)?;
        aggregator.sweeper = Some(aggregator.cache.spawn_sweeper(config.cache.sweep_interval()));
        Ok(aggregator)
    }

    /// Build from pre-constructed parts, e.g. to share a limiter or breaker
    /// between aggregators. No configuration checks are performed.
    pub fn with_components(
        registry: SourceRegistry, cache: Cache, limiter: Arc<RateLimiter>, breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy, cache_config: CacheConfig,
    ) -> Self {
        Self { registry, cache, limiter, breaker, retry, cache_config, sweeper: None }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Search every enabled job source. Never fails; failed sources count 0.
    ///
    /// The response is cached unless the jobs cache is disabled or every
    /// source failed, in which case the next identical request asks the
    /// sources again.
    pub async fn search_jobs(&self, request: &SearchRequest) -> SearchResponse {
        self.search(ItemKind::Jobs, request).await
    }

    /// Offer counterpart of [`search_jobs`](Self::search_jobs), cached under
    /// the offers settings.
    pub async fn search_offers(&self, request: &SearchRequest) -> SearchResponse {
        self.search(ItemKind::Offers, request).await
    }

    fn resource(&self, kind: ItemKind) -> &ResourceCacheConfig {
        match kind {
            ItemKind::Jobs => &self.cache_config.jobs,
            ItemKind::Offers => &self.cache_config.offers,
        }
    }

    /// A response where no source succeeded is returned but not cached.
    async fn search(&self, kind: ItemKind, request: &SearchRequest) -> SearchResponse {
        let request = request.normalized();
        let key = request.cache_key(kind);
        let resource = self.resource(kind);

        if request.use_cache
            && resource.enabled
            && let Some(mut hit) = self.cache.get::<SearchResponse>(&key).await
        {
            tracing::debug!(%kind, query = %request.query, "serving search from cache");
            hit.cached = true;
            return hit;
        }

        let sources: Vec<Arc<dyn SourceAdapter>> =
            self.registry.enabled(kind).into_iter().filter(|s| request.wants_source(s.id())).collect();

        if sources.is_empty() {
            tracing::warn!(%kind, requested = ?request.sources, "no enabled sources match the request");
            return SearchResponse::empty(&request);
        }

        let started = Instant::now();
        let outcomes = join_all(sources.iter().map(|source| self.fetch_source(source.as_ref(), &request))).await;

        let mut counts = BTreeMap::new();
        let mut merged: Vec<NormalizedItem> = Vec::new();
        let mut succeeded = 0usize;
        for (source, outcome) in sources.iter().zip(outcomes) {
            let items = match outcome {
                Some(items) => {
                    succeeded += 1;
                    items
                }
                None => Vec::new(),
            };
            counts.insert(source.id().to_string(), items.len());
            merged.extend(items);
        }

        let deduped = dedup::deduplicate(merged);
        let total = deduped.len();
        let items: Vec<NormalizedItem> =
            deduped.into_iter().skip(request.offset()).take(request.limit as usize).collect();

        let response =
            SearchResponse { items, sources: counts, total, page: request.page, limit: request.limit, cached: false };

        tracing::info!(
            %kind,
            query = %request.query,
            total,
            sources = sources.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "aggregated search"
        );

        if resource.enabled && succeeded > 0 {
            let options = CacheOptions::new(resource.ttl()).with_tag(kind.tag());
            self.cache.set(&key, &response, &options).await;
        } else if succeeded == 0 {
            tracing::warn!(%kind, query = %request.query, "every source failed, response not cached");
        }

        response
    }

    /// Run one source's pipeline. `None` means the source failed.
    async fn fetch_source(&self, source: &dyn SourceAdapter, request: &SearchRequest) -> Option<Vec<NormalizedItem>> {
        let provider = source.id();
        let endpoint = source.endpoint();
        let started = Instant::now();

        match self.call_source(source, request).await {
            Ok(raw) => {
                let items: Vec<NormalizedItem> = raw.iter().filter_map(|r| source.normalize(r)).collect();
                if items.len() < raw.len() {
                    tracing::debug!(provider, skipped = raw.len() - items.len(), "records could not be normalized");
                }
                tracing::debug!(
                    provider,
                    count = items.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "source returned"
                );
                Some(items)
            }
            Err(err) => {
                tracing::warn!(
                    provider,
                    endpoint,
                    kind = err.kind(),
                    status = ?err.status_code(),
                    "source failed, continuing without it: {err}"
                );
                None
            }
        }
    }

    async fn call_source(&self, source: &dyn SourceAdapter, request: &SearchRequest) -> Result<Vec<Value>, ApiError> {
        let provider = source.id();
        let endpoint = source.endpoint();

        self.limiter.acquire(provider, endpoint).await?;
        self.breaker
            .execute(provider, endpoint, || {
                with_retry_notify(|| source.search(request), &self.retry, provider, endpoint, |attempt, err| {
                    tracing::info!(provider, endpoint, attempt, kind = err.kind(), "retrying source call");
                })
            })
            .await
    }

    /// Drop cached responses for one kind, or everything when `kind` is `None`.
    pub async fn invalidate_cache(&self, kind: Option<ItemKind>) {
        match kind {
            Some(kind) => {
                let removed = self.cache.delete_by_tag(kind.tag()).await;
                tracing::info!(%kind, removed, "invalidated cached responses");
            }
            None => {
                self.cache.clear().await;
                tracing::info!("cleared response cache");
            }
        }
    }

    /// Rate-limit and circuit state for every registered source.
    pub fn source_status(&self) -> Vec<SourceStatus> {
        self.registry
            .iter()
            .map(|(source, enabled)| {
                let provider = source.id();
                SourceStatus {
                    provider: provider.to_string(),
                    kind: source.kind(),
                    enabled,
                    circuit: self.breaker.state(provider),
                    consecutive_failures: self.breaker.failure_count(provider),
                    rate_limit: self.limiter.status(provider),
                }
            })
            .collect()
    }
}
