//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (SCOUT_*, nested with `__`)
//! 2. TOML config file (if SCOUT_CONFIG_FILE set)
//! 3. Built-in defaults

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::{ConfigError, MAX_TTL_SECONDS};

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (SCOUT_*)
/// 2. TOML config file (if SCOUT_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Response cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Per-provider token bucket settings, keyed by provider id.
    ///
    /// Every provider enabled in the source registry must have an entry.
    /// Set via e.g. SCOUT_RATE_LIMITS__ADZUNA__REQUESTS_PER_MINUTE.
    #[serde(default)]
    pub rate_limits: BTreeMap<String, ProviderRateLimit>,

    /// Queue behaviour shared by every provider's bucket.
    #[serde(default)]
    pub rate_limiter: RateLimiterConfig,

    /// Global retry policy for upstream calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Circuit breaker thresholds, applied per provider.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

/// Which store backs the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// Process-local map.
    Memory,
    /// SQLite file, shared by every process that opens the same path.
    Sqlite,
}

/// Cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Set via SCOUT_CACHE__BACKEND (memory|sqlite).
    #[serde(default = "default_backend")]
    pub backend: CacheBackendKind,

    /// Path to the SQLite cache database, used when `backend = "sqlite"`.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Interval between background sweeps of expired entries.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    #[serde(default = "ResourceCacheConfig::jobs")]
    pub jobs: ResourceCacheConfig,

    #[serde(default = "ResourceCacheConfig::offers")]
    pub offers: ResourceCacheConfig,
}

/// Cache policy for one resource type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceCacheConfig {
    pub ttl_seconds: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ResourceCacheConfig {
    fn jobs() -> Self {
        Self { ttl_seconds: 1800, enabled: true }
    }

    fn offers() -> Self {
        Self { ttl_seconds: 3600, enabled: true }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Token bucket settings for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRateLimit {
    pub requests_per_minute: u32,

    /// Bucket capacity. Defaults to `requests_per_minute`.
    #[serde(default)]
    pub burst_limit: Option<u32>,
}

impl ProviderRateLimit {
    pub fn new(requests_per_minute: u32) -> Self {
        Self { requests_per_minute, burst_limit: None }
    }

    pub fn with_burst(mut self, burst_limit: u32) -> Self {
        self.burst_limit = Some(burst_limit);
        self
    }

    /// Effective bucket capacity.
    pub fn burst(&self) -> u32 {
        self.burst_limit.unwrap_or(self.requests_per_minute)
    }
}

impl Default for ProviderRateLimit {
    fn default() -> Self {
        Self::new(60)
    }
}

/// Wait queue settings for the rate limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Waiters beyond this depth push the oldest one out with a rate-limit error.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Waiters older than this are rejected with a timeout instead of served.
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
}

impl RateLimiterConfig {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }
}

/// Exponential backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    #[serde(default = "default_threshold")]
    pub threshold: u32,

    /// Time since the last failure before a half-open probe is allowed.
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

fn default_backend() -> CacheBackendKind {
    CacheBackendKind::Memory
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./scout-cache.sqlite")
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_max_queue_size() -> usize {
    100
}

fn default_queue_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    60_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_path: default_db_path(),
            sweep_interval_secs: default_sweep_interval_secs(),
            jobs: ResourceCacheConfig::jobs(),
            offers: ResourceCacheConfig::offers(),
        }
    }
}

impl CacheConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self { max_queue_size: default_max_queue_size(), queue_timeout_ms: default_queue_timeout_ms() }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { threshold: default_threshold(), reset_timeout_ms: default_reset_timeout_ms() }
    }
}

impl AppConfig {
    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `SCOUT_`
    /// 2. TOML file from `SCOUT_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("SCOUT_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("SCOUT_")
                .ignore(&["config_file"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        Self::extract(figment)
    }

    /// Load configuration from a TOML string layered over the defaults.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::extract(Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }

    /// Rate limit settings for a provider.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the provider has no entry in `rate_limits`.
    pub fn require_rate_limit(&self, provider: &str) -> Result<&ProviderRateLimit, ConfigError> {
        self.rate_limits.get(provider).ok_or_else(|| ConfigError::Missing {
            field: format!("rate_limits.{provider}"),
            hint: format!("Set SCOUT_RATE_LIMITS__{}__REQUESTS_PER_MINUTE", provider.to_uppercase()),
        })
    }
}
