//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::{AppConfig, CacheBackendKind, ResourceCacheConfig};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

/// Upper bound for a resource TTL (one year).
pub const MAX_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

fn validate_resource(name: &str, resource: &ResourceCacheConfig) -> Result<(), ConfigError> {
    if resource.enabled && resource.ttl_seconds == 0 {
        return Err(invalid(format!("cache.{name}.ttl_seconds"), "must be greater than 0 when enabled"));
    }
    if resource.ttl_seconds > MAX_TTL_SECONDS {
        return Err(invalid(format!("cache.{name}.ttl_seconds"), format!("must not exceed {MAX_TTL_SECONDS}")));
    }
    Ok(())
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - the SQLite backend is selected with an empty `db_path`
    /// - `sweep_interval_secs` is 0
    /// - an enabled resource cache has a zero TTL, or any TTL exceeds [`MAX_TTL_SECONDS`]
    /// - a provider's `requests_per_minute` or `burst_limit` is 0
    /// - `queue_timeout_ms` is 0
    /// - `backoff_multiplier` is below 1.0 or `initial_delay_ms` exceeds `max_delay_ms`
    /// - the circuit breaker `threshold` is 0
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.backend == CacheBackendKind::Sqlite && self.cache.db_path.as_os_str().is_empty() {
            return Err(invalid("cache.db_path", "must not be empty when backend is sqlite"));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(invalid("cache.sweep_interval_secs", "must be greater than 0"));
        }
        validate_resource("jobs", &self.cache.jobs)?;
        validate_resource("offers", &self.cache.offers)?;

        for (provider, limits) in &self.rate_limits {
            if limits.requests_per_minute == 0 {
                return Err(invalid(format!("rate_limits.{provider}.requests_per_minute"), "must be greater than 0"));
            }
            if limits.burst_limit == Some(0) {
                return Err(invalid(format!("rate_limits.{provider}.burst_limit"), "must be greater than 0"));
            }
        }

        if self.rate_limiter.queue_timeout_ms == 0 {
            return Err(invalid("rate_limiter.queue_timeout_ms", "must be greater than 0"));
        }

        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(invalid("retry.backoff_multiplier", "must be at least 1.0"));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(invalid("retry.initial_delay_ms", "must not exceed retry.max_delay_ms"));
        }
        if self.retry.max_retries > 10 {
            tracing::warn!(max_retries = self.retry.max_retries, "retry.max_retries is unusually high");
        }

        if self.circuit_breaker.threshold == 0 {
            return Err(invalid("circuit_breaker.threshold", "must be greater than 0"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderRateLimit;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_db_path_with_sqlite() {
        let mut config = AppConfig::default();
        config.cache.backend = CacheBackendKind::Sqlite;
        config.cache.db_path = Default::default();
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "cache.db_path"));
    }

    #[test]
    fn test_validate_zero_ttl_enabled() {
        let mut config = AppConfig::default();
        config.cache.jobs.ttl_seconds = 0;
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "cache.jobs.ttl_seconds"));
    }

    #[test]
    fn test_validate_zero_ttl_disabled_is_fine() {
        let mut config = AppConfig::default();
        config.cache.offers.ttl_seconds = 0;
        config.cache.offers.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_ttl_upper_bound() {
        let mut config = AppConfig::default();
        config.cache.jobs.ttl_seconds = MAX_TTL_SECONDS;
        assert!(config.validate().is_ok());

        config.cache.jobs.ttl_seconds = u64::MAX / 2;
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "cache.jobs.ttl_seconds"));
    }

    #[test]
    fn test_from_toml_rejects_huge_ttl() {
        let result = AppConfig::from_toml(
            "[cache.jobs]\nttl_seconds = 9223372036854775807\n[rate_limits.adzuna]\nrequests_per_minute = 60\n",
        );
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "cache.jobs.ttl_seconds"));
    }

    #[test]
    fn test_validate_zero_rpm() {
        let mut config = AppConfig::default();
        config.rate_limits.insert("adzuna".into(), ProviderRateLimit::new(0));
        let result = config.validate();
        assert!(
            matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "rate_limits.adzuna.requests_per_minute")
        );
    }

    #[test]
    fn test_validate_zero_burst() {
        let mut config = AppConfig::default();
        config.rate_limits.insert("adzuna".into(), ProviderRateLimit::new(10).with_burst(0));
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "rate_limits.adzuna.burst_limit"));
    }

    #[test]
    fn test_validate_backoff_multiplier() {
        let mut config = AppConfig::default();
        config.retry.backoff_multiplier = 0.5;
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "retry.backoff_multiplier"));
    }

    #[test]
    fn test_validate_initial_exceeds_max_delay() {
        let mut config = AppConfig::default();
        config.retry.initial_delay_ms = 20_000;
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "retry.initial_delay_ms"));
    }

    #[test]
    fn test_validate_zero_threshold() {
        let mut config = AppConfig::default();
        config.circuit_breaker.threshold = 0;
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "circuit_breaker.threshold"));
    }
}
