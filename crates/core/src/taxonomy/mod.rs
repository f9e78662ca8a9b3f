//! Typed failures for calls into upstream providers.
//!
//! Every failure that crosses an adapter boundary is turned into exactly one
//! [`ApiError`] variant by [`normalize_error`]. Downstream code (retry, circuit
//! breaker, aggregation) only ever matches on this closed set.
//!
//! | Variant | Status | Retryable |
//! |---------|--------|-----------|
//! | `RateLimit` | 429 | yes |
//! | `Authentication` | 401 / 403 | no |
//! | `Validation` | 400 | no |
//! | `Timeout` | 408 | yes |
//! | `Network` | - | yes |
//! | `Api` | any | by status |
//! | `CircuitOpen` | - | no |

mod classify;

pub use classify::{RETRYABLE_STATUS_CODES, RawError, is_retryable_error, normalize_error};

use std::fmt;
use std::time::Duration;

/// Where a failure happened and what the provider said about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub provider: String,
    pub endpoint: String,
    pub message: String,
}

impl ErrorContext {
    pub fn new(provider: impl Into<String>, endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self { provider: provider.into(), endpoint: endpoint.into(), message: message.into() }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.provider, self.endpoint, self.message)
    }
}

/// A single field-level validation message from a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }
}

/// Closed set of upstream failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// Provider (or our own limiter) refused the call for exceeding its rate.
    #[error("RATE_LIMITED: {context}")]
    RateLimit { context: ErrorContext, retry_after: Option<Duration> },

    /// Credentials were rejected (401) or lack permission (403).
    #[error("AUTHENTICATION_FAILED ({status}): {context}")]
    Authentication { context: ErrorContext, status: u16 },

    /// The provider rejected the request parameters.
    #[error("VALIDATION_FAILED: {context}")]
    Validation { context: ErrorContext, fields: Vec<FieldError> },

    /// The call did not complete in time.
    #[error("TIMEOUT: {context}")]
    Timeout { context: ErrorContext },

    /// Connection-level failure; no HTTP response was received.
    #[error("NETWORK_ERROR: {context}")]
    Network { context: ErrorContext, code: Option<String> },

    /// Anything else. Retryability was decided at classification time.
    #[error("API_ERROR: {context}")]
    Api { context: ErrorContext, status: Option<u16>, retryable: bool },

    /// The circuit breaker refused the call without invoking the provider.
    #[error("CIRCUIT_OPEN: {context}")]
    CircuitOpen { context: ErrorContext },
}

impl ApiError {
    pub fn rate_limit(
        provider: &str, endpoint: &str, message: impl Into<String>, retry_after: Option<Duration>,
    ) -> Self {
        ApiError::RateLimit { context: ErrorContext::new(provider, endpoint, message), retry_after }
    }

    pub fn timeout(provider: &str, endpoint: &str, message: impl Into<String>) -> Self {
        ApiError::Timeout { context: ErrorContext::new(provider, endpoint, message) }
    }

    pub fn network(provider: &str, endpoint: &str, message: impl Into<String>, code: Option<String>) -> Self {
        ApiError::Network { context: ErrorContext::new(provider, endpoint, message), code }
    }

    pub fn circuit_open(provider: &str, endpoint: &str) -> Self {
        ApiError::CircuitOpen { context: ErrorContext::new(provider, endpoint, "circuit breaker is open") }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            ApiError::RateLimit { context, .. }
            | ApiError::Authentication { context, .. }
            | ApiError::Validation { context, .. }
            | ApiError::Timeout { context }
            | ApiError::Network { context, .. }
            | ApiError::Api { context, .. }
            | ApiError::CircuitOpen { context } => context,
        }
    }

    pub fn provider(&self) -> &str {
        &self.context().provider
    }

    pub fn endpoint(&self) -> &str {
        &self.context().endpoint
    }

    /// HTTP status associated with the failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::RateLimit { .. } => Some(429),
            ApiError::Authentication { status, .. } => Some(*status),
            ApiError::Validation { .. } => Some(400),
            ApiError::Timeout { .. } => Some(408),
            ApiError::Api { status, .. } => *status,
            ApiError::Network { .. } | ApiError::CircuitOpen { .. } => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::RateLimit { .. } | ApiError::Timeout { .. } | ApiError::Network { .. } => true,
            ApiError::Authentication { .. } | ApiError::Validation { .. } | ApiError::CircuitOpen { .. } => false,
            ApiError::Api { retryable, .. } => *retryable,
        }
    }

    /// Short stable name, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::RateLimit { .. } => "rate_limit",
            ApiError::Authentication { .. } => "authentication",
            ApiError::Validation { .. } => "validation",
            ApiError::Timeout { .. } => "timeout",
            ApiError::Network { .. } => "network",
            ApiError::Api { .. } => "api",
            ApiError::CircuitOpen { .. } => "circuit_open",
        }
    }

    /// Server-suggested wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
