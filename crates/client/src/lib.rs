//! Multi-source search aggregation for scout.
//!
//! This crate provides:
//! - The [`SourceAdapter`] trait and a [`SourceRegistry`] of upstream providers
//! - Per-provider token-bucket [`RateLimiter`] with a FIFO wait queue
//! - Per-provider [`CircuitBreaker`]
//! - Retry with exponential backoff and jitter ([`with_retry`])
//! - The [`Aggregator`], which fans out to every enabled source and returns
//!   one merged, deduplicated, paginated and cached [`SearchResponse`]

pub mod aggregate;
pub mod circuit_breaker;
pub mod item;
pub mod rate_limit;
pub mod request;
pub mod retry;
pub mod source;

pub use aggregate::{Aggregator, SearchResponse, SourceStatus};
pub use circuit_breaker::{CircuitBreaker, CircuitMetrics, CircuitState};
pub use item::{ItemKind, NormalizedItem};
pub use rate_limit::{RateLimitStatus, RateLimiter};
pub use request::SearchRequest;
pub use retry::{RetryPolicy, with_retry, with_retry_notify};
pub use source::{SourceAdapter, SourceRegistry};
