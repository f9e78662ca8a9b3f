//! Core types and shared functionality for scout.
//!
//! This crate provides:
//! - Response cache with in-memory and SQLite backends
//! - The upstream error taxonomy and its classification function
//! - Unified infrastructure error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod taxonomy;

pub use cache::{Cache, CacheBackend, CacheOptions, MemoryBackend, SqliteBackend};
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use taxonomy::{ApiError, ErrorContext, FieldError, RawError, is_retryable_error, normalize_error};
