//! Response cache with TTL expiry and tag-based invalidation.
//!
//! [`Cache`] is a typed facade over a pluggable [`CacheBackend`]:
//!
//! - [`MemoryBackend`]: process-local map (default)
//! - [`SqliteBackend`]: file-backed store shared by every process using the
//!   same path, with automatic schema migrations and WAL mode
//!
//! Backend failures never reach callers: reads degrade to misses and writes
//! to no-ops, both logged. Expired entries are dropped lazily on read and by
//! the background sweeper started with [`Cache::spawn_sweeper`].

pub mod backend;
pub mod connection;
pub mod entries;
pub mod hash;
pub mod memory;
pub mod migrations;

pub use crate::Error;

pub use backend::CacheBackend;
pub use connection::SqliteBackend;
pub use hash::compute_cache_key;
pub use memory::MemoryBackend;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::{CacheBackendKind, CacheConfig};

/// TTL and tags for a cache write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOptions {
    pub ttl: Duration,
    pub tags: Vec<String>,
}

impl CacheOptions {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, tags: Vec::new() }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Typed, cheaply cloneable handle to a cache backend.
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache").field("backend", &self.backend.name()).finish()
    }
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Build the cache described by `config`.
    ///
    /// If the SQLite store cannot be opened, logs a warning and continues
    /// on the in-memory backend. Never fails.
    pub async fn connect(config: &CacheConfig) -> Self {
        match config.backend {
            CacheBackendKind::Memory => Self::in_memory(),
            CacheBackendKind::Sqlite => match SqliteBackend::open(&config.db_path).await {
                Ok(db) => {
                    tracing::info!(path = %config.db_path.display(), "using sqlite cache backend");
                    Self::new(Arc::new(db))
                }
                Err(e) => {
                    tracing::warn!(
                        path = %config.db_path.display(),
                        error = %e,
                        "sqlite cache unavailable, falling back to in-memory cache"
                    );
                    Self::in_memory()
                }
            },
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Get a cached value. Misses, expired entries, backend errors and
    /// undecodable values all return `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = match self.backend.get(key).await {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, backend = self.backend.name(), error = %e, "cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding undecodable cache entry");
                if let Err(e) = self.backend.delete(key).await {
                    tracing::debug!(key, error = %e, "failed to delete undecodable cache entry");
                }
                None
            }
        }
    }

    /// Store a value. Returns whether the write went through.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: &CacheOptions) -> bool {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to serialize cache value");
                return false;
            }
        };

        match self.backend.set(key, json, options.ttl, &options.tags).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(key, backend = self.backend.name(), error = %e, "cache write failed");
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.backend.delete(key).await.unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "cache delete failed");
            false
        })
    }

    /// Delete every entry tagged with `tag`. Returns the number removed.
    pub async fn delete_by_tag(&self, tag: &str) -> usize {
        self.backend.delete_by_tag(tag).await.unwrap_or_else(|e| {
            tracing::warn!(tag, error = %e, "cache tag invalidation failed");
            0
        })
    }

    pub async fn clear(&self) {
        if let Err(e) = self.backend.clear().await {
            tracing::warn!(error = %e, "cache clear failed");
        }
    }

    pub async fn purge_expired(&self) -> usize {
        self.backend.purge_expired().await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "cache sweep failed");
            0
        })
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// Errors from `compute` propagate and are not cached.
    pub async fn wrap<T, F, Fut, E>(&self, key: &str, options: &CacheOptions, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            return Ok(hit);
        }
        let value = compute().await?;
        self.set(key, &value, options).await;
        Ok(value)
    }

    /// Periodically purge expired entries until the returned handle is aborted.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired().await;
                if purged > 0 {
                    tracing::debug!(purged, backend = cache.backend_name(), "swept expired cache entries");
                }
            }
        })
    }
}
