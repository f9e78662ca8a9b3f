//! Storage contract shared by every cache backend.

use std::time::Duration;

use async_trait::async_trait;

use crate::Error;

/// A key/value store with TTL expiry and tag-based bulk invalidation.
///
/// Values are opaque JSON strings; typing happens in [`super::Cache`].
/// Expired entries must read as misses even before they are purged.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short name for logs ("memory", "sqlite").
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Store `value` under `key`, replacing any previous entry and its tags.
    ///
    /// Returns `Error::InvalidInput` for a zero TTL.
    async fn set(&self, key: &str, value: String, ttl: Duration, tags: &[String]) -> Result<(), Error>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, Error>;

    /// Delete every key carrying `tag` along with the tag index.
    ///
    /// Returns the number of removed entries.
    async fn delete_by_tag(&self, tag: &str) -> Result<usize, Error>;

    async fn clear(&self) -> Result<(), Error>;

    /// Remove expired entries. Returns the number removed.
    async fn purge_expired(&self) -> Result<usize, Error>;
}
