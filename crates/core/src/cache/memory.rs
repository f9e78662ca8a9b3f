//! In-process cache backend.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::backend::CacheBackend;
use crate::Error;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
    tags: Vec<String>,
}

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<String, Entry>,
    tags: HashMap<String, HashSet<String>>,
}

impl Store {
    /// Remove a key and unlink it from every tag it belonged to.
    fn remove(&mut self, key: &str) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        for tag in entry.tags {
            if let Some(members) = self.tags.get_mut(&tag) {
                members.remove(key);
                if members.is_empty() {
                    self.tags.remove(&tag);
                }
            }
        }
        true
    }
}

/// Cache backend held entirely in process memory.
///
/// Private to the process; entries vanish on restart.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    store: Mutex<Store>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("memory cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().entries.values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tag indexes currently held.
    pub fn tag_count(&self) -> usize {
        self.lock().tags.len()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut store = self.lock();
        match store.entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.expires_at > Instant::now() => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        store.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration, tags: &[String]) -> Result<(), Error> {
        if ttl.is_zero() {
            return Err(Error::InvalidInput(format!("ttl for '{key}' must be positive")));
        }
        let Some(expires_at) = Instant::now().checked_add(ttl) else {
            return Err(Error::InvalidInput(format!("ttl for '{key}' is out of range")));
        };
        let mut store = self.lock();
        store.remove(key);

        let mut unique_tags: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !unique_tags.contains(tag) {
                unique_tags.push(tag.clone());
            }
        }
        for tag in &unique_tags {
            store.tags.entry(tag.clone()).or_default().insert(key.to_string());
        }
        store
            .entries
            .insert(key.to_string(), Entry { value, expires_at, tags: unique_tags });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        Ok(self.lock().remove(key))
    }

    async fn delete_by_tag(&self, tag: &str) -> Result<usize, Error> {
        let mut store = self.lock();
        let Some(members) = store.tags.remove(tag) else {
            return Ok(0);
        };
        Ok(members.iter().filter(|key| store.remove(key)).count())
    }

    async fn clear(&self) -> Result<(), Error> {
        let mut store = self.lock();
        store.entries.clear();
        store.tags.clear();
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, Error> {
        let mut store = self.lock();
        let now = Instant::now();
        let expired: Vec<String> =
            store.entries.iter().filter(|(_, e)| e.expires_at <= now).map(|(k, _)| k.clone()).collect();
        for key in &expired {
            store.remove(key);
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let backend = MemoryBackend::new();
        backend.set("a", "1".into(), Duration::from_secs(60), &[]).await.unwrap();
        assert_eq!(backend.get("a").await.unwrap().as_deref(), Some("1"));
        assert!(backend.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let backend = MemoryBackend::new();
        let result = backend.set("a", "1".into(), Duration::ZERO, &[]).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_rejected() {
        let backend = MemoryBackend::new();
        backend.set("a", "old".into(), Duration::from_secs(60), &[]).await.unwrap();

        let result = backend.set("a", "new".into(), Duration::MAX, &tags(&["jobs"])).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(backend.get("a").await.unwrap().as_deref(), Some("old"));
        assert_eq!(backend.tag_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_expiry_on_read() {
        let backend = MemoryBackend::new();
        backend.set("a", "1".into(), Duration::from_secs(5), &tags(&["jobs"])).await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(backend.get("a").await.unwrap().is_none());
        assert_eq!(backend.tag_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let backend = MemoryBackend::new();
        backend.set("short", "1".into(), Duration::from_secs(1), &[]).await.unwrap();
        backend.set("long", "2".into(), Duration::from_secs(100), &[]).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(backend.purge_expired().await.unwrap(), 1);
        assert!(backend.get("long").await.unwrap().is_some());
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_tag_leaves_other_keys() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(60);
        backend.set("j1", "1".into(), ttl, &tags(&["jobs"])).await.unwrap();
        backend.set("j2", "2".into(), ttl, &tags(&["jobs"])).await.unwrap();
        backend.set("o1", "3".into(), ttl, &tags(&["offers"])).await.unwrap();
        backend.set("plain", "4".into(), ttl, &[]).await.unwrap();

        assert_eq!(backend.delete_by_tag("jobs").await.unwrap(), 2);
        assert!(backend.get("j1").await.unwrap().is_none());
        assert!(backend.get("j2").await.unwrap().is_none());
        assert!(backend.get("o1").await.unwrap().is_some());
        assert!(backend.get("plain").await.unwrap().is_some());
        assert_eq!(backend.delete_by_tag("jobs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_multi_tag_key_removed_from_every_index() {
        let backend = MemoryBackend::new();
        backend.set("k", "v".into(), Duration::from_secs(60), &tags(&["jobs", "adzuna"])).await.unwrap();
        assert_eq!(backend.tag_count(), 2);

        assert_eq!(backend.delete_by_tag("adzuna").await.unwrap(), 1);
        assert!(backend.get("k").await.unwrap().is_none());
        assert_eq!(backend.tag_count(), 0);
        assert_eq!(backend.delete_by_tag("jobs").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_tags() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(60);
        backend.set("k", "old".into(), ttl, &tags(&["jobs"])).await.unwrap();
        backend.set("k", "new".into(), ttl, &tags(&["offers"])).await.unwrap();

        assert_eq!(backend.delete_by_tag("jobs").await.unwrap(), 0);
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(60);
        backend.set("a", "1".into(), ttl, &tags(&["t"])).await.unwrap();
        backend.set("b", "2".into(), ttl, &[]).await.unwrap();

        assert!(backend.delete("a").await.unwrap());
        assert!(!backend.delete("a").await.unwrap());

        backend.clear().await.unwrap();
        assert!(backend.is_empty());
        assert_eq!(backend.tag_count(), 0);
    }
}
