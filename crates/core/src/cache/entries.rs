//! Cache entry operations for the SQLite backend.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use super::backend::CacheBackend;
use super::connection::SqliteBackend;
use crate::Error;

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl SqliteBackend {
    /// Number of rows in the entry table, expired or not.
    pub async fn entry_count(&self) -> Result<usize, Error> {
        self.conn
            .call(|conn| -> Result<usize, Error> {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    /// Expired rows for the key are deleted before the lookup.
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let key = key.to_string();
        let now = now_ms();
        self.conn
            .call(move |conn| -> Result<Option<String>, Error> {
                conn.execute("DELETE FROM cache_entries WHERE key = ?1 AND expires_at_ms <= ?2", params![key, now])?;

                let mut stmt = conn.prepare("SELECT value_json FROM cache_entries WHERE key = ?1")?;
                let result = stmt.query_row(params![key], |row| row.get(0));

                match result {
                    Ok(json) => Ok(Some(json)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Uses UPSERT semantics; the key's tag rows are replaced with `tags`.
    async fn set(&self, key: &str, value: String, ttl: Duration, tags: &[String]) -> Result<(), Error> {
        if ttl.is_zero() {
            return Err(Error::InvalidInput(format!("ttl for '{key}' must be positive")));
        }
        let key = key.to_string();
        let tags = tags.to_vec();
        let created_at = Utc::now().to_rfc3339();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at_ms = now_ms().saturating_add(ttl_ms);

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO cache_entries (key, value_json, created_at, expires_at_ms)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(key) DO UPDATE SET
                        value_json = excluded.value_json,
                        created_at = excluded.created_at,
                        expires_at_ms = excluded.expires_at_ms",
                    params![key, value, created_at, expires_at_ms],
                )?;
                tx.execute("DELETE FROM cache_tags WHERE key = ?1", params![key])?;
                for tag in &tags {
                    tx.execute("INSERT OR IGNORE INTO cache_tags (tag, key) VALUES (?1, ?2)", params![tag, key])?;
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    async fn delete_by_tag(&self, tag: &str) -> Result<usize, Error> {
        let tag = tag.to_string();
        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                let count = tx.execute(
                    "DELETE FROM cache_entries WHERE key IN (SELECT key FROM cache_tags WHERE tag = ?1)",
                    params![tag],
                )?;
                tx.execute("DELETE FROM cache_tags WHERE tag = ?1", params![tag])?;
                tx.commit()?;
                Ok(count)
            })
            .await
            .map_err(Error::from)
    }

    async fn clear(&self) -> Result<(), Error> {
        self.conn
            .call(|conn| -> Result<(), Error> {
                conn.execute_batch("DELETE FROM cache_tags; DELETE FROM cache_entries;")?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn purge_expired(&self) -> Result<usize, Error> {
        let now = now_ms();
        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let count = conn.execute("DELETE FROM cache_entries WHERE expires_at_ms <= ?1", params![now])?;
                Ok(count)
            })
            .await
            .map_err(Error::from)
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
        let db = SqliteBackend::open_in_memory().await.unwrap();
        db.set("key", r#"{"items":[]}"#.into(), Duration::from_secs(60), &[]).await.unwrap();

        let retrieved = db.get("key").await.unwrap().unwrap();
        assert_eq!(retrieved, r#"{"items":[]}"#);
        assert!(db.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert() {
        let db = SqliteBackend::open_in_memory().await.unwrap();
        db.set("key", "old".into(), Duration::from_secs(60), &[]).await.unwrap();
        db.set("key", "new".into(), Duration::from_secs(60), &[]).await.unwrap();

        assert_eq!(db.get("key").await.unwrap().as_deref(), Some("new"));
        assert_eq!(db.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_rejected() {
        let db = SqliteBackend::open_in_memory().await.unwrap();
        let result = db.set("key", "v".into(), Duration::ZERO, &[]).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let db = SqliteBackend::open_in_memory().await.unwrap();
        db.set("expiring", "v".into(), Duration::from_millis(50), &[]).await.unwrap();
        db.set("fresh", "v".into(), Duration::from_secs(3600), &[]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(db.get("expiring").await.unwrap().is_none());
        assert!(db.get("fresh").await.unwrap().is_some());
        assert_eq!(db.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let db = SqliteBackend::open_in_memory().await.unwrap();
        db.set("a", "v".into(), Duration::from_millis(50), &tags(&["jobs"])).await.unwrap();
        db.set("b", "v".into(), Duration::from_millis(50), &[]).await.unwrap();
        db.set("c", "v".into(), Duration::from_secs(3600), &[]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(db.purge_expired().await.unwrap(), 2);
        assert_eq!(db.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_delete_by_tag() {
        let db = SqliteBackend::open_in_memory().await.unwrap();
        let ttl = Duration::from_secs(60);
        db.set("j1", "1".into(), ttl, &tags(&["jobs"])).await.unwrap();
        db.set("j2", "2".into(), ttl, &tags(&["jobs", "adzuna"])).await.unwrap();
        db.set("o1", "3".into(), ttl, &tags(&["offers"])).await.unwrap();
        db.set("plain", "4".into(), ttl, &[]).await.unwrap();

        assert_eq!(db.delete_by_tag("jobs").await.unwrap(), 2);
        assert!(db.get("j1").await.unwrap().is_none());
        assert!(db.get("j2").await.unwrap().is_none());
        assert!(db.get("o1").await.unwrap().is_some());
        assert!(db.get("plain").await.unwrap().is_some());

        // j2's other tag index was cleaned up by the cascade
        assert_eq!(db.delete_by_tag("adzuna").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let db = SqliteBackend::open_in_memory().await.unwrap();
        let ttl = Duration::from_secs(60);
        db.set("a", "1".into(), ttl, &tags(&["t"])).await.unwrap();
        db.set("b", "2".into(), ttl, &[]).await.unwrap();

        assert!(db.delete("a").await.unwrap());
        assert!(!db.delete("a").await.unwrap());

        db.clear().await.unwrap();
        assert_eq!(db.entry_count().await.unwrap(), 0);
        assert_eq!(db.delete_by_tag("t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_store_is_shared_between_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.sqlite");

        let first = SqliteBackend::open(&path).await.unwrap();
        let second = SqliteBackend::open(&path).await.unwrap();

        first.set("shared", "v".into(), Duration::from_secs(60), &tags(&["jobs"])).await.unwrap();
        assert_eq!(second.get("shared").await.unwrap().as_deref(), Some("v"));

        assert_eq!(second.delete_by_tag("jobs").await.unwrap(), 1);
        assert!(first.get("shared").await.unwrap().is_none());
    }
}
