//! Opening the SQLite cache store.
//!
//! WAL mode and a busy timeout let several processes read and write the
//! same file concurrently, which is what makes this backend the shared one.

use std::path::Path;

use tokio_rusqlite::Connection;

use super::migrations;
use crate::Error;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA busy_timeout=5000;
     PRAGMA foreign_keys=ON;";

/// Cache backend stored in a SQLite file.
///
/// Queries run on tokio-rusqlite's background thread. Cloning shares the
/// same connection.
#[derive(Clone, Debug)]
pub struct SqliteBackend {
    pub(crate) conn: Connection,
    location: String,
}

impl SqliteBackend {
    /// Open (creating if needed) the store at `path` and migrate it.
    ///
    /// The parent directory must already exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let conn = Connection::open(path).await.map_err(|e| Error::Database(e.into()))?;
        Self::prepare(conn, path.display().to_string()).await
    }

    /// Private in-memory store, mainly for tests.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory().await.map_err(|e| Error::Database(e.into()))?;
        Self::prepare(conn, ":memory:".to_string()).await
    }

    async fn prepare(conn: Connection, location: String) -> Result<Self, Error> {
        conn.call(|conn| -> Result<(), Error> {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(Error::from)?;

        migrations::run(&conn).await?;
        tracing::debug!(location = %location, version = migrations::LATEST_VERSION, "sqlite cache store ready");

        Ok(Self { conn, location })
    }

    /// File path, or `:memory:`.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub async fn schema_version(&self) -> Result<i64, Error> {
        migrations::schema_version(&self.conn).await
    }
}
