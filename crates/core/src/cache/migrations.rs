//! Schema migrations for the SQLite cache store.
//!
//! Applied versions are recorded in `_migrations`. Every pending migration
//! runs in its own transaction together with its bookkeeping row, so a
//! store shared by several processes never sees a half-applied version.

use tokio_rusqlite::{Connection, params, rusqlite};

use super::Error;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration { version: 1, name: "cache_entries", sql: include_str!("../../migrations/001_cache_entries.sql") },
    Migration { version: 2, name: "cache_tags", sql: include_str!("../../migrations/002_cache_tags.sql") },
];

/// Latest schema version this build knows about.
pub const LATEST_VERSION: i64 = 2;

fn applied_version(conn: &rusqlite::Connection) -> Result<i64, Error> {
    let version = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))?;
    Ok(version)
}

/// Bring the schema up to [`LATEST_VERSION`].
///
/// # Errors
///
/// Returns `Error::MigrationFailed` naming the version whose SQL failed, or
/// if the store was written by a newer build.
pub async fn run(conn: &Connection) -> Result<(), Error> {
    conn.call(|conn| -> Result<(), Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            )",
        )?;

        let current = applied_version(conn)?;
        if current > LATEST_VERSION {
            return Err(Error::MigrationFailed(format!(
                "cache schema version {current} is newer than supported version {LATEST_VERSION}"
            )));
        }

        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            let tx = conn.transaction()?;
            tx.execute_batch(migration.sql)
                .map_err(|e| Error::MigrationFailed(format!("{} ({}): {e}", migration.version, migration.name)))?;
            tx.execute(
                "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.version, migration.name, chrono::Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            tracing::debug!(version = migration.version, name = migration.name, "applied cache migration");
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}

/// Highest applied migration version, 0 for an empty store.
pub async fn schema_version(conn: &Connection) -> Result<i64, Error> {
    conn.call(|conn| -> Result<i64, Error> { applied_version(conn) }).await.map_err(Error::from)
}
