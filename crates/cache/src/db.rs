//! Opening the catalog.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sqlx::sqlite::{SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::borrow::Cow;
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// One writer (the sync engine's queue consumer) plus a few readers.
const MAX_CONNECTIONS: u32 = 4;
/// Long enough to sit out a book insert (cover blob included) made by
/// another process sharing the file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(3);

/// Connection pool for the catalog database, migrated on open.
///
/// Hand it to [`Repository::from`](crate::Repository) to read and write rows.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the catalog at `path`, creating the file (but not its parent
    /// directory) if needed.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "opening catalog");
        let options = Self::options().filename(path).create_if_missing(true);
        Self::open(options, MAX_CONNECTIONS).await
    }

    /// A fresh, empty catalog that lives as long as the pool does.
    ///
    /// Not test-only, so that dependent crates can use it in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        // Every connection to ":memory:" is its own database, so there can
        // only be one.
        Self::open(Self::options().filename(":memory:"), 1).await
    }

    async fn open(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Settings applied to every pooled connection.
    fn options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .auto_vacuum(SqliteAutoVacuum::None)
            // Covers make for a few large rows; keep more pages around.
            .pragma("cache_size", Cow::Borrowed("-16384"))
            .pragma("temp_store", Cow::Borrowed("MEMORY"))
            .pragma("wal_autocheckpoint", Cow::Borrowed("1000"))
    }

    #[instrument("migrating catalog", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait for connections to be returned, then close them all.
    pub async fn close(&self) {
        // Refresh query planner statistics; failing to is harmless.
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[tokio::test]
    async fn test_schema_is_created() {
        let db = Database::connect_in_memory().await.unwrap();
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(db.pool())
        .await
        .unwrap();
        let tables: Vec<&str> = tables.iter().map(|(name,)| name.as_str()).collect();
        assert_eq!(tables, ["books", "covers", "libraries", "series"]);
        db.close().await;
    }

    #[tokio::test]
    async fn test_reopening_existing_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.sqlite3");
        let db = Database::connect(&path).await.unwrap();
        assert!(path.is_file());
        db.close().await;
        let db = Database::connect(&path).await.unwrap();
        db.migrate().await.unwrap();
        db.close().await;
    }

    #[tokio::test]
    async fn test_missing_parent_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Database::connect(dir.path().join("absent/catalog.sqlite3")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Database));
    }

    #[rstest]
    #[case("foreign_keys", 1)]
    #[case("cache_size", -16384)]
    #[case("wal_autocheckpoint", 1000)]
    #[tokio::test]
    async fn test_pragmas_are_applied(#[case] pragma: &str, #[case] expected: i64) {
        let db = Database::connect_in_memory().await.unwrap();
        let (value,): (i64,) = sqlx::query_as(&format!("PRAGMA {pragma}")).fetch_one(db.pool()).await.unwrap();
        assert_eq!(value, expected);
        db.close().await;
    }
}
