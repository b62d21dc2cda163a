//! Database connection management

use crate::config::RemoteConfig;
use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;

/// Which set of tables a database carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// Offline working copy: `file_metadata` and `file_contents`
    Local,
    /// Shared store: `locks` and `files`
    Remote,
}

/// Database wrapper for libSQL connections
pub struct Database {
    // Keeps the database handle alive for the shared connection.
    _db: LibSqlDatabase,
    conn: Connection,
    schema: Schema,
    is_network: bool,
}

impl Database {
    /// Open a database file at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically.
    pub async fn open(path: impl AsRef<Path>, schema: Schema) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let db = Builder::new_local(&path_str).build().await?;
        Self::init(db, schema, false).await
    }

    /// Open an in-memory database (useful for testing)
    ///
    /// Every clone of [`Database::connection`] shares the same in-memory data.
    pub async fn open_in_memory(schema: Schema) -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::init(db, schema, false).await
    }

    /// Open the shared remote store described by `config`
    ///
    /// Network URLs (`libsql://`, `https://`, ...) connect to a remote libSQL
    /// server. Anything else is treated as a local file shared by every
    /// process on the machine, which is how single-classroom setups run
    /// without a server.
    pub async fn open_remote(config: &RemoteConfig) -> Result<Self> {
        if !config.is_network() {
            let path = config.url.strip_prefix("file:").unwrap_or(&config.url);
            return Self::open(path, Schema::Remote).await;
        }

        let token = config.auth_token.clone().ok_or_else(|| {
            crate::error::Error::Config("Auth token is required for a remote URL".into())
        })?;
        let db = Builder::new_remote(config.url.clone(), token)
            .build()
            .await?;
        tracing::debug!("Connected to remote store at {}", config.url);
        Self::init(db, Schema::Remote, true).await
    }

    async fn init(db: LibSqlDatabase, schema: Schema, is_network: bool) -> Result<Self> {
        let conn = db.connect()?;
        let database = Self {
            _db: db,
            conn,
            schema,
            is_network,
        };
        database.configure().await?;
        database.migrate().await?;
        Ok(database)
    }

    /// Configure `SQLite` for local files
    async fn configure(&self) -> Result<()> {
        if self.is_network {
            return Ok(());
        }
        // Several processes share one file in local-remote mode; WAL keeps readers
        // from blocking the writer.
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok(); // In-memory databases refuse WAL
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA busy_timeout = 5000;", ())
            .await
            .ok();
        Ok(())
    }

    /// Run database migrations
    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.conn, self.schema).await
    }

    pub const fn schema(&self) -> Schema {
        self.schema
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn table_exists(db: &Database, name: &str) -> bool {
        let mut rows = db
            .connection()
            .query(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        row.get::<i64>(0).unwrap() == 1
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn local_schema_has_file_tables() {
        let db = Database::open_in_memory(Schema::Local).await.unwrap();
        assert_eq!(db.schema(), Schema::Local);
        assert!(table_exists(&db, "file_metadata").await);
        assert!(table_exists(&db, "file_contents").await);
        assert!(!table_exists(&db, "locks").await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_schema_has_lock_and_file_tables() {
        let db = Database::open_in_memory(Schema::Remote).await.unwrap();
        assert!(table_exists(&db, "locks").await);
        assert!(table_exists(&db, "files").await);
        assert!(!table_exists(&db, "file_metadata").await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_backed_remote_config_opens_local_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("shared.db");
        let config = RemoteConfig {
            url: format!("file:{}", path.display()),
            auth_token: None,
        };

        let db = Database::open_remote(&config).await.unwrap();
        assert!(table_exists(&db, "locks").await);
        assert!(path.exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reopening_does_not_rerun_migrations() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("local.db");

        drop(Database::open(&path, Schema::Local).await.unwrap());
        let db = Database::open(&path, Schema::Local).await.unwrap();

        let mut rows = db
            .connection()
            .query("SELECT COUNT(*) FROM schema_version", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 1);
    }
}
