//! Database migrations

use crate::error::Result;
use libsql::Connection;

use super::connection::Schema;

/// Run all pending migrations for the given schema
pub async fn run(conn: &Connection, schema: Schema) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        match schema {
            Schema::Local => migrate_local_v1(conn).await?,
            Schema::Remote => migrate_remote_v1(conn).await?,
        }
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    // Check if schema_version table exists
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Migration to version 1 of the local working copy
async fn migrate_local_v1(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        "CREATE TABLE IF NOT EXISTS file_metadata (
            path TEXT PRIMARY KEY,
            digest TEXT NOT NULL,
            view_state TEXT
        )",
        "CREATE TABLE IF NOT EXISTS file_contents (
            path TEXT PRIMARY KEY,
            contents TEXT NOT NULL
        )",
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    apply(conn, &statements).await?;
    tracing::info!("Migrated local store to version 1");
    Ok(())
}

/// Migration to version 1 of the shared store
async fn migrate_remote_v1(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // One row per locked resource; the primary key is the mutual exclusion.
        "CREATE TABLE IF NOT EXISTS locks (
            path TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_locks_expires ON locks(expires_at)",
        "CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            contents TEXT NOT NULL,
            sha256 TEXT NOT NULL,
            view_state TEXT,
            updated_at INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_files_updated ON files(updated_at)",
        "INSERT OR IGNORE INTO schema_version (version) VALUES (1)",
    ];

    apply(conn, &statements).await?;
    tracing::info!("Migrated shared store to version 1");
    Ok(())
}

async fn apply(conn: &Connection, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(())
}
