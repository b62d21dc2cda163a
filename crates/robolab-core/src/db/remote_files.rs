//! Shared remote file table

use std::future::Future;

use libsql::{params, Connection, Row, Value};

use crate::error::Result;
use crate::models::RemoteFile;

/// Operations the sync engine needs from the shared file table
pub trait RemoteFileTable: Send + Sync + 'static {
    /// Insert or replace the row for `file.path`. Last writer wins.
    fn upsert(&self, file: &RemoteFile) -> impl Future<Output = Result<()>> + Send;

    /// Delete the row for `path`, returning whether one existed
    fn delete(&self, path: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Rows with `updated_at >= watermark`, oldest first
    fn changed_since(&self, watermark: i64) -> impl Future<Output = Result<Vec<RemoteFile>>> + Send;

    /// Point read by path
    fn get(&self, path: &str) -> impl Future<Output = Result<Option<RemoteFile>>> + Send;
}

/// libSQL implementation of `RemoteFileTable`
#[derive(Clone)]
pub struct LibSqlRemoteFileTable {
    conn: Connection,
}

impl LibSqlRemoteFileTable {
    /// Create a new table handle over a connection with the remote schema
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Parse a remote file from a database row
    fn parse_file(row: &Row) -> Result<RemoteFile> {
        Ok(RemoteFile {
            path: row.get(0)?,
            contents: row.get(1)?,
            digest: row.get(2)?,
            view_state: decode_view_state(row.get_value(3)?)?,
            updated_at: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

impl RemoteFileTable for LibSqlRemoteFileTable {
    async fn upsert(&self, file: &RemoteFile) -> Result<()> {
        // created_at is only written on first insert
        self.conn
            .execute(
                "INSERT INTO files (path, contents, sha256, view_state, updated_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(path) DO UPDATE SET
                    contents = excluded.contents,
                    sha256 = excluded.sha256,
                    view_state = excluded.view_state,
                    updated_at = excluded.updated_at",
                params![
                    file.path.as_str(),
                    file.contents.as_str(),
                    file.digest.as_str(),
                    encode_view_state(file.view_state.as_ref())?,
                    file.updated_at,
                    file.created_at
                ],
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute("DELETE FROM files WHERE path = ?1", [path])
            .await?;
        Ok(deleted > 0)
    }

    async fn changed_since(&self, watermark: i64) -> Result<Vec<RemoteFile>> {
        let mut rows = self
            .conn
            .query(
                "SELECT path, contents, sha256, view_state, updated_at, created_at
                 FROM files
                 WHERE updated_at >= ?1
                 ORDER BY updated_at ASC, id ASC",
                [watermark],
            )
            .await?;

        let mut files = Vec::new();
        while let Some(row) = rows.next().await? {
            match Self::parse_file(&row) {
                Ok(file) => files.push(file),
                // One malformed row must not hide its siblings.
                Err(error) => tracing::warn!("Skipping malformed remote file row: {}", error),
            }
        }
        Ok(files)
    }

    async fn get(&self, path: &str) -> Result<Option<RemoteFile>> {
        let mut rows = self
            .conn
            .query(
                "SELECT path, contents, sha256, view_state, updated_at, created_at
                 FROM files WHERE path = ?1",
                [path],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_file(&row)?)),
            None => Ok(None),
        }
    }
}

/// Serialize an optional view state into a nullable TEXT column value.
pub(crate) fn encode_view_state(view_state: Option<&serde_json::Value>) -> Result<Value> {
    match view_state {
        Some(state) => Ok(Value::Text(serde_json::to_string(state)?)),
        None => Ok(Value::Null),
    }
}

/// Parse a nullable TEXT column back into a view state.
pub(crate) fn decode_view_state(value: Value) -> Result<Option<serde_json::Value>> {
    match value {
        Value::Text(text) => Ok(Some(serde_json::from_str(&text)?)),
        Value::Null => Ok(None),
        other => Err(crate::error::Error::Database(format!(
            "unexpected view_state column value: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Schema};
    use crate::models::content_digest;
    use pretty_assertions::assert_eq;

    async fn setup() -> (Database, LibSqlRemoteFileTable) {
        let db = Database::open_in_memory(Schema::Remote).await.unwrap();
        let table = LibSqlRemoteFileTable::new(db.connection().clone());
        (db, table)
    }

    fn file(path: &str, contents: &str, updated_at: i64) -> RemoteFile {
        RemoteFile {
            path: path.to_string(),
            contents: contents.to_string(),
            digest: content_digest(contents),
            view_state: Some(serde_json::json!({ "scroll": 12 })),
            updated_at,
            created_at: updated_at,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_replaces_but_keeps_created_at() {
        let (_db, table) = setup().await;

        table.upsert(&file("main.py", "v1", 100)).await.unwrap();
        table.upsert(&file("main.py", "v2", 200)).await.unwrap();

        let stored = table.get("main.py").await.unwrap().unwrap();
        assert_eq!(stored.contents, "v2");
        assert_eq!(stored.digest, content_digest("v2"));
        assert_eq!(stored.updated_at, 200);
        assert_eq!(stored.created_at, 100);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn changed_since_is_inclusive_and_ordered() {
        let (_db, table) = setup().await;
        table.upsert(&file("c.py", "c", 300)).await.unwrap();
        table.upsert(&file("a.py", "a", 100)).await.unwrap();
        table.upsert(&file("b.py", "b", 200)).await.unwrap();

        let paths: Vec<String> = table
            .changed_since(200)
            .await
            .unwrap()
            .into_iter()
            .map(|file| file.path)
            .collect();
        assert_eq!(paths, vec!["b.py".to_string(), "c.py".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_view_state_skips_only_that_row() {
        let (db, table) = setup().await;
        table.upsert(&file("good.py", "ok", 100)).await.unwrap();
        db.connection()
            .execute(
                "INSERT INTO files (path, contents, sha256, view_state, updated_at, created_at)
                 VALUES ('bad.py', 'x', 'y', '{not json', 150, 150)",
                (),
            )
            .await
            .unwrap();

        let files = table.changed_since(0).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "good.py");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_removes_row() {
        let (_db, table) = setup().await;
        table.upsert(&file("gone.py", "bye", 100)).await.unwrap();

        assert!(table.delete("gone.py").await.unwrap());
        assert!(!table.delete("gone.py").await.unwrap());
        assert_eq!(table.get("gone.py").await.unwrap(), None);
    }
}
