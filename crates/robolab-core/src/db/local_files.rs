//! Local offline working copy of workspace files
//!
//! Files are split across a metadata table and a contents table joined by
//! path. Every committed write publishes a batch of [`ChangeRecord`]s on a
//! broadcast channel; the sync engine consumes that stream to push local
//! edits to the shared store.

use std::path::Path;
use std::sync::Arc;

use libsql::Connection;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use super::connection::{Database, Schema};
use super::remote_files::{decode_view_state, encode_view_state};
use crate::error::{Error, Result};
use crate::models::{
    content_digest, ChangeKind, ChangeOrigin, ChangeRecord, ChangeTable, FileContents,
    FileMetadata, MergeOutcome, RemoteFile,
};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Thread-safe handle to the local file store.
#[derive(Clone)]
pub struct LocalFileStore {
    db: Arc<Mutex<Database>>,
    changes: broadcast::Sender<Vec<ChangeRecord>>,
}

impl LocalFileStore {
    /// Open (or create) the local store at the given filesystem path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_database(Database::open(path, Schema::Local).await?)
    }

    /// Open an in-memory local store (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        Self::from_database(Database::open_in_memory(Schema::Local).await?)
    }

    pub fn from_database(db: Database) -> Result<Self> {
        if db.schema() != Schema::Local {
            return Err(Error::InvalidInput(
                "local file store requires the local schema".into(),
            ));
        }
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            changes,
        })
    }

    /// Subscribe to committed changes.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<ChangeRecord>> {
        self.changes.subscribe()
    }

    pub async fn get_metadata(&self, path: &str) -> Result<Option<FileMetadata>> {
        let db = self.db.lock().await;
        read_metadata(db.connection(), path).await
    }

    pub async fn get_contents(&self, path: &str) -> Result<Option<FileContents>> {
        let db = self.db.lock().await;
        read_contents(db.connection(), path).await
    }

    /// Metadata and contents of one file, read under the same lock.
    pub async fn get_file(&self, path: &str) -> Result<Option<(FileMetadata, FileContents)>> {
        let db = self.db.lock().await;
        let Some(metadata) = read_metadata(db.connection(), path).await? else {
            return Ok(None);
        };
        let Some(contents) = read_contents(db.connection(), path).await? else {
            return Ok(None);
        };
        Ok(Some((metadata, contents)))
    }

    /// List file metadata ordered by path.
    pub async fn list(&self) -> Result<Vec<FileMetadata>> {
        let db = self.db.lock().await;
        let mut rows = db
            .connection()
            .query(
                "SELECT path, digest, view_state FROM file_metadata ORDER BY path ASC",
                (),
            )
            .await?;

        let mut files = Vec::new();
        while let Some(row) = rows.next().await? {
            files.push(FileMetadata {
                path: row.get(0)?,
                digest: row.get(1)?,
                view_state: decode_view_state(row.get_value(2)?)?,
            });
        }
        Ok(files)
    }

    /// Write a file edited in this process.
    pub async fn save_file(
        &self,
        path: &str,
        contents: &str,
        view_state: Option<Value>,
    ) -> Result<FileMetadata> {
        let path = normalize_path(path)?;
        let metadata = FileMetadata {
            path: path.to_string(),
            digest: content_digest(contents),
            view_state,
        };
        let contents = FileContents {
            path: path.to_string(),
            contents: contents.to_string(),
        };

        let batch = {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let batch = write_file(&tx, &metadata, &contents, ChangeOrigin::Local).await?;
            tx.commit().await?;
            batch
        };

        tracing::debug!("Saved local file {} ({})", metadata.path, metadata.digest);
        self.publish(batch);
        Ok(metadata)
    }

    /// Delete a file from the working copy, returning whether it existed.
    pub async fn delete_file(&self, path: &str) -> Result<bool> {
        let path = normalize_path(path)?;

        let batch = {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;
            let old_metadata = read_metadata(&tx, path).await?;
            let old_contents = read_contents(&tx, path).await?;
            tx.execute("DELETE FROM file_metadata WHERE path = ?1", [path])
                .await?;
            tx.execute("DELETE FROM file_contents WHERE path = ?1", [path])
                .await?;
            tx.commit().await?;

            let mut batch = Vec::new();
            if let Some(old) = old_metadata {
                batch.push(change(
                    ChangeTable::FileMetadata,
                    path,
                    Some(serde_json::to_value(old)?),
                    None,
                    ChangeOrigin::Local,
                ));
            }
            if let Some(old) = old_contents {
                batch.push(change(
                    ChangeTable::FileContents,
                    path,
                    Some(serde_json::to_value(old)?),
                    None,
                    ChangeOrigin::Local,
                ));
            }
            batch
        };

        let existed = !batch.is_empty();
        self.publish(batch);
        Ok(existed)
    }

    /// Merge one row pulled from the shared file table.
    ///
    /// Digest equality is the only conflict check: a missing local file is
    /// created, a differing digest is overwritten by the remote copy, and a
    /// matching digest is left alone. Timestamps are never compared.
    pub async fn merge_remote(&self, remote: &RemoteFile) -> Result<MergeOutcome> {
        let (outcome, batch) = {
            let db = self.db.lock().await;
            let tx = db.connection().transaction().await?;

            let outcome = match read_metadata(&tx, &remote.path).await? {
                None => MergeOutcome::Created,
                Some(local) if local.digest != remote.digest => MergeOutcome::Overwritten,
                Some(_) => return Ok(MergeOutcome::Unchanged),
            };

            let contents = FileContents {
                path: remote.path.clone(),
                contents: remote.contents.clone(),
            };
            let batch =
                write_file(&tx, &remote.to_metadata(), &contents, ChangeOrigin::Remote).await?;
            tx.commit().await?;
            (outcome, batch)
        };

        self.publish(batch);
        Ok(outcome)
    }

    fn publish(&self, batch: Vec<ChangeRecord>) {
        if batch.is_empty() {
            return;
        }
        // No subscribers is fine; the store is usable without a sync engine.
        self.changes.send(batch).ok();
    }
}

fn normalize_path(path: &str) -> Result<&str> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("file path cannot be empty".into()));
    }
    Ok(trimmed)
}

async fn read_metadata(conn: &Connection, path: &str) -> Result<Option<FileMetadata>> {
    let mut rows = conn
        .query(
            "SELECT path, digest, view_state FROM file_metadata WHERE path = ?1",
            [path],
        )
        .await?;

    let Some(row) = rows.next().await? else {
        return Ok(None);
    };
    Ok(Some(FileMetadata {
        path: row.get(0)?,
        digest: row.get(1)?,
        view_state: decode_view_state(row.get_value(2)?)?,
    }))
}

async fn read_contents(conn: &Connection, path: &str) -> Result<Option<FileContents>> {
    let mut rows = conn
        .query(
            "SELECT path, contents FROM file_contents WHERE path = ?1",
            [path],
        )
        .await?;

    let Some(row) = rows.next().await? else {
        return Ok(None);
    };
    Ok(Some(FileContents {
        path: row.get(0)?,
        contents: row.get(1)?,
    }))
}

/// Upsert both records of a file and describe the change.
async fn write_file(
    conn: &Connection,
    metadata: &FileMetadata,
    contents: &FileContents,
    origin: ChangeOrigin,
) -> Result<Vec<ChangeRecord>> {
    let old_metadata = read_metadata(conn, &metadata.path).await?;
    let old_contents = read_contents(conn, &contents.path).await?;

    conn.execute(
        "INSERT OR REPLACE INTO file_metadata (path, digest, view_state) VALUES (?1, ?2, ?3)",
        libsql::params![
            metadata.path.as_str(),
            metadata.digest.as_str(),
            encode_view_state(metadata.view_state.as_ref())?
        ],
    )
    .await?;
    conn.execute(
        "INSERT OR REPLACE INTO file_contents (path, contents) VALUES (?1, ?2)",
        [contents.path.as_str(), contents.contents.as_str()],
    )
    .await?;

    Ok(vec![
        change(
            ChangeTable::FileMetadata,
            &metadata.path,
            old_metadata.map(serde_json::to_value).transpose()?,
            Some(serde_json::to_value(metadata)?),
            origin,
        ),
        change(
            ChangeTable::FileContents,
            &contents.path,
            old_contents.map(serde_json::to_value).transpose()?,
            Some(serde_json::to_value(contents)?),
            origin,
        ),
    ])
}

fn change(
    table: ChangeTable,
    key: &str,
    old: Option<Value>,
    new: Option<Value>,
    origin: ChangeOrigin,
) -> ChangeRecord {
    let kind = match (&old, &new) {
        (None, Some(_)) => ChangeKind::Create,
        (Some(_), Some(_)) => ChangeKind::Update,
        (_, None) => ChangeKind::Delete,
    };
    ChangeRecord {
        table,
        kind,
        key: key.to_string(),
        old,
        new,
        origin,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast::error::TryRecvError;

    fn remote(path: &str, contents: &str, updated_at: i64) -> RemoteFile {
        RemoteFile {
            path: path.to_string(),
            contents: contents.to_string(),
            digest: content_digest(contents),
            view_state: None,
            updated_at,
            created_at: updated_at,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_and_read_back() {
        let store = LocalFileStore::open_in_memory().await.unwrap();

        let saved = store
            .save_file("robot/main.py", "forward(10)", Some(serde_json::json!({ "line": 1 })))
            .await
            .unwrap();
        assert_eq!(saved.digest, content_digest("forward(10)"));

        let metadata = store.get_metadata("robot/main.py").await.unwrap().unwrap();
        assert_eq!(metadata, saved);
        let contents = store.get_contents("robot/main.py").await.unwrap().unwrap();
        assert_eq!(contents.contents, "forward(10)");
        assert_eq!(store.list().await.unwrap(), vec![saved]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn save_publishes_create_then_update() {
        let store = LocalFileStore::open_in_memory().await.unwrap();
        let mut changes = store.subscribe();

        store.save_file("x.py", "a", None).await.unwrap();
        let batch = changes.recv().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].table, ChangeTable::FileMetadata);
        assert_eq!(batch[0].kind, ChangeKind::Create);
        assert_eq!(batch[0].origin, ChangeOrigin::Local);
        assert_eq!(batch[1].table, ChangeTable::FileContents);

        store.save_file("x.py", "b", None).await.unwrap();
        let batch = changes.recv().await.unwrap();
        assert_eq!(batch[0].kind, ChangeKind::Update);
        assert!(batch[0].old.is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_publishes_delete_records() {
        let store = LocalFileStore::open_in_memory().await.unwrap();
        store.save_file("x.py", "a", None).await.unwrap();
        let mut changes = store.subscribe();

        assert!(store.delete_file("x.py").await.unwrap());
        let batch = changes.recv().await.unwrap();
        assert!(batch.iter().all(|record| record.kind == ChangeKind::Delete));
        assert_eq!(store.get_metadata("x.py").await.unwrap(), None);

        assert!(!store.delete_file("x.py").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejects_empty_path() {
        let store = LocalFileStore::open_in_memory().await.unwrap();
        assert!(store.save_file("  ", "a", None).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn merge_creates_missing_file() {
        let store = LocalFileStore::open_in_memory().await.unwrap();

        let outcome = store.merge_remote(&remote("x.py", "hello", 10)).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Created);

        let metadata = store.get_metadata("x.py").await.unwrap().unwrap();
        assert_eq!(metadata.digest, content_digest("hello"));
        let contents = store.get_contents("x.py").await.unwrap().unwrap();
        assert_eq!(contents.contents, "hello");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn merge_is_idempotent() {
        let store = LocalFileStore::open_in_memory().await.unwrap();
        let row = remote("x.py", "hello", 10);
        store.merge_remote(&row).await.unwrap();
        let mut changes = store.subscribe();

        assert_eq!(
            store.merge_remote(&row).await.unwrap(),
            MergeOutcome::Unchanged
        );
        assert!(matches!(changes.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn merge_overwrites_on_digest_mismatch_even_when_remote_is_older() {
        let store = LocalFileStore::open_in_memory().await.unwrap();
        store.save_file("x.py", "local edit", None).await.unwrap();

        // updated_at far in the past: timestamps play no part in the decision
        let outcome = store.merge_remote(&remote("x.py", "remote", 1)).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Overwritten);
        let contents = store.get_contents("x.py").await.unwrap().unwrap();
        assert_eq!(contents.contents, "remote");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn merge_writes_are_tagged_remote() {
        let store = LocalFileStore::open_in_memory().await.unwrap();
        let mut changes = store.subscribe();

        store.merge_remote(&remote("x.py", "hello", 10)).await.unwrap();
        let batch = changes.recv().await.unwrap();
        assert!(batch
            .iter()
            .all(|record| record.origin == ChangeOrigin::Remote));
    }
}
