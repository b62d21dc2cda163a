//! Remote lock table: the source of truth for lock ownership

use std::future::Future;

use libsql::{params, Connection};

use crate::error::Result;
use crate::models::LockRecord;

/// Row-level operations the lock coordinator needs from the shared store.
///
/// Every conditional operation is a single statement, so the store itself
/// serializes competing holders.
pub trait LockStore: Send + Sync + 'static {
    /// Insert `record` unless a row for its name already exists.
    ///
    /// Returns `false` when the insert was rejected by the uniqueness constraint.
    fn insert_if_absent(&self, record: &LockRecord) -> impl Future<Output = Result<bool>> + Send;

    /// Point read by resource name
    fn get(&self, name: &str) -> impl Future<Output = Result<Option<LockRecord>>> + Send;

    /// Move the expiry of `name` if and only if `holder_id` still owns it.
    fn update_expiry(
        &self,
        name: &str,
        holder_id: &str,
        expires_at: i64,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Delete `name` if and only if `holder_id` owns it.
    fn delete(&self, name: &str, holder_id: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Delete every record that is no longer live (`expires_at <= now_ms`),
    /// returning the count.
    fn delete_expired(&self, now_ms: i64) -> impl Future<Output = Result<u64>> + Send;
}

/// libSQL implementation of `LockStore`
#[derive(Clone)]
pub struct LibSqlLockStore {
    conn: Connection,
}

impl LibSqlLockStore {
    /// Create a new store over a connection to a database with the remote schema
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }
}

impl LockStore for LibSqlLockStore {
    async fn insert_if_absent(&self, record: &LockRecord) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO locks (path, session_id, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(path) DO NOTHING",
                params![
                    record.name.as_str(),
                    record.holder_id.as_str(),
                    record.expires_at
                ],
            )
            .await?;
        Ok(inserted == 1)
    }

    async fn get(&self, name: &str) -> Result<Option<LockRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT path, session_id, expires_at FROM locks WHERE path = ?1",
                [name],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(LockRecord {
            name: row.get(0)?,
            holder_id: row.get(1)?,
            expires_at: row.get(2)?,
        }))
    }

    async fn update_expiry(&self, name: &str, holder_id: &str, expires_at: i64) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE locks SET expires_at = ?3 WHERE path = ?1 AND session_id = ?2",
                params![name, holder_id, expires_at],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn delete(&self, name: &str, holder_id: &str) -> Result<bool> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM locks WHERE path = ?1 AND session_id = ?2",
                [name, holder_id],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn delete_expired(&self, now_ms: i64) -> Result<u64> {
        let deleted = self
            .conn
            .execute("DELETE FROM locks WHERE expires_at <= ?1", [now_ms])
            .await?;
        Ok(deleted)
    }
}
