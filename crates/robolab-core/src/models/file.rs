//! Workspace file models shared by the local store and the remote file table

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the file contents.
///
/// Two copies of a file with the same digest are treated as identical.
///
/// # Examples
///
/// ```
/// use robolab_core::models::content_digest;
///
/// assert_eq!(content_digest("print('hi')"), content_digest("print('hi')"));
/// assert_ne!(content_digest("a"), content_digest("b"));
/// ```
#[must_use]
pub fn content_digest(contents: &str) -> String {
    format!("{:x}", Sha256::digest(contents.as_bytes()))
}

/// Local metadata record for a workspace file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Workspace path, the join key with `FileContents`
    pub path: String,
    /// Digest of the current local contents
    pub digest: String,
    /// Opaque editor view state (cursor, scroll, block layout)
    #[serde(default)]
    pub view_state: Option<Value>,
}

/// Local contents record for a workspace file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileContents {
    pub path: String,
    pub contents: String,
}

/// Row of the shared remote file table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub path: String,
    pub contents: String,
    pub digest: String,
    pub view_state: Option<Value>,
    /// Last write time (Unix ms)
    pub updated_at: i64,
    /// First write time (Unix ms)
    pub created_at: i64,
}

impl RemoteFile {
    /// Build a remote row from local records, stamped with `now_ms`.
    #[must_use]
    pub fn from_local(metadata: &FileMetadata, contents: String, now_ms: i64) -> Self {
        Self {
            path: metadata.path.clone(),
            contents,
            digest: metadata.digest.clone(),
            view_state: metadata.view_state.clone(),
            updated_at: now_ms,
            created_at: now_ms,
        }
    }

    /// Local metadata record matching this row.
    #[must_use]
    pub fn to_metadata(&self) -> FileMetadata {
        FileMetadata {
            path: self.path.clone(),
            digest: self.digest.clone(),
            view_state: self.view_state.clone(),
        }
    }
}

/// What merging one remote row did to the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No local file existed; metadata and contents were created.
    Created,
    /// Local digest differed; both local records were replaced.
    Overwritten,
    /// Digests matched; nothing was written.
    Unchanged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_hex_sha256() {
        assert_eq!(
            content_digest(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn remote_row_carries_local_digest_and_view_state() {
        let metadata = FileMetadata {
            path: "robot/main.py".to_string(),
            digest: content_digest("drive()"),
            view_state: Some(serde_json::json!({ "cursor": 3 })),
        };
        let row = RemoteFile::from_local(&metadata, "drive()".to_string(), 42);
        assert_eq!(row.digest, metadata.digest);
        assert_eq!(row.updated_at, 42);
        assert_eq!(row.to_metadata(), metadata);
    }
}
