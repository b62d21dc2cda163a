//! Change notifications published by the local file store

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Local table a change applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeTable {
    FileMetadata,
    FileContents,
}

impl ChangeTable {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FileMetadata => "file_metadata",
            Self::FileContents => "file_contents",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// Who caused a local write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    /// An edit made in this process
    Local,
    /// A merge of a row pulled from the remote file table
    Remote,
}

/// One committed change to a local record.
///
/// Payloads are the serialized records before and after the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub table: ChangeTable,
    pub kind: ChangeKind,
    /// Primary key of the changed record (the file path)
    pub key: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
    pub origin: ChangeOrigin,
}
