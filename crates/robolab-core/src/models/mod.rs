//! Data models for Robolab

mod change;
mod file;
mod lock;

pub use change::{ChangeKind, ChangeOrigin, ChangeRecord, ChangeTable};
pub use file::{content_digest, FileContents, FileMetadata, MergeOutcome, RemoteFile};
pub use lock::{HolderId, LockRecord, LockStatus};
