use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] robolab_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("File path cannot be empty")]
    EmptyPath,
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Cannot edit {path}: {reason}")]
    Locked { path: String, reason: String },
    #[error("Lost the editing lock on {0}")]
    LockLost(String),
    #[error(
        "Sync is not configured. Set ROBOLAB_REMOTE_URL (and ROBOLAB_REMOTE_TOKEN for a server) to a shared store."
    )]
    SyncNotConfigured,
    #[error("Shared store at {0} is unavailable; see the log for details")]
    SyncUnavailable(String),
}
