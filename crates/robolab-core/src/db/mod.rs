//! Database layer for Robolab
//!
//! The local working copy and the shared store are both libSQL databases
//! with different schemas.

mod connection;
mod local_files;
mod lock_store;
mod migrations;
mod remote_files;

pub use connection::{Database, Schema};
pub use local_files::LocalFileStore;
pub use lock_store::{LibSqlLockStore, LockStore};
pub use remote_files::{LibSqlRemoteFileTable, RemoteFileTable};
