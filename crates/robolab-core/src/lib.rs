//! robolab-core - Core library for Robolab
//!
//! Lease-based file locking, editing sessions, and file sync between a
//! local offline working copy and a shared libSQL store. The CLI and any
//! other host drive it through the lifecycle hooks on [`Workbench`].

mod background;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod models;
pub mod session;
pub mod sync;
mod util;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AcquireFailurePolicy, RemoteConfig, WatermarkStrategy, WorkbenchConfig};
pub use error::{Error, Result};
pub use lifecycle::{LibSqlWorkbench, Workbench};
pub use lock::{HeartbeatReport, LockCoordinator};
pub use session::{EditCheck, EditingSession, EditingSessions, SessionGrant, ValidationReport};
pub use sync::{PullReport, PushReport, SyncEngine};
