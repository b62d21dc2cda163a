//! Host lifecycle hooks.
//!
//! A [`Workbench`] owns one lock coordinator, one session manager, the local
//! store, and (when a shared store is configured) one sync engine. The host
//! calls [`Workbench::on_ready`] once it can serve edits,
//! [`Workbench::on_visibility_change`] when it is foregrounded or
//! backgrounded, and [`Workbench::on_unload`] before exiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::{RemoteConfig, WorkbenchConfig};
use crate::db::{
    Database, LibSqlLockStore, LibSqlRemoteFileTable, LocalFileStore, LockStore, RemoteFileTable,
};
use crate::error::Result;
use crate::lock::LockCoordinator;
use crate::session::EditingSessions;
use crate::sync::SyncEngine;

/// Locking, editing sessions, and sync for one process.
pub struct Workbench<S, R> {
    config: WorkbenchConfig,
    local: LocalFileStore,
    coordinator: Arc<LockCoordinator<S>>,
    sessions: Arc<EditingSessions<S>>,
    sync: Option<Arc<SyncEngine<R>>>,
    running: AtomicBool,
    // Keeps the shared database handle alive for the stores' connections.
    _shared: Option<Database>,
}

/// Workbench backed by a libSQL shared store
pub type LibSqlWorkbench = Workbench<LibSqlLockStore, LibSqlRemoteFileTable>;

impl<S: LockStore, R: RemoteFileTable> Workbench<S, R> {
    /// Assemble a workbench. Without a lock store, locking grants
    /// everything; without a remote file table, sync is off.
    pub fn new(
        config: WorkbenchConfig,
        clock: Arc<dyn Clock>,
        local: LocalFileStore,
        lock_store: Option<S>,
        remote_files: Option<R>,
    ) -> Result<Self> {
        config.validate()?;

        let coordinator = Arc::new(match lock_store {
            Some(store) => LockCoordinator::new(store, &config, clock.clone()),
            None => LockCoordinator::disabled(&config, clock.clone()),
        });
        let sessions = Arc::new(EditingSessions::new(
            coordinator.clone(),
            clock.clone(),
            config.validation_interval(),
        ));
        let sync = remote_files
            .map(|remote| Arc::new(SyncEngine::new(remote, local.clone(), &config, clock)));

        Ok(Self {
            config,
            local,
            coordinator,
            sessions,
            sync,
            running: AtomicBool::new(false),
            _shared: None,
        })
    }

    pub const fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    pub const fn local(&self) -> &LocalFileStore {
        &self.local
    }

    pub const fn coordinator(&self) -> &Arc<LockCoordinator<S>> {
        &self.coordinator
    }

    pub const fn sessions(&self) -> &Arc<EditingSessions<S>> {
        &self.sessions
    }

    pub fn sync(&self) -> Option<&Arc<SyncEngine<R>>> {
        self.sync.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the heartbeat, session validation, and sync.
    pub async fn on_ready(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        self.coordinator.start_heartbeat();
        self.sessions.start_validation();
        match &self.sync {
            Some(sync) => sync.start().await,
            None => tracing::info!("Sync disabled: no shared store configured"),
        }
        tracing::info!("Workbench ready (holder {})", self.coordinator.holder_id());
    }

    /// Catch up after the host was backgrounded. Hiding is a no-op.
    pub async fn on_visibility_change(&self, visible: bool) {
        if !visible {
            return;
        }

        let report = self.sessions.validate_all().await;
        if !report.invalid.is_empty() {
            tracing::info!(
                "{} files lost their editing lock while hidden",
                report.invalid.len()
            );
        }
        if let Some(sync) = &self.sync {
            sync.pull().await;
        }
    }

    /// End every session and stop all background work. Safe to call twice.
    pub async fn on_unload(&self) {
        self.sessions.stop_validation();
        self.sessions.end_all().await;
        self.coordinator.stop_heartbeat();
        self.coordinator.release_all().await;
        if let Some(sync) = &self.sync {
            sync.stop();
        }

        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Workbench unloaded");
        }
    }
}

impl LibSqlWorkbench {
    /// Connect to the shared store described by `remote`.
    ///
    /// With no remote configured, or when the shared store cannot be opened,
    /// the workbench runs with locking and sync disabled.
    pub async fn connect(
        config: WorkbenchConfig,
        clock: Arc<dyn Clock>,
        local: LocalFileStore,
        remote: Option<&RemoteConfig>,
    ) -> Result<Self> {
        let shared = match remote {
            None => {
                tracing::info!("No shared store configured; locking and sync disabled");
                None
            }
            Some(remote) => match Database::open_remote(remote).await {
                Ok(db) => Some(db),
                Err(error) => {
                    tracing::warn!(
                        "Shared store at {} unavailable ({}); locking and sync disabled",
                        remote.url,
                        error
                    );
                    None
                }
            },
        };

        let lock_store = shared
            .as_ref()
            .map(|db| LibSqlLockStore::new(db.connection().clone()));
        let remote_files = shared
            .as_ref()
            .map(|db| LibSqlRemoteFileTable::new(db.connection().clone()));

        let mut workbench = Self::new(config, clock, local, lock_store, remote_files)?;
        workbench._shared = shared;
        Ok(workbench)
    }
}
