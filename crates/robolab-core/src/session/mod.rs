//! Editing sessions: one lock-backed session per file path

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::background::BackgroundTask;
use crate::clock::Clock;
use crate::db::LockStore;
use crate::lock::LockCoordinator;
use crate::util::lock_registry;

/// Namespace for editing locks in the shared lock table
pub const EDIT_LOCK_PREFIX: &str = "file-editing:";

/// Shown when another holder owns the editing lock
pub const LOCKED_BY_OTHER_REASON: &str = "File is locked by another user";

/// Lock name guarding edits to `path`.
pub fn edit_lock_name(path: &str) -> String {
    format!("{EDIT_LOCK_PREFIX}{path}")
}

/// A file this process is actively editing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditingSession {
    pub file_path: String,
    pub session_id: String,
    /// Unix ms
    pub created_at: i64,
}

/// Result of [`EditingSessions::start_session`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub granted: bool,
    pub session_id: Option<String>,
    pub reason: Option<String>,
}

impl SessionGrant {
    fn granted(session_id: String) -> Self {
        Self {
            granted: true,
            session_id: Some(session_id),
            reason: None,
        }
    }

    fn denied() -> Self {
        Self {
            granted: false,
            session_id: None,
            reason: Some(LOCKED_BY_OTHER_REASON.to_string()),
        }
    }
}

/// Result of [`EditingSessions::check_can_edit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditCheck {
    pub can_edit: bool,
    pub reason: Option<String>,
}

/// Paths partitioned by whether their session is still lock-backed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: Vec<String>,
    pub invalid: Vec<String>,
}

/// Receives every [`ValidationReport`] produced by `validate_all`.
pub type ValidationObserver = Arc<dyn Fn(&ValidationReport) + Send + Sync>;

/// Registry of editing sessions for this process.
///
/// Every session is backed by a `file-editing:<path>` lock on the
/// coordinator. Validation evicts sessions whose lock was lost; the UI is
/// expected to switch those files to read-only.
///
/// Starting, ending, checking, and validating are serialized so an edit
/// check never tears down a session another caller was just granted.
pub struct EditingSessions<S> {
    coordinator: Arc<LockCoordinator<S>>,
    clock: Arc<dyn Clock>,
    validation_interval: Duration,
    sessions: Mutex<BTreeMap<String, EditingSession>>,
    observers: Mutex<Vec<ValidationObserver>>,
    gate: tokio::sync::Mutex<()>,
    validation_task: Mutex<Option<BackgroundTask>>,
}

impl<S: LockStore> EditingSessions<S> {
    pub fn new(
        coordinator: Arc<LockCoordinator<S>>,
        clock: Arc<dyn Clock>,
        validation_interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            clock,
            validation_interval,
            sessions: Mutex::new(BTreeMap::new()),
            observers: Mutex::new(Vec::new()),
            gate: tokio::sync::Mutex::new(()),
            validation_task: Mutex::new(None),
        }
    }

    pub fn coordinator(&self) -> &Arc<LockCoordinator<S>> {
        &self.coordinator
    }

    /// Register a validation observer. Observers are never replaced.
    pub fn subscribe(&self, observer: ValidationObserver) {
        lock_registry(&self.observers).push(observer);
    }

    pub fn session(&self, path: &str) -> Option<EditingSession> {
        lock_registry(&self.sessions).get(path).cloned()
    }

    /// Snapshot of all sessions, ordered by path.
    pub fn sessions(&self) -> Vec<EditingSession> {
        lock_registry(&self.sessions).values().cloned().collect()
    }

    /// Take the editing lock for `path` and record a session.
    ///
    /// Starting a session that already exists keeps its id and extends the lock.
    pub async fn start_session(&self, path: &str) -> SessionGrant {
        let _gate = self.gate.lock().await;
        self.start_locked(path).await.0
    }

    /// End the session for `path` and release its lock.
    pub async fn end_session(&self, path: &str) {
        let _gate = self.gate.lock().await;
        self.end_locked(path).await;
    }

    /// End every session (teardown).
    pub async fn end_all(&self) {
        let paths: Vec<String> = lock_registry(&self.sessions).keys().cloned().collect();
        for path in paths {
            self.end_session(&path).await;
        }
    }

    /// Whether `path` can be edited right now.
    ///
    /// An existing local session is trusted as-is. Otherwise a session is
    /// started and immediately ended, so a positive answer is advisory only.
    pub async fn check_can_edit(&self, path: &str) -> EditCheck {
        if self.session(path).is_some() {
            return EditCheck {
                can_edit: true,
                reason: None,
            };
        }

        let _gate = self.gate.lock().await;
        let (grant, created) = self.start_locked(path).await;
        if !grant.granted {
            return EditCheck {
                can_edit: false,
                reason: grant.reason,
            };
        }

        // Only undo a session this check created itself.
        if created {
            self.end_locked(path).await;
        }
        EditCheck {
            can_edit: true,
            reason: None,
        }
    }

    /// Whether the session for `path` is still backed by a live lock.
    ///
    /// An invalid session is evicted from the registry.
    pub async fn validate(&self, path: &str) -> bool {
        let _gate = self.gate.lock().await;
        let name = edit_lock_name(path);
        let lost = self.coordinator.take_lost(&name);
        let valid = !lost && !self.coordinator.is_held_by_other(&name).await.locked;

        if !valid {
            lock_registry(&self.sessions).remove(path);
            self.coordinator.forget(&name);
            tracing::warn!("Editing lock for {} was lost; session is now read-only", path);
        }
        valid
    }

    /// Validate every session and notify all observers.
    pub async fn validate_all(&self) -> ValidationReport {
        let paths: Vec<String> = lock_registry(&self.sessions).keys().cloned().collect();

        let mut report = ValidationReport::default();
        for path in paths {
            if self.validate(&path).await {
                report.valid.push(path);
            } else {
                report.invalid.push(path);
            }
        }

        let observers = lock_registry(&self.observers).clone();
        for observer in &observers {
            observer(&report);
        }
        report
    }

    /// Start periodic validation. Calling it again while running is a no-op.
    pub fn start_validation(self: &Arc<Self>) {
        let mut task = lock_registry(&self.validation_task);
        if task.as_ref().is_some_and(|running| !running.is_finished()) {
            return;
        }

        let sessions = Arc::downgrade(self);
        *task = Some(BackgroundTask::periodic(self.validation_interval, move || {
            let sessions = sessions.clone();
            async move {
                let Some(sessions) = sessions.upgrade() else {
                    return false;
                };
                let report = sessions.validate_all().await;
                if !report.invalid.is_empty() {
                    tracing::debug!("{} editing sessions invalidated", report.invalid.len());
                }
                true
            }
        }));
    }

    /// Stop periodic validation. A pass already in flight runs to completion.
    pub fn stop_validation(&self) {
        let task = lock_registry(&self.validation_task).take();
        if let Some(task) = task {
            task.stop();
        }
    }

    pub fn is_validation_running(&self) -> bool {
        lock_registry(&self.validation_task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Returns the grant and whether this call created the registry entry.
    async fn start_locked(&self, path: &str) -> (SessionGrant, bool) {
        let name = edit_lock_name(path);
        if !self.coordinator.acquire(&name).await {
            if lock_registry(&self.sessions).remove(path).is_some() {
                tracing::warn!("Dropped stale editing session for {}", path);
            }
            return (SessionGrant::denied(), false);
        }

        let mut created = false;
        let session_id = lock_registry(&self.sessions)
            .entry(path.to_string())
            .or_insert_with(|| {
                created = true;
                tracing::info!("Started editing session for {}", path);
                EditingSession {
                    file_path: path.to_string(),
                    session_id: Uuid::now_v7().to_string(),
                    created_at: self.clock.now_ms(),
                }
            })
            .session_id
            .clone();
        (SessionGrant::granted(session_id), created)
    }

    async fn end_locked(&self, path: &str) {
        if lock_registry(&self.sessions).remove(path).is_some() {
            tracing::info!("Ended editing session for {}", path);
        }
        self.coordinator.release(&edit_lock_name(path)).await;
    }
}
