//! File sync engine between the local working copy and the shared file table.
//!
//! Local edits are pushed as they are committed (via the local store's change
//! stream); remote edits are pulled on a fixed poll interval. Merging is
//! last-writer-wins by digest: a differing remote digest always overwrites
//! the local copy.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;

use crate::background::BackgroundTask;
use crate::clock::Clock;
use crate::config::{WatermarkStrategy, WorkbenchConfig};
use crate::db::{LocalFileStore, RemoteFileTable};
use crate::error::{Error, Result};
use crate::models::{ChangeKind, ChangeOrigin, ChangeRecord, ChangeTable, MergeOutcome, RemoteFile};
use crate::util::lock_registry;

/// Outcome of one pull
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    /// Rows returned by the remote query
    pub fetched: usize,
    pub created: usize,
    pub overwritten: usize,
    pub unchanged: usize,
    /// Rows that failed to merge, plus one for a failed query
    pub failed: usize,
}

/// Outcome of pushing a batch of local changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub uploaded: usize,
    pub deleted: usize,
    /// Changes that need no remote write (pulled rows, contents records)
    pub skipped: usize,
    pub failed: usize,
}

enum PushAction {
    Uploaded,
    Deleted,
    Skipped,
}

/// Reconciles a [`LocalFileStore`] with a shared [`RemoteFileTable`].
pub struct SyncEngine<R> {
    remote: R,
    local: LocalFileStore,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    watermark: WatermarkStrategy,
    active: AtomicBool,
    /// Pull watermark (Unix ms); starts at the epoch.
    last_sync_time: AtomicI64,
    /// Serializes pulls so the watermark only moves forward.
    pull_gate: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<BackgroundTask>>,
}

impl<R: RemoteFileTable> SyncEngine<R> {
    pub fn new(
        remote: R,
        local: LocalFileStore,
        config: &WorkbenchConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            remote,
            local,
            clock,
            poll_interval: config.poll_interval(),
            watermark: config.watermark,
            active: AtomicBool::new(false),
            last_sync_time: AtomicI64::new(0),
            pull_gate: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn last_sync_time(&self) -> i64 {
        self.last_sync_time.load(Ordering::SeqCst)
    }

    pub const fn local(&self) -> &LocalFileStore {
        &self.local
    }

    /// Subscribe to local changes, schedule polling, and pull once.
    ///
    /// Starting an active engine is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.active.swap(true, Ordering::SeqCst) {
            return;
        }

        let listener = self.spawn_listener();
        let poller = self.spawn_poller();
        lock_registry(&self.tasks).extend([listener, poller]);
        tracing::info!("Sync engine started (poll every {:?})", self.poll_interval);

        self.pull().await;
    }

    /// Stop listening and polling. A push or pull already in flight runs to
    /// completion; nothing new starts afterwards.
    pub fn stop(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let tasks: Vec<BackgroundTask> = lock_registry(&self.tasks).drain(..).collect();
        for task in tasks {
            task.stop();
        }
        tracing::info!("Sync engine stopped");
    }

    /// Push committed local changes to the shared table.
    ///
    /// Each change is handled independently; a failure is logged and the
    /// rest of the batch still runs.
    pub async fn push(&self, changes: &[ChangeRecord]) -> PushReport {
        let mut report = PushReport::default();
        for change in changes {
            match self.push_change(change).await {
                Ok(PushAction::Uploaded) => report.uploaded += 1,
                Ok(PushAction::Deleted) => report.deleted += 1,
                Ok(PushAction::Skipped) => report.skipped += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(
                        "Failed to push {:?} of {} row {}: {}",
                        change.kind,
                        change.table.as_str(),
                        change.key,
                        error
                    );
                }
            }
        }
        if report.failed > 0 {
            tracing::error!("{} of {} changes failed to push", report.failed, changes.len());
        }
        report
    }

    /// Upload every local file, regardless of pending changes.
    pub async fn push_all(&self) -> PushReport {
        let mut report = PushReport::default();
        let files = match self.local.list().await {
            Ok(files) => files,
            Err(error) => {
                tracing::error!("Failed to list local files: {}", error);
                report.failed += 1;
                return report;
            }
        };

        for metadata in files {
            match self.upload(&metadata.path).await {
                Ok(PushAction::Uploaded) => report.uploaded += 1,
                Ok(_) => report.skipped += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!("Failed to push {}: {}", metadata.path, error);
                }
            }
        }
        report
    }

    /// Fetch remote rows changed since the watermark and merge them locally.
    ///
    /// The watermark advances only when every row merged.
    pub async fn pull(&self) -> PullReport {
        let _gate = self.pull_gate.lock().await;
        let watermark = self.last_sync_time();

        let rows = match self.remote.changed_since(watermark).await {
            Ok(rows) => rows,
            Err(error) => {
                tracing::warn!("Pull failed: {}", error);
                return PullReport {
                    failed: 1,
                    ..PullReport::default()
                };
            }
        };

        let mut report = PullReport {
            fetched: rows.len(),
            ..PullReport::default()
        };
        let mut max_observed = watermark;
        for row in &rows {
            max_observed = max_observed.max(row.updated_at);
            match self.local.merge_remote(row).await {
                Ok(MergeOutcome::Created) => report.created += 1,
                Ok(MergeOutcome::Overwritten) => report.overwritten += 1,
                Ok(MergeOutcome::Unchanged) => report.unchanged += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!("Failed to merge remote file {}: {}", row.path, error);
                }
            }
        }

        if report.failed > 0 {
            tracing::error!("{} remote files failed to merge; watermark kept", report.failed);
            return report;
        }

        let next = match self.watermark {
            WatermarkStrategy::CompletionTime => self.clock.now_ms(),
            WatermarkStrategy::MaxObserved => max_observed,
        };
        self.last_sync_time.fetch_max(next, Ordering::SeqCst);

        if report.created + report.overwritten > 0 {
            tracing::debug!(
                "Pulled {} new and {} updated files",
                report.created,
                report.overwritten
            );
        }
        report
    }

    async fn push_change(&self, change: &ChangeRecord) -> Result<PushAction> {
        // Pulled rows are already remote; contents ride along with metadata.
        if change.origin == ChangeOrigin::Remote || change.table != ChangeTable::FileMetadata {
            tracing::debug!(
                "Skipping {:?} change of {} row {}",
                change.origin,
                change.table.as_str(),
                change.key
            );
            return Ok(PushAction::Skipped);
        }

        match change.kind {
            ChangeKind::Create | ChangeKind::Update => {
                if change.new.is_none() {
                    return Err(Error::InvalidInput(format!(
                        "{:?} change for {} has no record",
                        change.kind, change.key
                    )));
                }
                self.upload(&change.key).await
            }
            ChangeKind::Delete => {
                self.remote.delete(&change.key).await?;
                Ok(PushAction::Deleted)
            }
        }
    }

    async fn upload(&self, path: &str) -> Result<PushAction> {
        // Re-read so the uploaded digest matches the uploaded contents.
        let Some((metadata, contents)) = self.local.get_file(path).await? else {
            return Ok(PushAction::Skipped);
        };
        let row = RemoteFile::from_local(&metadata, contents.contents, self.clock.now_ms());
        self.remote.upsert(&row).await?;
        tracing::debug!("Pushed {} ({})", row.path, row.digest);
        Ok(PushAction::Uploaded)
    }

    fn spawn_listener(self: &Arc<Self>) -> BackgroundTask {
        let mut changes = self.local.subscribe();
        let engine = Arc::downgrade(self);
        BackgroundTask::spawn(move |cancel| async move {
            loop {
                let received = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    received = changes.recv() => received,
                };
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                match received {
                    Ok(batch) => {
                        engine.push(&batch).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Sync listener missed {} change batches; pushing all", skipped);
                        engine.push_all().await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_poller(self: &Arc<Self>) -> BackgroundTask {
        let engine = Arc::downgrade(self);
        BackgroundTask::periodic(self.poll_interval, move || {
            let engine = engine.clone();
            async move {
                let Some(engine) = engine.upgrade() else {
                    return false;
                };
                engine.pull().await;
                true
            }
        })
    }
}
