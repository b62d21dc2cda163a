//! Lease-based lock coordinator over the shared lock table.
//!
//! A lock is a row in the remote `locks` table keyed by resource name. The
//! coordinator inserts the row to acquire, renews its expiry on a heartbeat,
//! and deletes it to release. Rows whose expiry has passed are swept before
//! every acquire, so a crashed holder blocks others for at most one TTL.
//!
//! The coordinator never relies on client-side ordering: heartbeat renewals
//! and explicit acquire/release calls can interleave freely, and every
//! decision is made by a single conditional statement on the store.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;


use crate::background::BackgroundTask;
use crate::clock::Clock;
use crate::config::{AcquireFailurePolicy, WorkbenchConfig};
use crate::db::LockStore;
use crate::error::Result;
use crate::models::{HolderId, LockRecord, LockStatus};
use crate::util::{duration_millis, lock_registry};

/// Outcome of one heartbeat pass over the held locks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatReport {
    /// Leases extended in place
    pub renewed: Vec<String>,
    /// Leases that had vanished and were taken again
    pub reacquired: Vec<String>,
    /// Leases now owned by someone else; dropped from the heartbeat set
    pub lost: Vec<String>,
}

/// Acquires, renews, and releases leases for one holder identity.
pub struct LockCoordinator<S> {
    /// `None` when no shared store is configured; every lock is then granted.
    store: Option<S>,
    holder_id: HolderId,
    lock_ttl_ms: i64,
    heartbeat_interval: Duration,
    policy: AcquireFailurePolicy,
    clock: Arc<dyn Clock>,
    held: Mutex<BTreeSet<String>>,
    lost: Mutex<BTreeSet<String>>,
    heartbeat_task: Mutex<Option<BackgroundTask>>,
}

impl<S: LockStore> LockCoordinator<S> {
    pub fn new(store: S, config: &WorkbenchConfig, clock: Arc<dyn Clock>) -> Self {
        Self::build(Some(store), config, clock)
    }

    /// A coordinator without a shared store: locking is a no-op that always
    /// grants, so the editor keeps working when sync is not configured.
    pub fn disabled(config: &WorkbenchConfig, clock: Arc<dyn Clock>) -> Self {
        Self::build(None, config, clock)
    }

    fn build(store: Option<S>, config: &WorkbenchConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            holder_id: HolderId::generate(),
            lock_ttl_ms: duration_millis(config.lock_ttl()),
            heartbeat_interval: config.heartbeat_interval(),
            policy: config.acquire_failure_policy,
            clock,
            held: Mutex::new(BTreeSet::new()),
            lost: Mutex::new(BTreeSet::new()),
            heartbeat_task: Mutex::new(None),
        }
    }

    /// Replace the generated holder identity.
    #[must_use]
    pub fn with_holder_id(mut self, holder_id: HolderId) -> Self {
        self.holder_id = holder_id;
        self
    }

    pub const fn holder_id(&self) -> &HolderId {
        &self.holder_id
    }

    pub const fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Names currently renewed by the heartbeat.
    pub fn held_names(&self) -> Vec<String> {
        lock_registry(&self.held).iter().cloned().collect()
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        lock_registry(&self.held).contains(name)
    }

    /// Try to take the lease on `name`.
    ///
    /// Re-acquiring a lease this holder already owns extends it and always
    /// succeeds. A transport failure is answered by the configured
    /// [`AcquireFailurePolicy`].
    pub async fn acquire(&self, name: &str) -> bool {
        let Some(store) = &self.store else {
            tracing::debug!("No shared lock store; granting {}", name);
            return true;
        };

        match self.acquire_on(store, name).await {
            Ok(true) => {
                self.track(name);
                tracing::debug!("Acquired lock {}", name);
                true
            }
            Ok(false) => {
                tracing::debug!("Lock {} is held by another holder", name);
                false
            }
            Err(error) => match self.policy {
                AcquireFailurePolicy::FailOpen => {
                    tracing::warn!(
                        "Lock store unreachable while acquiring {}: {}. Granting (fail-open)",
                        name,
                        error
                    );
                    // The heartbeat materializes the row once the store is back.
                    self.track(name);
                    true
                }
                AcquireFailurePolicy::FailClosed => {
                    tracing::warn!(
                        "Lock store unreachable while acquiring {}: {}. Denying (fail-closed)",
                        name,
                        error
                    );
                    false
                }
            },
        }
    }

    /// Release `name` if this holder owns it. Never touches another holder's row.
    pub async fn release(&self, name: &str) {
        // Stop renewing first so a concurrent heartbeat cannot re-create the row.
        self.forget(name);

        let Some(store) = &self.store else {
            return;
        };
        match store.delete(name, self.holder_id.as_str()).await {
            Ok(true) => tracing::debug!("Released lock {}", name),
            Ok(false) => tracing::debug!("Lock {} was not held by this holder", name),
            Err(error) => tracing::warn!("Failed to release lock {}: {}", name, error),
        }
    }

    /// Release every lock in the heartbeat set and discard pending
    /// lost-lease notices.
    pub async fn release_all(&self) {
        for name in self.held_names() {
            self.release(&name).await;
        }
        lock_registry(&self.lost).clear();
    }

    /// Whether a live lease on `name` belongs to a different holder.
    ///
    /// A lease owned by this holder never counts as locked.
    pub async fn is_held_by_other(&self, name: &str) -> LockStatus {
        let Some(store) = &self.store else {
            return LockStatus::unlocked();
        };

        self.sweep(store).await;
        match store.get(name).await {
            Ok(None) => LockStatus::unlocked(),
            Ok(Some(record)) if record.holder_id == self.holder_id.as_str() => {
                LockStatus::unlocked()
            }
            Ok(Some(record)) if !record.is_live(self.clock.now_ms()) => LockStatus::unlocked(),
            Ok(Some(record)) => LockStatus::held_by(record.holder_id),
            Err(error) => {
                tracing::warn!("Failed to read lock {}: {}", name, error);
                match self.policy {
                    AcquireFailurePolicy::FailOpen => LockStatus::unlocked(),
                    AcquireFailurePolicy::FailClosed => LockStatus {
                        locked: true,
                        holder_id: None,
                    },
                }
            }
        }
    }

    /// Extend the lease on `name` if this holder still owns it.
    pub async fn refresh(&self, name: &str) {
        let Some(store) = &self.store else {
            return;
        };
        match self.renew(store, name).await {
            Ok(true) => tracing::debug!("Refreshed lock {}", name),
            Ok(false) => tracing::warn!("Cannot refresh lock {}: no longer held", name),
            Err(error) => tracing::warn!("Failed to refresh lock {}: {}", name, error),
        }
    }

    /// Renew every held lease once.
    ///
    /// A lease whose row no longer matches is re-acquired; if someone else
    /// got it first, the name leaves the heartbeat set and is reported lost
    /// through [`LockCoordinator::take_lost`].
    pub async fn heartbeat_once(&self) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();
        let Some(store) = &self.store else {
            return report;
        };

        for name in self.held_names() {
            match self.renew(store, &name).await {
                Ok(true) => report.renewed.push(name),
                Ok(false) => {
                    tracing::warn!("Lease on {} disappeared; re-acquiring", name);
                    match self.reacquire(store, &name).await {
                        Ok(true) => report.reacquired.push(name),
                        Ok(false) => {
                            if self.mark_lost(&name) {
                                tracing::warn!("Lock {} was taken by another holder", name);
                                report.lost.push(name);
                            }
                        }
                        Err(error) => {
                            tracing::warn!("Failed to re-acquire lock {}: {}", name, error);
                            if self.policy == AcquireFailurePolicy::FailClosed
                                && self.mark_lost(&name)
                            {
                                report.lost.push(name);
                            }
                        }
                    }
                }
                // Transient; the next beat retries well inside the TTL.
                Err(error) => tracing::warn!("Heartbeat for {} failed: {}", name, error),
            }
        }

        if !report.renewed.is_empty() || !report.reacquired.is_empty() {
            tracing::debug!(
                "Heartbeat renewed {} and re-acquired {} locks",
                report.renewed.len(),
                report.reacquired.len()
            );
        }
        report
    }

    /// Consume a lost-lease notice for `name`.
    pub fn take_lost(&self, name: &str) -> bool {
        lock_registry(&self.lost).remove(name)
    }

    /// Drop all local state about `name` without touching the store.
    pub fn forget(&self, name: &str) {
        lock_registry(&self.held).remove(name);
        lock_registry(&self.lost).remove(name);
    }

    /// Start the recurring heartbeat. Calling it again while running is a no-op.
    pub fn start_heartbeat(self: &Arc<Self>) {
        let mut task = lock_registry(&self.heartbeat_task);
        if task.as_ref().is_some_and(|running| !running.is_finished()) {
            return;
        }

        let coordinator = Arc::downgrade(self);
        let period = self.heartbeat_interval;
        *task = Some(BackgroundTask::periodic(period, move || {
            let coordinator = coordinator.clone();
            async move {
                let Some(coordinator) = coordinator.upgrade() else {
                    return false;
                };
                coordinator.heartbeat_once().await;
                true
            }
        }));
        tracing::debug!("Lock heartbeat started every {:?}", period);
    }

    /// Stop the heartbeat timer. A beat already in flight runs to completion.
    pub fn stop_heartbeat(&self) {
        let task = lock_registry(&self.heartbeat_task).take();
        if let Some(task) = task {
            task.stop();
            tracing::debug!("Lock heartbeat stopped");
        }
    }

    pub fn is_heartbeat_running(&self) -> bool {
        lock_registry(&self.heartbeat_task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn expiry(&self) -> i64 {
        self.clock.now_ms().saturating_add(self.lock_ttl_ms)
    }

    fn track(&self, name: &str) {
        lock_registry(&self.held).insert(name.to_string());
        lock_registry(&self.lost).remove(name);
    }

    /// Move `name` from the heartbeat set to the lost set, unless it was
    /// released in the meantime.
    fn mark_lost(&self, name: &str) -> bool {
        let removed = lock_registry(&self.held).remove(name);
        if removed {
            lock_registry(&self.lost).insert(name.to_string());
        }
        removed
    }

    async fn sweep(&self, store: &S) {
        match store.delete_expired(self.clock.now_ms()).await {
            Ok(0) => {}
            Ok(count) => tracing::debug!("Swept {} expired locks", count),
            Err(error) => tracing::warn!("Expired lock sweep failed: {}", error),
        }
    }

    async fn renew(&self, store: &S, name: &str) -> Result<bool> {
        store
            .update_expiry(name, self.holder_id.as_str(), self.expiry())
            .await
    }

    async fn acquire_on(&self, store: &S, name: &str) -> Result<bool> {
        self.sweep(store).await;

        let record = LockRecord::new(name, self.holder_id.as_str(), self.expiry());
        if store.insert_if_absent(&record).await? {
            return Ok(true);
        }

        match store.get(name).await? {
            Some(existing) if existing.holder_id == self.holder_id.as_str() => {
                store
                    .update_expiry(name, self.holder_id.as_str(), record.expires_at)
                    .await
            }
            Some(_) => Ok(false),
            // Released between the insert and the read
            None => store.insert_if_absent(&record).await,
        }
    }

    async fn reacquire(&self, store: &S, name: &str) -> Result<bool> {
        if !self.is_tracked(name) {
            return Ok(false);
        }
        let acquired = self.acquire_on(store, name).await?;
        if acquired && !self.is_tracked(name) {
            // Released while we were re-acquiring; give the row back.
            store.delete(name, self.holder_id.as_str()).await?;
            return Ok(false);
        }
        Ok(acquired)
    }
}
