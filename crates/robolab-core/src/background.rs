//! Spawned loops that can be told to stop between units of work.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A spawned loop paired with the token that ends it.
///
/// Cancellation is only observed while the loop is waiting. Work that has
/// already started when [`BackgroundTask::stop`] is called runs to the end.
pub(crate) struct BackgroundTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn `body` with a token it must watch at every wait point.
    pub(crate) fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(body(cancel.clone()));
        Self { cancel, handle }
    }

    /// Run `tick` once per `period`, starting one period from now.
    /// The loop ends when `tick` returns `false` or the task is stopped.
    pub(crate) fn periodic<F, Fut>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self::spawn(move |cancel| async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if !tick().await {
                    break;
                }
            }
        })
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the loop to exit at its next wait point.
    pub(crate) fn stop(self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_lets_running_tick_finish() {
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let task = {
            let started = Arc::clone(&started);
            let finished = Arc::clone(&finished);
            BackgroundTask::periodic(Duration::from_millis(10), move || {
                let started = Arc::clone(&started);
                let finished = Arc::clone(&finished);
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    true
                }
            })
        };

        while started.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        task.stop();
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tick_returning_false_ends_loop() {
        let task = BackgroundTask::periodic(Duration::from_millis(5), || async { false });
        for _ in 0..100 {
            if task.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(task.is_finished());
    }
}
