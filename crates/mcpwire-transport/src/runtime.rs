//! Task supervision and lock helpers shared by the transports.
//!
//! Every background loop a transport runs is spawned through its
//! [`TaskSet`]. The set owns one [`CancellationToken`]; cancelling it stops
//! every task and every timer raced against it.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Async mutex used where a guard must be held across `.await`.
pub use tokio::sync::Mutex as AsyncMutex;

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-lock a std `RwLock`, recovering the data if a writer panicked.
pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

/// Write-lock a std `RwLock`, recovering the data if a holder panicked.
pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// The supervised background tasks of one transport instance.
#[derive(Debug, Clone, Default)]
pub struct TaskSet {
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl TaskSet {
    /// Create an empty task set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task that stops as soon as the set is cancelled.
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.cancel.clone();
        tracing::trace!(task = name, "spawning transport task");
        self.tracker.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    tracing::trace!(task = name, "transport task cancelled");
                }
                () = fut => {
                    tracing::trace!(task = name, "transport task finished");
                }
            }
        });
    }

    /// A clone of the cancellation token shared by every task.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether [`TaskSet::shutdown`] has begun.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Number of tasks still running.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    /// Whether no tasks are running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Cancel every task and wait for all of them to finish.
    ///
    /// Must not be awaited from inside one of the set's own tasks.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

/// Sleep for `duration` unless `token` is cancelled first.
///
/// Returns `false` if the sleep was cut short.
pub async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = token.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_shutdown_cancels_pending_tasks() {
        let tasks = TaskSet::new();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        tasks.spawn("sleeper", async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            flag.store(true, Ordering::SeqCst);
        });
        assert_eq!(tasks.len(), 1);

        tokio::time::timeout(Duration::from_secs(1), tasks.shutdown())
            .await
            .expect("shutdown should not wait for the sleeper");
        assert!(tasks.is_cancelled());
        assert!(tasks.is_empty());
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_sleep_or_cancel() {
        let token = CancellationToken::new();
        assert!(sleep_or_cancel(&token, Duration::from_millis(1)).await);
        token.cancel();
        assert!(!sleep_or_cancel(&token, Duration::from_secs(3600)).await);
    }
}
