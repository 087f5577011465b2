use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Counts blocking jobs (D-Bus calls, journalctl, PAM) handed to Tokio's blocking pool.
#[derive(Debug, Clone, Default)]
pub struct TaskTracker {
    active_blocking: Arc<AtomicUsize>,
    spawned_blocking_total: Arc<AtomicUsize>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocking jobs currently running or queued on the pool.
    pub fn active_blocking_count(&self) -> usize {
        self.active_blocking.load(Ordering::SeqCst)
    }

    pub fn total_blocking_spawned(&self) -> usize {
        self.spawned_blocking_total.load(Ordering::SeqCst)
    }

    /// Spawn a blocking job and track its lifetime using an RAII guard.
    ///
    /// The guard drops on completion or panic, so `active_blocking_count()` never leaks.
    pub fn spawn_blocking<F, T>(&self, f: F) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawned_blocking_total.fetch_add(1, Ordering::SeqCst);
        self.active_blocking.fetch_add(1, Ordering::SeqCst);

        let guard = TaskGuard {
            counter: Arc::clone(&self.active_blocking),
        };

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            f()
        })
    }

    /// `spawn_blocking` and wait for it; a panicked job becomes an error.
    pub async fn run_blocking<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_blocking(f)
            .await
            .map_err(|e| anyhow::anyhow!("blocking task failed: {e}"))
    }
}

#[derive(Debug)]
struct TaskGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
