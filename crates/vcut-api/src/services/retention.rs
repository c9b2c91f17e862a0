//! Deferred deletion of job files.
//!
//! Deletion runs through a [`Scheduler`] so the timing source can be swapped:
//! [`TokioScheduler`] in the server, [`ManualScheduler`] wherever a test needs
//! to decide when time passes.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tracing::{debug, info, warn};

use vcut_media::remove_file_if_exists;

use crate::metrics;

/// Runs a task once after a delay.
pub trait Scheduler: Send + Sync {
    fn schedule_once(&self, delay: Duration, task: BoxFuture<'static, ()>);
}

/// Scheduler backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, task: BoxFuture<'static, ()>) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    task.await;
                });
            }
            Err(_) => {
                // Outside a runtime (e.g. during shutdown): run now on a
                // throwaway runtime rather than leak the files.
                warn!("No tokio runtime available, running scheduled task immediately");
                match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt.block_on(task),
                    Err(e) => warn!("Failed to build fallback runtime: {}", e),
                }
            }
        }
    }
}

/// Scheduler that only runs tasks when told to. Time is a counter advanced
/// by [`ManualScheduler::advance`].
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    pending: Vec<PendingTask>,
}

struct PendingTask {
    scheduled_at: Duration,
    due: Duration,
    task: BoxFuture<'static, ()>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Delays (relative to the time they were scheduled) of pending tasks.
    pub fn pending_delays(&self) -> Vec<Duration> {
        let state = self.lock();
        state
            .pending
            .iter()
            .map(|p| p.due - p.scheduled_at)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Move the clock forward and run every task that became due.
    pub async fn advance(&self, by: Duration) {
        let due: Vec<BoxFuture<'static, ()>> = {
            let mut state = self.lock();
            state.now += by;
            let now = state.now;
            let (ready, waiting): (Vec<_>, Vec<_>) =
                state.pending.drain(..).partition(|p| p.due <= now);
            state.pending = waiting;
            ready.into_iter().map(|p| p.task).collect()
        };

        for task in due {
            task.await;
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, task: BoxFuture<'static, ()>) {
        let mut state = self.lock();
        let scheduled_at = state.now;
        state.pending.push(PendingTask {
            scheduled_at,
            due: scheduled_at + delay,
            task,
        });
    }
}

/// Grace windows applied after a job ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// After the output was fully streamed
    pub success_grace: Duration,
    /// After any failure
    pub failure_grace: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            success_grace: Duration::from_secs(5 * 60),
            failure_grace: Duration::from_secs(5),
        }
    }
}

/// Schedules best-effort deletion of job files.
#[derive(Clone)]
pub struct RetentionScheduler {
    scheduler: Arc<dyn Scheduler>,
}

impl RetentionScheduler {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self { scheduler }
    }

    /// Delete `paths` once `delay` has elapsed. Never fails.
    pub fn schedule(&self, paths: Vec<PathBuf>, delay: Duration) {
        if paths.is_empty() {
            return;
        }
        debug!(files = paths.len(), delay_secs = delay.as_secs(), "Cleanup scheduled");
        self.scheduler
            .schedule_once(delay, Box::pin(delete_paths(paths)));
    }
}

/// Remove every path, logging and continuing past failures.
pub async fn delete_paths(paths: Vec<PathBuf>) {
    for path in paths {
        match remove_file_if_exists(&path).await {
            Ok(true) => {
                info!("Cleaned up file: {}", path.display());
                metrics::record_file_cleaned();
            }
            Ok(false) => debug!("Cleanup skipped, already gone: {}", path.display()),
            Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
        }
    }
}
