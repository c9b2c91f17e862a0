//! Application state.

use std::sync::Arc;
use std::time::Instant;

use vcut_media::{FfmpegEngine, VideoEngine, WorkingDirs};

use crate::config::ApiConfig;
use crate::services::{JobRunner, RetentionPolicy, RetentionScheduler, Scheduler, TokioScheduler};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub runner: JobRunner,
    pub started_at: Instant,
}

impl AppState {
    /// Create state for the production server: real FFmpeg, tokio timers.
    pub fn new(config: ApiConfig, dirs: WorkingDirs, engine: FfmpegEngine) -> Self {
        let engine = engine.with_timeout(config.engine_timeout);
        Self::with_parts(config, dirs, Arc::new(engine), Arc::new(TokioScheduler))
    }

    /// Create state from explicit collaborators.
    pub fn with_parts(
        config: ApiConfig,
        dirs: WorkingDirs,
        engine: Arc<dyn VideoEngine>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let policy = RetentionPolicy {
            success_grace: config.cleanup_delay,
            failure_grace: config.failure_cleanup_delay,
        };
        let runner = JobRunner::new(engine, RetentionScheduler::new(scheduler), policy, dirs);

        Self {
            config,
            runner,
            started_at: Instant::now(),
        }
    }

    /// Whole seconds since the state was created.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
