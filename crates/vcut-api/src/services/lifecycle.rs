//! Per-request job lifecycle.
//!
//! A job walks `Received -> Validating -> Building -> Processing -> Streaming`
//! and ends `Completed` or `Failed`. [`JobGuard`] owns the job's files and
//! schedules their deletion exactly once, whichever way the job ends.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Bytes;
use futures_util::Stream;
use tokio::fs::File;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::io::ReaderStream;

use vcut_media::{build_filter_spec, EngineEvent, VideoEngine, WorkingDirs};
use vcut_models::{parse_segments_payload, Job, JobId, JobState, ValidatedSegmentSet};

use crate::error::ApiError;
use crate::logging::JobLogger;
use crate::metrics;
use crate::services::retention::{RetentionPolicy, RetentionScheduler};
use crate::services::upload::StoredUpload;

const MAX_LOGGED_COMMAND_CHARS: usize = 200;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Owns a job's files until it reaches a terminal state.
///
/// `complete` schedules deletion after the success grace window, `fail` (or
/// dropping the guard) after the failure grace window. The output path is
/// only included once the engine has been started.
pub struct JobGuard {
    job: Job,
    logger: JobLogger,
    retention: RetentionScheduler,
    policy: RetentionPolicy,
    output_created: bool,
    finished: bool,
}

impl JobGuard {
    pub fn new(job: Job, retention: RetentionScheduler, policy: RetentionPolicy) -> Self {
        let logger = JobLogger::new(&job.id, "process_video");
        Self {
            job,
            logger,
            retention,
            policy,
            output_created: false,
            finished: false,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn state(&self) -> JobState {
        self.job.state()
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    /// Move the job forward one stage.
    pub fn advance(&mut self, to: JobState) -> Result<(), ApiError> {
        let from = self.job.state();
        self.job
            .transition(to)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        if to == JobState::Processing {
            self.output_created = true;
        }
        self.logger.log_transition(from, to);
        Ok(())
    }

    fn paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.job.input_path.clone()];
        if self.output_created {
            paths.push(self.job.output_path.clone());
        }
        paths
    }

    /// The output reached the client in full.
    pub fn complete(mut self, bytes_sent: u64) {
        self.finished = true;
        let from = self.job.state();
        if let Err(e) = self.job.transition(JobState::Completed) {
            self.logger.log_warning(&e.to_string());
        } else {
            self.logger.log_transition(from, JobState::Completed);
        }
        self.logger.log_completion(&format!(
            "sent {:.2} MB in {:.2}s",
            bytes_sent as f64 / BYTES_PER_MB,
            self.job.elapsed_secs()
        ));
        metrics::record_job_completed();
        self.retention.schedule(self.paths(), self.policy.success_grace);
    }

    /// The job failed; `reason` is logged.
    pub fn fail(mut self, reason: &str) {
        self.finish_failed(reason);
    }

    fn finish_failed(&mut self, reason: &str) {
        if self.finished {
            return;
        }
        self.finished = true;

        let from = self.job.state();
        if self.job.transition(JobState::Failed).is_ok() {
            self.logger.log_transition(from, JobState::Failed);
        }
        self.logger
            .log_error(&format!("failed during {}: {}", from, reason));
        metrics::record_job_failed(from.as_str());
        self.retention.schedule(self.paths(), self.policy.failure_grace);
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.finish_failed("abandoned before completion");
        }
    }
}

/// Streams the output file and reports the outcome to the job's guard.
///
/// Reaching end of file or sending at least `expected` bytes completes the
/// job; a read error, or being dropped short of `expected`, fails it.
pub struct TrackedFileStream {
    inner: ReaderStream<File>,
    expected: u64,
    sent: u64,
    guard: Option<JobGuard>,
}

impl TrackedFileStream {
    pub fn new(file: File, expected: u64, guard: JobGuard) -> Self {
        Self {
            inner: ReaderStream::new(file),
            expected,
            sent: 0,
            guard: Some(guard),
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    fn finish(&mut self) {
        if let Some(guard) = self.guard.take() {
            if self.sent >= self.expected {
                guard.complete(self.sent);
            } else {
                guard.fail(&format!(
                    "client received {} of {} bytes",
                    self.sent, self.expected
                ));
            }
        }
    }
}

impl Stream for TrackedFileStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                if let Some(guard) = this.guard.take() {
                    guard.fail(&format!("read error while streaming: {}", e));
                }
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for TrackedFileStream {
    fn drop(&mut self) {
        self.finish();
    }
}

/// A rendered job ready to be sent.
pub struct ProcessedVideo {
    pub job_id: JobId,
    /// Name used in `Content-Disposition`
    pub filename: String,
    pub size: u64,
    pub processing_time: f64,
    pub stream: TrackedFileStream,
}

/// Runs jobs against a [`VideoEngine`].
#[derive(Clone)]
pub struct JobRunner {
    engine: Arc<dyn VideoEngine>,
    retention: RetentionScheduler,
    policy: RetentionPolicy,
    dirs: WorkingDirs,
}

impl JobRunner {
    pub fn new(
        engine: Arc<dyn VideoEngine>,
        retention: RetentionScheduler,
        policy: RetentionPolicy,
        dirs: WorkingDirs,
    ) -> Self {
        Self {
            engine,
            retention,
            policy,
            dirs,
        }
    }

    pub fn dirs(&self) -> &WorkingDirs {
        &self.dirs
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Cut `upload` down to `segments` and open the result for streaming.
    ///
    /// The upload becomes the job's input and is owned by the job from here
    /// on, including on error.
    pub async fn process(
        &self,
        upload: StoredUpload,
        segments: Option<&str>,
    ) -> Result<ProcessedVideo, ApiError> {
        let job = Job::new(upload.path.clone(), self.dirs.output_path());
        let mut guard = JobGuard::new(job, self.retention.clone(), self.policy);
        let logger = guard.logger().clone();

        logger.log_start(&format!(
            "{} ({:.2} MB)",
            upload.original_name,
            upload.size as f64 / BYTES_PER_MB
        ));

        guard.advance(JobState::Validating)?;
        let set = match validate_segments(segments) {
            Ok(set) => set,
            Err(e) => {
                guard.fail(&e.to_string());
                return Err(e);
            }
        };
        logger.log_progress(&format!(
            "{} valid segments, {:.2}s total",
            set.len(),
            set.total_duration()
        ));

        guard.advance(JobState::Building)?;
        let spec = build_filter_spec(&set);

        guard.advance(JobState::Processing)?;
        let input = guard.job().input_path.clone();
        let output = guard.job().output_path.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        let events = tokio::spawn(log_engine_events(rx, logger.clone()));

        let started = Instant::now();
        let result = self.engine.run(&input, &output, &spec, tx).await;
        let _ = events.await;
        metrics::record_engine_duration(started.elapsed().as_secs_f64(), spec.is_fast_path());

        if let Err(e) = result {
            if let Some(tail) = e.stderr_tail() {
                logger.log_error(&format!("engine stderr: {}", tail));
            }
            let processing_time = guard.job().elapsed_secs();
            guard.fail(&e.to_string());
            return Err(ApiError::from(e).with_processing_time(processing_time));
        }

        guard.advance(JobState::Streaming)?;
        let size = tokio::fs::metadata(&output).await?.len();
        let file = File::open(&output).await?;
        let processing_time = guard.job().elapsed_secs();

        logger.log_progress(&format!(
            "rendered {:.2} MB in {:.2}s",
            size as f64 / BYTES_PER_MB,
            processing_time
        ));

        let filename = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "processed.mp4".to_string());

        Ok(ProcessedVideo {
            job_id: guard.job().id.clone(),
            filename,
            size,
            processing_time,
            stream: TrackedFileStream::new(file, size, guard),
        })
    }
}

fn validate_segments(payload: Option<&str>) -> Result<ValidatedSegmentSet, ApiError> {
    let raw = parse_segments_payload(payload)?;
    Ok(ValidatedSegmentSet::validate(&raw)?)
}

async fn log_engine_events(mut rx: UnboundedReceiver<EngineEvent>, logger: JobLogger) {
    let mut last_decile = -1i64;

    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::Started { command_line } => {
                let shown: String = command_line.chars().take(MAX_LOGGED_COMMAND_CHARS).collect();
                logger.log_progress(&format!("engine started: {}", shown));
            }
            EngineEvent::Progress { percent } => {
                let decile = (percent / 10.0).floor() as i64;
                if decile > last_decile {
                    last_decile = decile;
                    logger.log_progress(&format!("{:.0}%", percent));
                }
            }
            EngineEvent::Completed => logger.log_progress("engine finished"),
            EngineEvent::Failed { message } => {
                logger.log_warning(&format!("engine failed: {}", message))
            }
        }
    }
}
