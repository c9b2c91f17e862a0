//! Engine invocation for segment cutting.
//!
//! [`VideoEngine`] is the seam between the job lifecycle and the external
//! process. [`FfmpegEngine`] is the production implementation; tests plug in
//! their own.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use vcut_models::EncodingConfig;

use crate::command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filter_graph::FilterSpec;
use crate::progress::EngineEvent;

/// Sink for engine lifecycle notifications. Send failures are ignored.
pub type EventSender = UnboundedSender<EngineEvent>;

/// Something that turns an input file plus a filter specification into an
/// output file.
#[async_trait]
pub trait VideoEngine: Send + Sync {
    /// Run to completion. Resolves `Ok` only when the process exited 0.
    async fn run(
        &self,
        input: &Path,
        output: &Path,
        spec: &FilterSpec,
        events: EventSender,
    ) -> MediaResult<()>;
}

/// Runs the `ffmpeg` CLI, one process per call.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    binary: PathBuf,
    encoding: EncodingConfig,
    timeout: Option<Duration>,
}

impl FfmpegEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            encoding: EncodingConfig::default(),
            timeout: None,
        }
    }

    /// Resolve `binary` (a name in PATH or a path) and build an engine for it.
    pub fn locate(binary: &str) -> MediaResult<Self> {
        Ok(Self::new(check_ffmpeg(binary)?))
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingConfig) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Build the full command for one job.
    pub fn build_command(&self, input: &Path, output: &Path, spec: &FilterSpec) -> FfmpegCommand {
        FfmpegCommand::new(input, output)
            .filter_spec(spec)
            .output_args(self.encoding.to_ffmpeg_args())
    }

    fn runner(&self) -> FfmpegRunner {
        let runner = FfmpegRunner::new().with_binary(&self.binary);
        match self.timeout {
            Some(timeout) => runner.with_timeout(timeout),
            None => runner,
        }
    }
}

#[async_trait]
impl VideoEngine for FfmpegEngine {
    async fn run(
        &self,
        input: &Path,
        output: &Path,
        spec: &FilterSpec,
        events: EventSender,
    ) -> MediaResult<()> {
        let cmd = self.build_command(input, output, spec);
        let _ = events.send(EngineEvent::Started {
            command_line: cmd.command_line(&self.binary),
        });

        let total = spec.output_duration();
        let progress_events = events.clone();
        let start = Instant::now();

        let result = self
            .runner()
            .run_with_progress(&cmd, move |progress| {
                let _ = progress_events.send(EngineEvent::Progress {
                    percent: progress.percentage(total),
                });
            })
            .await;

        match &result {
            Ok(()) => {
                debug!(elapsed_ms = start.elapsed().as_millis() as u64, "FFmpeg finished");
                let _ = events.send(EngineEvent::Completed);
            }
            Err(e) => {
                let _ = events.send(EngineEvent::Failed {
                    message: e.to_string(),
                });
            }
        }

        result?;

        if !tokio::fs::try_exists(output).await.unwrap_or(false) {
            warn!(output = %output.display(), "FFmpeg exited 0 without an output file");
            return Err(MediaError::OutputMissing(output.to_path_buf()));
        }

        info!(output = %output.display(), "Segments rendered");
        Ok(())
    }
}
