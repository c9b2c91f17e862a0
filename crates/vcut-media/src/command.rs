//! FFmpeg command builder and runner.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::filter_graph::FilterSpec;
use crate::progress::{is_progress_line, parse_progress_line, FfmpegProgress};

/// Number of diagnostic stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// Builder for FFmpeg commands.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input file path
    input: PathBuf,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add multiple input arguments.
    pub fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Add multiple output arguments.
    pub fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Apply a segment filter specification.
    pub fn filter_spec(self, spec: &FilterSpec) -> Self {
        let args = spec.to_args();
        self.input_args(args.input_args).output_args(args.output_args)
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.overwrite {
            args.push("-y".to_string());
        }

        args.push("-hide_banner".to_string());
        args.push("-v".to_string());
        args.push(self.log_level.clone());

        // Progress output to stderr
        args.push("-progress".to_string());
        args.push("pipe:2".to_string());
        args.push("-nostats".to_string());

        args.extend(self.input_args.iter().cloned());

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());

        args.extend(self.output_args.iter().cloned());

        args.push(self.output.to_string_lossy().to_string());

        args
    }

    /// Human-readable command line for logs.
    pub fn command_line(&self, binary: &Path) -> String {
        format!("{} {}", binary.display(), self.build_args().join(" "))
    }
}

/// Runner for FFmpeg commands with progress tracking, timeout and cancellation.
pub struct FfmpegRunner {
    /// FFmpeg binary
    binary: PathBuf,
    /// Cancellation signal receiver
    cancel_rx: Option<watch::Receiver<bool>>,
    /// Wall-clock limit
    timeout: Option<Duration>,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegRunner {
    /// Create a new runner using `ffmpeg` from PATH.
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
            cancel_rx: None,
            timeout: None,
        }
    }

    /// Use a specific FFmpeg binary.
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Set cancellation signal.
    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    /// Set timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Run an FFmpeg command.
    pub async fn run(&self, cmd: &FfmpegCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    /// Run an FFmpeg command with progress callback.
    ///
    /// The child is killed if this future is dropped before it exits.
    pub async fn run_with_progress<F>(&self, cmd: &FfmpegCommand, progress_callback: F) -> MediaResult<()>
    where
        F: Fn(FfmpegProgress) + Send + 'static,
    {
        let args = cmd.build_args();
        debug!("Running FFmpeg: {} {}", self.binary.display(), args.join(" "));

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    MediaError::FfmpegNotFound(self.binary.display().to_string())
                }
                _ => MediaError::Io(e),
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::ffmpeg_failed("stderr not captured", None, None))?;
        let mut reader = BufReader::new(stderr).lines();

        // Progress lines feed the callback; everything else is diagnostics.
        let stderr_handle = tokio::spawn(async move {
            let mut current_progress = FfmpegProgress::default();
            let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

            while let Ok(Some(line)) = reader.next_line().await {
                if is_progress_line(&line) {
                    if let Some(progress) = parse_progress_line(&line, &mut current_progress) {
                        progress_callback(progress);
                    }
                } else if !line.trim().is_empty() {
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }

            tail
        });

        let result = self.wait_for_completion(&mut child).await;

        let tail = stderr_handle.await.unwrap_or_default();

        match result {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => {
                let stderr_tail = (!tail.is_empty())
                    .then(|| tail.into_iter().collect::<Vec<_>>().join("\n"));
                Err(MediaError::ffmpeg_failed(
                    "FFmpeg exited with non-zero status",
                    stderr_tail,
                    status.code(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Wait for child process with cancellation and timeout.
    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<std::process::ExitStatus> {
        let mut cancel_rx = self.cancel_rx.clone();

        let cancelled = async {
            match cancel_rx.as_mut() {
                Some(rx) => {
                    while !*rx.borrow() {
                        if rx.changed().await.is_err() {
                            // Sender gone; cancellation can no longer arrive.
                            std::future::pending::<()>().await;
                        }
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };

        let deadline = async {
            match self.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            status = child.wait() => Ok(status?),
            _ = cancelled => {
                info!("FFmpeg cancelled, killing process");
                let _ = child.kill().await;
                Err(MediaError::Cancelled)
            }
            _ = deadline => {
                let secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default();
                warn!("FFmpeg timed out after {} seconds, killing process", secs);
                let _ = child.kill().await;
                Err(MediaError::Timeout(secs))
            }
        }
    }
}

/// Resolve the FFmpeg binary, either an explicit path or a name looked up in PATH.
pub fn check_ffmpeg(binary: &str) -> MediaResult<PathBuf> {
    which::which(binary).map_err(|_| MediaError::FfmpegNotFound(binary.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcut_models::{Segment, ValidatedSegmentSet};

    use crate::filter_graph::build_filter_spec;

    #[test]
    fn test_command_builder_order() {
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4")
            .input_args(["-ss", "10"])
            .output_args(["-c:v", "libx264"]);

        let args = cmd.build_args();
        let pos = |needle: &str| args.iter().position(|a| a == needle).unwrap();

        assert_eq!(args.first().map(String::as_str), Some("-y"));
        assert!(pos("-ss") < pos("-i"));
        assert!(pos("-i") < pos("-c:v"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
        assert_eq!(args[pos("-progress") + 1], "pipe:2");
    }

    #[test]
    fn test_filter_spec_args_placement() {
        let one = ValidatedSegmentSet::from_segments(vec![Segment { start: 3.0, end: 8.0 }]).unwrap();
        let args = FfmpegCommand::new("in.mp4", "out.mp4")
            .filter_spec(&build_filter_spec(&one))
            .build_args();
        let i = args.iter().position(|a| a == "-i").unwrap();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        assert!(ss < i);
        assert_eq!(args[ss + 1], "3");

        let two = ValidatedSegmentSet::from_segments(vec![
            Segment { start: 0.0, end: 1.0 },
            Segment { start: 2.0, end: 3.0 },
        ])
        .unwrap();
        let args = FfmpegCommand::new("in.mp4", "out.mp4")
            .filter_spec(&build_filter_spec(&two))
            .build_args();
        let i = args.iter().position(|a| a == "-i").unwrap();
        let fc = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert!(fc > i);
        assert!(!args.contains(&"-ss".to_string()));
    }

    #[test]
    fn test_command_line() {
        let cmd = FfmpegCommand::new("a.mp4", "b.mp4");
        let line = cmd.command_line(Path::new("/usr/bin/ffmpeg"));
        assert!(line.starts_with("/usr/bin/ffmpeg -y"));
        assert!(line.ends_with("-i a.mp4 b.mp4"));
    }

    /// Write an executable shell script standing in for FFmpeg.
    #[cfg(unix)]
    fn fake_ffmpeg(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_keeps_stderr_tail() {
        let dir = tempfile::TempDir::new().unwrap();
        let binary = fake_ffmpeg(
            &dir,
            "echo 'progress=continue' >&2\necho 'in.mp4: Invalid data found' >&2\nexit 1",
        );

        let err = FfmpegRunner::new()
            .with_binary(binary)
            .run(&FfmpegCommand::new("in.mp4", "out.mp4"))
            .await
            .unwrap_err();

        match err {
            MediaError::FfmpegFailed {
                stderr, exit_code, ..
            } => {
                assert_eq!(exit_code, Some(1));
                assert_eq!(stderr.as_deref(), Some("in.mp4: Invalid data found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_progress_callback_receives_blocks() {
        let dir = tempfile::TempDir::new().unwrap();
        let binary = fake_ffmpeg(
            &dir,
            "echo 'out_time_us=2500000' >&2\necho 'progress=continue' >&2\necho 'out_time_us=5000000' >&2\necho 'progress=end' >&2",
        );

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        FfmpegRunner::new()
            .with_binary(binary)
            .run_with_progress(&FfmpegCommand::new("in.mp4", "out.mp4"), move |p| {
                sink.lock().unwrap().push(p.percentage(5.0));
            })
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!((seen[0] - 50.0).abs() < 0.01);
        assert!((seen[1] - 100.0).abs() < 0.01);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::TempDir::new().unwrap();
        let binary = fake_ffmpeg(&dir, "exec sleep 30");

        let err = FfmpegRunner::new()
            .with_binary(binary)
            .with_timeout(Duration::from_millis(200))
            .run(&FfmpegCommand::new("in.mp4", "out.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Timeout(0)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_process() {
        let dir = tempfile::TempDir::new().unwrap();
        let binary = fake_ffmpeg(&dir, "exec sleep 30");
        let (tx, rx) = watch::channel(false);

        let runner = FfmpegRunner::new().with_binary(binary).with_cancel(rx);
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");
        let run = runner.run(&cmd);

        let cancel = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send(true).unwrap();
        };

        let (result, ()) = tokio::join!(run, cancel);
        assert!(matches!(result, Err(MediaError::Cancelled)));
    }

    #[tokio::test]
    async fn test_missing_binary_reports_not_found() {
        let runner = FfmpegRunner::new().with_binary("/nonexistent/ffmpeg-binary");
        let cmd = FfmpegCommand::new("in.mp4", "out.mp4");
        let err = runner.run(&cmd).await.unwrap_err();
        assert!(matches!(err, MediaError::FfmpegNotFound(_)));
    }
}
