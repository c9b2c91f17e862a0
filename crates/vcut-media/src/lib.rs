#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper for segment cutting.
//!
//! This crate provides:
//! - Structured filter specifications built from validated segments
//! - Type-safe FFmpeg command building
//! - Progress parsing from `-progress pipe:2`
//! - Timeout and cancellation support via tokio
//! - Working-directory and unique file-name helpers

pub mod command;
pub mod engine;
pub mod error;
pub mod filter_graph;
pub mod fs_utils;
pub mod progress;

pub use command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
pub use engine::{EventSender, FfmpegEngine, VideoEngine};
pub use error::{MediaError, MediaResult};
pub use filter_graph::{build_filter_spec, FilterGraph, FilterSpec};
pub use fs_utils::{ensure_working_directories, remove_file_if_exists, WorkingDirs};
pub use progress::{EngineEvent, FfmpegProgress};
