//! Filesystem utilities: working directories, unique file names, cleanup.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::Rng;
use tokio::fs;

use crate::error::MediaResult;

/// Directory receiving raw uploads.
pub const UPLOADS_DIR: &str = "uploads";
/// Directory receiving engine output.
pub const PROCESSED_DIR: &str = "processed";
/// Scratch directory, reserved.
pub const TMP_DIR: &str = "tmp";

const RANDOM_SUFFIX_LEN: usize = 13;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// The three working directories of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDirs {
    pub uploads: PathBuf,
    pub processed: PathBuf,
    pub tmp: PathBuf,
}

impl WorkingDirs {
    pub fn under(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            uploads: root.join(UPLOADS_DIR),
            processed: root.join(PROCESSED_DIR),
            tmp: root.join(TMP_DIR),
        }
    }

    /// Fresh path for an upload named `original_name` by the client.
    pub fn upload_path(&self, original_name: &str) -> PathBuf {
        self.uploads.join(unique_upload_name(original_name))
    }

    /// Fresh path for an engine output.
    pub fn output_path(&self) -> PathBuf {
        self.processed.join(unique_output_name())
    }
}

/// Create `uploads/`, `processed/` and `tmp/` under `root`. Idempotent.
pub async fn ensure_working_directories(root: impl AsRef<Path>) -> MediaResult<WorkingDirs> {
    let dirs = WorkingDirs::under(root);

    for dir in [&dirs.uploads, &dirs.processed, &dirs.tmp] {
        if !fs::try_exists(dir).await.unwrap_or(false) {
            fs::create_dir_all(dir).await?;
            tracing::info!("Created working directory: {}", dir.display());
        }
    }

    Ok(dirs)
}

/// Thirteen random lowercase base-36 characters.
pub fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..RANDOM_SUFFIX_LEN)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect()
}

/// `{epoch_ms}-{random}-{sanitized original}`.
pub fn unique_upload_name(original_name: &str) -> String {
    format!(
        "{}-{}-{}",
        Utc::now().timestamp_millis(),
        random_suffix(),
        sanitize_filename(original_name)
    )
}

/// `processed-{epoch_ms}-{random}.mp4`.
pub fn unique_output_name() -> String {
    format!("processed-{}-{}.mp4", Utc::now().timestamp_millis(), random_suffix())
}

/// Reduce a client-supplied file name to a safe final path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "upload.bin".to_string()
    } else {
        cleaned.chars().take(120).collect()
    }
}

/// Delete `path`, treating an already-absent file as success.
///
/// Returns whether a file was actually removed.
pub async fn remove_file_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
