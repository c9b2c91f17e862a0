//! Multipart intake: stores the `video` part on disk and collects `segments`.

use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use axum::http::StatusCode;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use vcut_media::{remove_file_if_exists, WorkingDirs};

use crate::error::ApiError;

/// MIME types accepted for the `video` field.
pub const ALLOWED_VIDEO_TYPES: &[&str] = &[
    "video/mp4",
    "video/avi",
    "video/mov",
    "video/quicktime",
    "video/x-msvideo",
];

/// A file the upload layer has fully written to local storage.
#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub path: PathBuf,
    pub original_name: String,
    pub size: u64,
    pub content_type: String,
}

/// Everything extracted from one multipart request.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub video: Option<StoredUpload>,
    pub segments: Option<String>,
}

pub fn is_allowed_video_type(content_type: &str) -> bool {
    ALLOWED_VIDEO_TYPES.contains(&content_type)
}

/// Drain `multipart`, streaming the video to `dirs.uploads`.
///
/// On any error the partially written upload is removed before returning.
pub async fn receive_upload(
    mut multipart: Multipart,
    dirs: &WorkingDirs,
    max_bytes: u64,
    limit_display: &str,
) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm::default();

    let result = read_fields(&mut multipart, &mut form, dirs, max_bytes, limit_display).await;

    if let Err(e) = result {
        if let Some(video) = form.video.take() {
            discard(&video.path).await;
        }
        return Err(e);
    }

    Ok(form)
}

async fn read_fields(
    multipart: &mut Multipart,
    form: &mut UploadForm,
    dirs: &WorkingDirs,
    max_bytes: u64,
    limit_display: &str,
) -> Result<(), ApiError> {
    let too_large = || ApiError::PayloadTooLarge {
        limit: limit_display.to_string(),
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit_display))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("video") => {
                if form.video.is_some() {
                    return Err(ApiError::bad_request(
                        "Too many files",
                        "Only one \"video\" file may be uploaded",
                    ));
                }

                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                if !is_allowed_video_type(&content_type) {
                    return Err(ApiError::UnsupportedMediaType(content_type));
                }

                let original_name = field.file_name().unwrap_or("video.mp4").to_string();
                let path = dirs.upload_path(&original_name);

                // Record the path first so a failed write still gets cleaned up.
                form.video = Some(StoredUpload {
                    path: path.clone(),
                    original_name,
                    size: 0,
                    content_type,
                });

                let size = write_field(field, &path, max_bytes, limit_display)
                    .await?
                    .ok_or_else(too_large)?;

                if let Some(video) = form.video.as_mut() {
                    video.size = size;
                }
            }
            Some("segments") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| multipart_error(e, limit_display))?;
                form.segments = Some(text);
            }
            other => {
                debug!(field = ?other, "Ignoring unknown multipart field");
            }
        }
    }

    Ok(())
}

/// Stream one field to `path`. Returns `None` once the size limit is crossed.
async fn write_field(
    mut field: Field<'_>,
    path: &Path,
    max_bytes: u64,
    limit_display: &str,
) -> Result<Option<u64>, ApiError> {
    let mut file = File::create(path).await?;
    let mut size: u64 = 0;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, limit_display))?
    {
        size += chunk.len() as u64;
        if size > max_bytes {
            return Ok(None);
        }
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(Some(size))
}

fn multipart_error(e: MultipartError, limit_display: &str) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge {
            limit: limit_display.to_string(),
        }
    } else {
        ApiError::bad_request("Invalid upload", e.body_text())
    }
}

async fn discard(path: &Path) {
    if let Err(e) = remove_file_if_exists(path).await {
        warn!("Failed to remove rejected upload {}: {}", path.display(), e);
    }
}
