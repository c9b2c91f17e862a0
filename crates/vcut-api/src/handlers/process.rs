//! `POST /api/process-video`.

use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use tracing::info;

use vcut_models::OUTPUT_CONTENT_TYPE;

use crate::error::{ApiError, ApiResult};
use crate::services::receive_upload;
use crate::state::AppState;

/// Room for multipart boundaries and the `segments` field on top of the
/// video size limit.
pub const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Accept a video plus a segment list and answer with the cut video.
///
/// In production, 500-class error details are withheld from the client;
/// they are logged by the job runner.
pub async fn process_video(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Response> {
    let production = state.config.is_production();
    run(state, headers, multipart).await.map_err(|e| {
        if production {
            e.redacted()
        } else {
            e
        }
    })
}

async fn run(
    state: AppState,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Response> {
    let max_bytes = state.config.max_upload_bytes;
    let limit = state.config.max_upload_display();

    if let Some(length) = content_length(&headers) {
        if length > max_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES) {
            return Err(ApiError::PayloadTooLarge { limit });
        }
    }

    let multipart =
        multipart.map_err(|rejection| ApiError::bad_request("Invalid upload", rejection.body_text()))?;

    let form = receive_upload(multipart, state.runner.dirs(), max_bytes, &limit).await?;
    let Some(video) = form.video else {
        return Err(ApiError::no_video());
    };

    info!(
        input = %video.path.display(),
        size = video.size,
        content_type = %video.content_type,
        "Upload received"
    );

    let processed = state
        .runner
        .process(video, form.segments.as_deref())
        .await?;

    info!(
        job_id = %processed.job_id,
        output = %processed.filename,
        duration_ms = (processed.processing_time * 1000.0) as u64,
        "Streaming result"
    );

    let disposition = format!("attachment; filename=\"{}\"", processed.filename);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, OUTPUT_CONTENT_TYPE)
        .header(header::CONTENT_LENGTH, processed.size)
        .header(header::CONTENT_DISPOSITION, disposition)
        .body(Body::from_stream(processed.stream))
        .map_err(|e| ApiError::internal(e.to_string()))
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}
