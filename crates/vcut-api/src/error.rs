//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use vcut_media::MediaError;
use vcut_models::ValidationError;

pub type ApiResult<T> = Result<T, ApiError>;

const ENGINE_ERROR: &str = "Video processing error";
const INTERNAL_ERROR: &str = "Internal server error";
const REDACTED_DETAILS: &str = "Internal error";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{error}: {details}")]
    BadRequest { error: String, details: String },

    #[error("File too large (max {limit})")]
    PayloadTooLarge { limit: String },

    #[error("Unsupported file type: {0}")]
    UnsupportedMediaType(String),

    #[error("Route not found: {0}")]
    NotFound(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Engine error: {source}")]
    Engine {
        #[source]
        source: MediaError,
        processing_time: Option<f64>,
    },

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A server error whose details are withheld from the client.
    #[error("{error}")]
    Redacted {
        error: &'static str,
        processing_time: Option<f64>,
    },
}

impl ApiError {
    pub fn bad_request(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self::BadRequest {
            error: error.into(),
            details: details.into(),
        }
    }

    pub fn no_video() -> Self {
        Self::bad_request("No video file provided", "The \"video\" field is required")
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Attach the elapsed processing time to an engine error.
    pub fn with_processing_time(self, secs: f64) -> Self {
        match self {
            Self::Engine { source, .. } => Self::Engine {
                source,
                processing_time: Some(secs),
            },
            other => other,
        }
    }

    /// Strip server-side details from 500-class errors. Client errors are
    /// returned unchanged.
    pub fn redacted(self) -> Self {
        match self {
            Self::Engine {
                processing_time, ..
            } => Self::Redacted {
                error: ENGINE_ERROR,
                processing_time,
            },
            Self::Internal(_) | Self::Io(_) => Self::Redacted {
                error: INTERNAL_ERROR,
                processing_time: None,
            },
            other => other,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } | ApiError::UnsupportedMediaType(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Engine { .. }
            | ApiError::Internal(_)
            | ApiError::Io(_)
            | ApiError::Redacted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::MalformedJson(detail) => Self::bad_request(
                "Invalid segments",
                format!("Segments must be a JSON array: {}", detail),
            ),
            ValidationError::EmptyOrNotArray => {
                Self::bad_request("Invalid segments", "At least one segment must be provided")
            }
            ValidationError::NoValidSegments => Self::bad_request(
                "No valid segments",
                "Every segment needs numeric start and end with 0 <= start < end",
            ),
        }
    }
}

impl From<MediaError> for ApiError {
    fn from(source: MediaError) -> Self {
        Self::Engine {
            source,
            processing_time: None,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(rename = "processingTime", skip_serializing_if = "Option::is_none")]
    processing_time: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>, details: Option<String>) -> Self {
        Self {
            error: error.into(),
            details,
            path: None,
            processing_time: None,
        }
    }
}

fn format_secs(secs: f64) -> String {
    format!("{:.2}", secs)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match self {
            ApiError::BadRequest { error, details } => ErrorResponse::new(error, Some(details)),
            ApiError::PayloadTooLarge { limit } => {
                ErrorResponse::new("File too large", Some(format!("Maximum size: {}", limit)))
            }
            ApiError::UnsupportedMediaType(mime) => ErrorResponse::new(
                "Unsupported file type",
                Some(format!("Got {}. Use MP4, AVI, or MOV.", mime)),
            ),
            ApiError::NotFound(path) => ErrorResponse {
                path: Some(path),
                ..ErrorResponse::new("Route not found", None)
            },
            ApiError::RateLimited => {
                ErrorResponse::new("Too many requests, please try again later", None)
            }
            ApiError::Engine {
                source,
                processing_time,
            } => ErrorResponse {
                processing_time: processing_time.map(format_secs),
                ..ErrorResponse::new(ENGINE_ERROR, Some(source.to_string()))
            },
            ApiError::Internal(msg) => ErrorResponse::new(INTERNAL_ERROR, Some(msg)),
            ApiError::Io(e) => ErrorResponse::new(INTERNAL_ERROR, Some(e.to_string())),
            ApiError::Redacted {
                error,
                processing_time,
            } => ErrorResponse {
                processing_time: processing_time.map(format_secs),
                ..ErrorResponse::new(error, Some(REDACTED_DETAILS.to_string()))
            },
        };

        (status, Json(body)).into_response()
    }
}
