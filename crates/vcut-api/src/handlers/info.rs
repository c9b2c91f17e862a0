//! Index page, capability descriptor and fallback.

use axum::http::Uri;
use axum::response::Html;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;

const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <title>vcut - API</title>
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <style>
    body { font-family: system-ui, -apple-system, Segoe UI, Roboto, sans-serif; margin: 40px; line-height: 1.6; color: #222; }
    code { background: #f5f5f5; padding: 2px 6px; border-radius: 4px; }
    a { color: #0b5fff; text-decoration: none; }
    a:hover { text-decoration: underline; }
  </style>
</head>
<body>
  <h1>vcut - API</h1>
  <p>Server is up. Available endpoints:</p>
  <ul>
    <li><a href="/health">/health</a> - status</li>
    <li><a href="/api/test">/api/test</a> - capabilities</li>
    <li><code>POST /api/process-video</code> - cut segments from a video</li>
  </ul>
</body>
</html>"#;

/// Paths advertised by `/api/test`.
pub const ENDPOINTS: &[&str] = &["/health", "/api/process-video", "/api/test"];

#[derive(Serialize)]
pub struct TestResponse {
    pub message: String,
    pub version: String,
    pub endpoints: Vec<String>,
}

/// `GET /`
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// `GET /api/test`
pub async fn api_test() -> Json<TestResponse> {
    Json(TestResponse {
        message: "vcut API is working".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints: ENDPOINTS.iter().map(|e| e.to_string()).collect(),
    })
}

/// Fallback for unmatched routes; reports the path with its query string.
pub async fn not_found(uri: Uri) -> ApiError {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    ApiError::NotFound(path.to_string())
}
