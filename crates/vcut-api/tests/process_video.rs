//! Router-level tests for the processing endpoint, with a fake engine and a
//! manually driven cleanup clock.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use vcut_api::{create_router, ApiConfig, AppState, ManualScheduler};
use vcut_media::{
    ensure_working_directories, EngineEvent, EventSender, FilterSpec, MediaError, MediaResult,
    VideoEngine, WorkingDirs,
};

const BOUNDARY: &str = "vcut-test-boundary";
const RENDERED: &[u8] = b"fake mp4 bytes";

#[derive(Default)]
struct FakeEngine {
    fail: bool,
    calls: AtomicUsize,
    fast_path: Mutex<Vec<bool>>,
}

impl FakeEngine {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoEngine for FakeEngine {
    async fn run(
        &self,
        _input: &Path,
        output: &Path,
        spec: &FilterSpec,
        events: EventSender,
    ) -> MediaResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.fast_path.lock().unwrap().push(spec.is_fast_path());
        let _ = events.send(EngineEvent::Started {
            command_line: "ffmpeg -i input output".to_string(),
        });

        if self.fail {
            tokio::fs::write(output, b"partial").await?;
            let _ = events.send(EngineEvent::Failed {
                message: "exit status 1".to_string(),
            });
            return Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with status 1",
                Some("moov atom not found".to_string()),
                Some(1),
            ));
        }

        tokio::fs::write(output, RENDERED).await?;
        let _ = events.send(EngineEvent::Completed);
        Ok(())
    }
}

struct TestApp {
    _dir: TempDir,
    dirs: WorkingDirs,
    scheduler: Arc<ManualScheduler>,
    engine: Arc<FakeEngine>,
    router: Router,
}

impl TestApp {
    async fn new(engine: FakeEngine) -> Self {
        Self::with_config(engine, |_| {}).await
    }

    async fn with_config(engine: FakeEngine, tweak: impl FnOnce(&mut ApiConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let dirs = ensure_working_directories(dir.path()).await.unwrap();

        let mut config = ApiConfig {
            work_dir: dir.path().to_path_buf(),
            max_upload_bytes: 1024,
            ..ApiConfig::default()
        };
        tweak(&mut config);

        let engine = Arc::new(engine);
        let scheduler = Arc::new(ManualScheduler::new());
        let state = AppState::with_parts(config, dirs.clone(), engine.clone(), scheduler.clone());

        Self {
            _dir: dir,
            dirs,
            scheduler,
            engine,
            router: create_router(state, None),
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn upload(&self, video: Option<(&str, &[u8])>, segments: Option<&str>) -> Response {
        self.send(upload_request(video, segments)).await
    }
}

fn multipart_body(video: Option<(&str, &[u8])>, segments: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some((content_type, bytes)) = video {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"video\"; filename=\"clip.mp4\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    if let Some(segments) = segments {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"segments\"\r\n\r\n{segments}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(video: Option<(&str, &[u8])>, segments: Option<&str>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/process-video")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(video, segments)))
        .unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect()
}

const ONE_SEGMENT: &str = r#"[{"start":0,"end":5}]"#;
const TWO_SEGMENTS: &str = r#"[{"start":0,"end":5},{"start":10,"end":15}]"#;

#[tokio::test]
async fn missing_video_is_rejected() {
    let app = TestApp::new(FakeEngine::default()).await;

    let response = app.upload(None, Some(ONE_SEGMENT)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "No video file provided");
    assert_eq!(app.engine.calls(), 0);
}

#[tokio::test]
async fn invalid_segments_never_reach_engine() {
    let app = TestApp::new(FakeEngine::default()).await;

    for segments in [
        Some(r#"[{"start":5,"end":2}]"#),
        Some("[]"),
        Some("not json"),
        Some(r#"{"start":0,"end":5}"#),
        None,
    ] {
        let response = app.upload(Some(("video/mp4", b"source")), segments).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{:?}", segments);
        let body = json_body(response).await;
        assert!(body["error"].is_string());
        assert!(body["details"].is_string());
    }
    assert_eq!(app.engine.calls(), 0);

    // Rejected uploads go after the short grace window
    assert_eq!(app.scheduler.pending_count(), 5);
    assert!(app
        .scheduler
        .pending_delays()
        .iter()
        .all(|d| *d == Duration::from_secs(5)));
    app.scheduler.advance(Duration::from_secs(5)).await;
    assert!(files_in(&app.dirs.uploads).is_empty());
    assert!(files_in(&app.dirs.processed).is_empty());
}

#[tokio::test]
async fn oversized_upload_returns_413() {
    let app = TestApp::new(FakeEngine::default()).await;

    let big = vec![0u8; 4096];
    let response = app.upload(Some(("video/mp4", &big)), Some(ONE_SEGMENT)).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await;
    assert_eq!(body["error"], "File too large");

    assert_eq!(app.engine.calls(), 0);
    assert!(files_in(&app.dirs.uploads).is_empty());
}

#[tokio::test]
async fn declared_length_over_limit_returns_413() {
    let app = TestApp::new(FakeEngine::default()).await;

    let mut request = upload_request(Some(("video/mp4", b"source")), Some(ONE_SEGMENT));
    request
        .headers_mut()
        .insert(header::CONTENT_LENGTH, "10000000000".parse().unwrap());

    let response = app.send(request).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(app.engine.calls(), 0);
}

#[tokio::test]
async fn unsupported_type_is_rejected_and_removed() {
    let app = TestApp::new(FakeEngine::default()).await;

    let response = app
        .upload(Some(("application/pdf", b"%PDF")), Some(ONE_SEGMENT))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Unsupported file type");

    assert_eq!(app.engine.calls(), 0);
    assert!(files_in(&app.dirs.uploads).is_empty());
}

#[tokio::test]
async fn success_streams_video_and_defers_cleanup() {
    let app = TestApp::new(FakeEngine::default()).await;

    let response = app
        .upload(Some(("video/mp4", b"source")), Some(TWO_SEGMENTS))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        headers[header::CONTENT_LENGTH],
        RENDERED.len().to_string().as_str()
    );
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename=\"processed-"));
    assert!(disposition.ends_with(".mp4\""));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], RENDERED);
    assert_eq!(*app.engine.fast_path.lock().unwrap(), vec![false]);

    // Both files are still there right after the response
    assert_eq!(files_in(&app.dirs.uploads).len(), 1);
    assert_eq!(files_in(&app.dirs.processed).len(), 1);
    assert_eq!(app.scheduler.pending_delays(), vec![Duration::from_secs(300)]);

    app.scheduler.advance(Duration::from_secs(60)).await;
    assert_eq!(files_in(&app.dirs.uploads).len(), 1);
    assert_eq!(files_in(&app.dirs.processed).len(), 1);

    app.scheduler.advance(Duration::from_secs(240)).await;
    assert!(files_in(&app.dirs.uploads).is_empty());
    assert!(files_in(&app.dirs.processed).is_empty());
}

#[tokio::test]
async fn single_segment_takes_fast_path() {
    let app = TestApp::new(FakeEngine::default()).await;

    let response = app
        .upload(Some(("video/quicktime", b"source")), Some(ONE_SEGMENT))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(*app.engine.fast_path.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn malformed_entries_are_dropped_not_fatal() {
    let app = TestApp::new(FakeEngine::default()).await;

    let segments = r#"[{"start":"0","end":5},{"start":-1,"end":3},{"start":2,"end":6}]"#;
    let response = app.upload(Some(("video/mp4", b"source")), Some(segments)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(*app.engine.fast_path.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn engine_failure_returns_500_and_cleans_up_quickly() {
    let app = TestApp::new(FakeEngine::failing()).await;

    let response = app
        .upload(Some(("video/mp4", b"source")), Some(TWO_SEGMENTS))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Video processing error");
    assert!(body["processingTime"].is_string());

    assert_eq!(app.engine.calls(), 1);
    assert_eq!(app.scheduler.pending_delays(), vec![Duration::from_secs(5)]);

    app.scheduler.advance(Duration::from_secs(5)).await;
    assert!(files_in(&app.dirs.uploads).is_empty());
    assert!(files_in(&app.dirs.processed).is_empty());
}

#[tokio::test]
async fn engine_failure_details_hidden_in_production() {
    let app = TestApp::with_config(FakeEngine::failing(), |config| {
        config.environment = "production".to_string();
    })
    .await;

    let response = app
        .upload(Some(("video/mp4", b"source")), Some(TWO_SEGMENTS))
        .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Video processing error");
    assert_eq!(body["details"], "Internal error");
    assert!(body["processingTime"].is_string());

    // Client errors keep their details
    let response = app.upload(Some(("video/mp4", b"source")), None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_ne!(body["details"], "Internal error");
}

#[tokio::test]
async fn engine_failure_details_shown_in_development() {
    let app = TestApp::new(FakeEngine::failing()).await;

    let response = app
        .upload(Some(("video/mp4", b"source")), Some(TWO_SEGMENTS))
        .await;
    let body = json_body(response).await;
    assert!(body["details"]
        .as_str()
        .unwrap()
        .contains("FFmpeg exited with status 1"));
}

#[tokio::test]
async fn repeated_requests_get_distinct_outputs() {
    let app = TestApp::new(FakeEngine::default()).await;

    let mut names = Vec::new();
    for _ in 0..2 {
        let response = app
            .upload(Some(("video/mp4", b"source")), Some(ONE_SEGMENT))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        names.push(
            response.headers()[header::CONTENT_DISPOSITION]
                .to_str()
                .unwrap()
                .to_string(),
        );
        let _ = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    }

    assert_ne!(names[0], names[1]);
    assert_eq!(files_in(&app.dirs.processed).len(), 2);
    assert_eq!(files_in(&app.dirs.uploads).len(), 2);
}

#[tokio::test]
async fn unknown_route_returns_404_with_path() {
    let app = TestApp::new(FakeEngine::default()).await;

    let response = app
        .send(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"], "Route not found");
    assert_eq!(body["path"], "/nope");

    let response = app
        .send(
            Request::builder()
                .uri("/nope?page=2&q=x")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    let body = json_body(response).await;
    assert_eq!(body["path"], "/nope?page=2&q=x");
}

#[tokio::test]
async fn health_reports_status() {
    let app = TestApp::new(FakeEngine::default()).await;

    let response = app
        .send(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");

    let body = json_body(response).await;
    assert_eq!(body["status"], "OK");
    assert!(body["uptime"].is_u64());
    assert!(body["memory"]["rss"].as_str().unwrap().ends_with(" MB"));
    assert!(body["timestamp"].is_string());
    assert!(body["environment"].is_string());
}

#[tokio::test]
async fn api_test_lists_endpoints() {
    let app = TestApp::new(FakeEngine::default()).await;

    let response = app
        .send(Request::builder().uri("/api/test").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let endpoints: Vec<&str> = body["endpoints"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(endpoints.contains(&"/api/process-video"));
    assert!(endpoints.contains(&"/health"));
}

fn api_test_from(peer: &str, forwarded: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/api/test");
    if let Some(forwarded) = forwarded {
        builder = builder.header("X-Forwarded-For", forwarded);
    }
    let mut request = builder.body(Body::empty()).unwrap();
    let peer: SocketAddr = peer.parse().unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
    request
}

#[tokio::test]
async fn api_routes_are_rate_limited_per_client() {
    let app = TestApp::with_config(FakeEngine::default(), |config| {
        config.rate_limit_max = 2;
    })
    .await;

    for _ in 0..2 {
        let response = app.send(api_test_from("198.51.100.4:40000", None)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.send(api_test_from("198.51.100.4:40001", None)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(response).await;
    assert!(body["error"].is_string());

    let response = app.send(api_test_from("198.51.100.5:40000", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn forwarded_header_does_not_reset_budget() {
    let app = TestApp::with_config(FakeEngine::default(), |config| {
        config.rate_limit_max = 2;
    })
    .await;

    let mut accepted = 0;
    for i in 0..20 {
        let forwarded = format!("10.0.0.{}", i);
        let response = app
            .send(api_test_from("198.51.100.4:40000", Some(&forwarded)))
            .await;
        if response.status() == StatusCode::OK {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 2);
}

#[tokio::test]
async fn forwarded_header_honoured_behind_trusted_proxy() {
    let app = TestApp::with_config(FakeEngine::default(), |config| {
        config.rate_limit_max = 1;
        config.trust_proxy = true;
    })
    .await;

    let proxy = "192.0.2.1:443";
    let response = app.send(api_test_from(proxy, Some("203.0.113.1"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.send(api_test_from(proxy, Some("203.0.113.1"))).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = app.send(api_test_from(proxy, Some("203.0.113.2"))).await;
    assert_eq!(response.status(), StatusCode::OK);
}
