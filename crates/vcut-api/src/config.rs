//! API configuration.

use std::path::PathBuf;
use std::time::Duration;

const GIB: u64 = 1024 * 1024 * 1024;

/// Smallest accepted upload ceiling.
pub const MIN_UPLOAD_BYTES: u64 = 2 * GIB;
/// Largest accepted upload ceiling.
pub const MAX_UPLOAD_BYTES: u64 = 5 * GIB;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Upload size ceiling in bytes
    pub max_upload_bytes: u64,
    /// Requests allowed per client within `rate_limit_window`
    pub rate_limit_max: u32,
    /// Rate limit window
    pub rate_limit_window: Duration,
    /// Key the rate limiter on `X-Forwarded-For`/`X-Real-IP` instead of the
    /// socket address. Only enable behind a proxy that overwrites them.
    pub trust_proxy: bool,
    /// Environment (development/production)
    pub environment: String,
    /// Root under which uploads/, processed/ and tmp/ live
    pub work_dir: PathBuf,
    /// Delay before deleting files of a successful job
    pub cleanup_delay: Duration,
    /// Delay before deleting files of a failed job
    pub failure_cleanup_delay: Duration,
    /// Engine wall-clock limit; `None` waits indefinitely
    pub engine_timeout: Option<Duration>,
    /// FFmpeg binary name or path
    pub ffmpeg_path: String,
    /// Expose Prometheus metrics at /metrics
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            cors_origins: vec!["http://localhost:5173".to_string()],
            max_upload_bytes: MIN_UPLOAD_BYTES,
            rate_limit_max: 10,
            rate_limit_window: Duration::from_secs(15 * 60),
            trust_proxy: false,
            environment: "development".to_string(),
            work_dir: PathBuf::from("."),
            cleanup_delay: Duration::from_secs(5 * 60),
            failure_cleanup_delay: Duration::from_secs(5),
            engine_timeout: Some(Duration::from_secs(3600)),
            ffmpeg_path: "ffmpeg".to_string(),
            metrics_enabled: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("PORT")
                .or_else(|| env_parse("API_PORT"))
                .unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .or_else(|_| std::env::var("FRONTEND_URL"))
                .map(|s| parse_origins(&s))
                .unwrap_or(defaults.cors_origins),
            max_upload_bytes: clamp_upload_limit(
                env_parse("MAX_UPLOAD_BYTES").unwrap_or(defaults.max_upload_bytes),
            ),
            rate_limit_max: env_parse("RATE_LIMIT_MAX").unwrap_or(defaults.rate_limit_max),
            rate_limit_window: env_parse("RATE_LIMIT_WINDOW_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            trust_proxy: std::env::var("TRUST_PROXY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.trust_proxy),
            environment: current_environment(),
            work_dir: std::env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            cleanup_delay: env_parse("CLEANUP_DELAY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cleanup_delay),
            failure_cleanup_delay: env_parse("FAILURE_CLEANUP_DELAY_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.failure_cleanup_delay),
            engine_timeout: match env_parse::<u64>("ENGINE_TIMEOUT_SECS") {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.engine_timeout,
            },
            ffmpeg_path: std::env::var("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }

    /// Upload ceiling rendered for error messages, e.g. "2GB".
    pub fn max_upload_display(&self) -> String {
        let gib = self.max_upload_bytes as f64 / GIB as f64;
        if gib.fract() == 0.0 {
            format!("{}GB", gib as u64)
        } else {
            format!("{:.1}GB", gib)
        }
    }
}

/// Environment name from `NODE_ENV` or `ENVIRONMENT`.
fn current_environment() -> String {
    std::env::var("NODE_ENV")
        .or_else(|_| std::env::var("ENVIRONMENT"))
        .unwrap_or_else(|_| "development".to_string())
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Keep the upload ceiling within the supported 2GB..=5GB band.
pub fn clamp_upload_limit(bytes: u64) -> u64 {
    bytes.clamp(MIN_UPLOAD_BYTES, MAX_UPLOAD_BYTES)
}
