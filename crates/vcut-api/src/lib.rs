//! Axum HTTP API server for video segment cutting.
//!
//! This crate provides:
//! - Multipart upload intake with size and type limits
//! - The per-request job lifecycle with exactly-once file cleanup
//! - Rate limiting and security headers
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use services::{JobRunner, ManualScheduler, RetentionPolicy, Scheduler, TokioScheduler};
pub use state::AppState;
