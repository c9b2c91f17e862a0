//! Health check handler.

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};

use crate::state::AppState;

/// Health response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    /// Whole seconds since startup
    pub uptime: u64,
    pub memory: MemoryUsage,
    pub environment: String,
    pub version: String,
}

/// Resident and virtual size of this process, formatted as "N MB".
#[derive(Serialize)]
pub struct MemoryUsage {
    pub rss: String,
    #[serde(rename = "virtual")]
    pub virtual_mem: String,
}

impl MemoryUsage {
    fn current() -> Self {
        let (rss, virtual_mem) = process_memory().unwrap_or((0, 0));
        Self {
            rss: format_mb(rss),
            virtual_mem: format_mb(virtual_mem),
        }
    }
}

fn process_memory() -> Option<(u64, u64)> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_memory(),
    );
    let process = system.process(pid)?;
    Some((process.memory(), process.virtual_memory()))
}

fn format_mb(bytes: u64) -> String {
    format!("{} MB", (bytes as f64 / (1024.0 * 1024.0)).round() as u64)
}

/// Health check endpoint (liveness probe).
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        uptime: state.uptime_secs(),
        memory: MemoryUsage::current(),
        environment: state.config.environment.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
