//! Local health HTTP surface exposing sidecar sync state over `/health`,
//! `/metrics`, and `/status`.

use alertagent_core::sidecar::{SidecarState, SyncPhase};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SharedState = Arc<Mutex<SidecarState>>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(health_ready))
        .route("/health/live", get(health_live))
        .route("/metrics", get(metrics))
        .route("/status", get(status))
        .with_state(state)
}

#[derive(Serialize)]
struct StatusBody {
    phase: &'static str,
    last_sync: Option<chrono::DateTime<chrono::Utc>>,
    last_error: Option<String>,
    sync_count: u64,
    error_count: u64,
    uptime_secs: i64,
    config_hash: Option<String>,
    config_size: usize,
    success_rate: f64,
}

fn phase_name(phase: SyncPhase) -> &'static str {
    match phase {
        SyncPhase::Idle => "idle",
        SyncPhase::Syncing => "syncing",
        SyncPhase::Success => "success",
        SyncPhase::Error => "error",
    }
}

fn body_for(state: &SidecarState) -> StatusBody {
    StatusBody {
        phase: phase_name(state.phase),
        last_sync: state.last_sync,
        last_error: state.last_error.clone(),
        sync_count: state.sync_count,
        error_count: state.error_count,
        uptime_secs: state.uptime_secs(),
        config_hash: state.last_hash.clone(),
        config_size: state.config_size,
        success_rate: state.success_rate(),
    }
}

async fn health(State(state): State<SharedState>) -> (StatusCode, Json<StatusBody>) {
    let guard = state.lock().await;
    let code = if guard.is_healthy() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body_for(&guard)))
}

async fn health_ready(State(state): State<SharedState>) -> StatusCode {
    let guard = state.lock().await;
    if guard.is_ready() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE }
}

async fn health_live() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<SharedState>) -> Json<StatusBody> {
    let guard = state.lock().await;
    Json(body_for(&guard))
}

async fn status(State(state): State<SharedState>) -> Json<StatusBody> {
    let guard = state.lock().await;
    Json(body_for(&guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idle_state_reports_healthy_and_ready() {
        let state: SharedState = Arc::new(Mutex::new(SidecarState::default()));
        let guard = state.lock().await;
        assert!(guard.is_healthy());
        assert!(guard.is_ready());
    }

    #[tokio::test]
    async fn error_phase_is_unhealthy_and_not_ready() {
        let state: SharedState = Arc::new(Mutex::new(SidecarState::default()));
        {
            let mut guard = state.lock().await;
            guard.begin_sync();
            guard.complete_error("reload failed");
        }
        let guard = state.lock().await;
        assert!(!guard.is_healthy());
        assert!(!guard.is_ready());
    }
}
