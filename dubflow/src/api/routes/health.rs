//! Health check routes.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::pipeline::QueueStats;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub queue: QueueStats,
}

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health_check))
}

/// Reports uptime and queue depth; fails when the database is unreachable.
async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let queue = state.job_queue.get_stats().await?;
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        queue,
    }))
}
