//! Runtime log filter routes.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::logging::LoggingConfig;

/// Request to update the log filter.
#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}

#[derive(Debug, Serialize)]
pub struct LogFilterResponse {
    pub filter: String,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/filter", get(get_log_filter).put(update_log_filter))
}

fn logging_config(state: &AppState) -> ApiResult<&LoggingConfig> {
    state
        .logging_config
        .as_deref()
        .ok_or_else(|| ApiError::internal("Logging configuration not available"))
}

async fn get_log_filter(State(state): State<AppState>) -> ApiResult<Json<LogFilterResponse>> {
    let filter = logging_config(&state)?.get_filter();
    Ok(Json(LogFilterResponse { filter }))
}

/// Swap the active filter directive, e.g. `dubflow=debug,sqlx=warn`.
async fn update_log_filter(
    State(state): State<AppState>,
    Json(request): Json<UpdateLogFilterRequest>,
) -> ApiResult<Json<LogFilterResponse>> {
    let config = logging_config(&state)?;
    config
        .set_filter(request.filter.trim())
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    Ok(Json(LogFilterResponse {
        filter: config.get_filter(),
    }))
}
