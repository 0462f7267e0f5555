use axum::{extract::State, Json};
use serde_json::Value;
use tracing::instrument;

use crate::{
    error::{ErrorResponse, ServiceError},
    server::AppState,
};

pub const STATS_PATH: &str = "/stats";

/// Returns the engine statistics.
///
/// The engine reports its statistics as a JSON document, which is returned
/// as-is.
///
/// # Errors
///
/// - `503 Service Unavailable` if no engine is attached
/// - `500 Internal Server Error` if the engine fails or reports invalid JSON
#[utoipa::path(
    get,
    path = "/stats",
    tag = "stats",
    responses(
        (status = OK, description = "Engine statistics", body = Value),
        (status = SERVICE_UNAVAILABLE, description = "Engine not initialized", body = ErrorResponse),
        (status = INTERNAL_SERVER_ERROR, description = "Failed to collect statistics", body = ErrorResponse)
    )
)]
#[instrument(level = "info", skip(state), fields(path = STATS_PATH))]
pub async fn stats_handler(State(state): State<AppState>) -> Result<Json<Value>, ServiceError> {
    let engine = state.engine(STATS_PATH)?;
    let stats = engine
        .stats()
        .await
        .map_err(|source| ServiceError::ModelError {
            source,
            endpoint: STATS_PATH.to_string(),
        })?;
    let stats = serde_json::from_str(&stats).map_err(|e| ServiceError::InternalError {
        message: format!("Engine statistics are not valid JSON: {e}"),
        endpoint: STATS_PATH.to_string(),
    })?;
    Ok(Json(stats))
}
