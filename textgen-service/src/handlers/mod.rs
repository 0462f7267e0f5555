pub mod chat_completions;
pub mod generate;
pub mod models;
pub mod openapi;
pub mod stats;

use axum::{extract::rejection::JsonRejection, Json};
use serde::de::DeserializeOwned;
use serde_json::Value;
use validator::Validate;

use crate::error::ServiceError;

/// Unwraps the raw JSON body of a request.
///
/// Bodies are extracted as a [`Value`] so that malformed or mistyped payloads
/// share the structured `INVALID_BODY` error instead of axum's plain-text
/// rejections.
pub(crate) fn json_payload(
    payload: Result<Json<Value>, JsonRejection>,
    endpoint: &str,
) -> Result<Value, ServiceError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ServiceError::InvalidBody {
            message: rejection.body_text(),
            endpoint: endpoint.to_string(),
        })
}

/// Deserializes and validates a request body.
pub(crate) fn parse_request<T>(payload: Value, endpoint: &str) -> Result<T, ServiceError>
where
    T: DeserializeOwned + Validate,
{
    let request: T = serde_json::from_value(payload).map_err(|e| ServiceError::InvalidBody {
        message: e.to_string(),
        endpoint: endpoint.to_string(),
    })?;
    request.validate().map_err(|e| ServiceError::InvalidBody {
        message: e.to_string(),
        endpoint: endpoint.to_string(),
    })?;
    Ok(request)
}
