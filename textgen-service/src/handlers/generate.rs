use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use textgen_engine::GenerationRequest;
use tracing::{info, instrument};

use crate::{
    error::{ErrorResponse, ServiceError},
    handlers::{json_payload, parse_request},
    server::AppState,
    streamer::Streamer,
    types::{GenerateRequest, GenerateResponse},
};

pub const GENERATE_PATH: &str = "/generate";

/// Content type of streamed generations
const STREAM_CONTENT_TYPE: &str = "application/octet-stream";

/// Handles text generation requests.
///
/// Fields other than `prompt`, `max_new_tokens` and `streaming` are forwarded
/// to the engine as sampling parameters. With `streaming` set, the response
/// body is a sequence of JSON-encoded fragments, each terminated by a NUL
/// byte, in generation order. Otherwise the handler waits for completion and
/// returns the full text.
///
/// # Errors
///
/// - `400 Bad Request` if the body is malformed or `max_new_tokens` is zero
/// - `503 Service Unavailable` if no engine is attached
/// - `500 Internal Server Error` if the engine rejects or fails the request
#[utoipa::path(
    post,
    path = "/generate",
    tag = "generate",
    request_body = GenerateRequest,
    responses(
        (status = OK, description = "Full text, or NUL-terminated JSON string fragments when streaming", content(
            (GenerateResponse = "application/json"),
            ("application/octet-stream")
        )),
        (status = BAD_REQUEST, description = "Invalid request body", body = ErrorResponse),
        (status = SERVICE_UNAVAILABLE, description = "Engine not initialized", body = ErrorResponse),
        (status = INTERNAL_SERVER_ERROR, description = "Generation failed", body = ErrorResponse)
    )
)]
#[instrument(level = "info", skip(state, payload), fields(path = GENERATE_PATH))]
pub async fn generate_handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ServiceError> {
    let payload = json_payload(payload, GENERATE_PATH)?;
    let GenerateRequest {
        prompt,
        max_new_tokens,
        streaming,
        sampling_params,
    } = parse_request(payload, GENERATE_PATH)?;
    let engine = state.engine(GENERATE_PATH)?;

    let request = GenerationRequest::new(prompt, max_new_tokens)
        .with_streaming(streaming)
        .with_sampling_params(sampling_params);
    let handle = engine
        .generate_async(request)
        .map_err(|source| ServiceError::ModelError {
            source,
            endpoint: GENERATE_PATH.to_string(),
        })?;

    info!(
        target = "textgen-service",
        event = "generation_started",
        request_id = handle.request_id(),
        max_new_tokens,
        streaming,
    );

    if streaming {
        let body = Body::from_stream(Streamer::new(handle, GENERATE_PATH));
        return Ok(([(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)], body).into_response());
    }

    let output = handle
        .await_completion()
        .await
        .map_err(|source| ServiceError::ModelError {
            source,
            endpoint: GENERATE_PATH.to_string(),
        })?;
    info!(
        target = "textgen-service",
        event = "generation_completed",
        prompt_tokens = output.prompt_tokens,
        completion_tokens = output.completion_tokens,
        finish_reason = ?output.finish_reason,
    );

    Ok(Json(GenerateResponse { text: output.text }).into_response())
}
