use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::Value;
use textgen_engine::GenerationRequest;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    error::{ErrorResponse, ServiceError},
    handlers::{json_payload, parse_request, models::DEFAULT_MODEL_ID},
    server::AppState,
    types::{
        is_truthy, ChatCompletionChoice, ChatCompletionMessage, ChatCompletionsRequest,
        ChatCompletionsResponse, ChatMessage, Role, UnsupportedFeatureResponse, Usage,
    },
};

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Key of the streaming flag in the request body
const STREAMING_KEY: &str = "streaming";
const STREAMING_UNSUPPORTED: &str = "streaming is not yet supported!";
const CHAT_COMPLETION_OBJECT: &str = "chat.completion";
const FINISH_REASON_STOP: &str = "stop";

/// Opens every chat prompt
const PROMPT_START: &str = "<s> ";

/// Builds the engine prompt for a conversation.
///
/// User turns are wrapped as `[INST] {content} [/INST] `, assistant turns as
/// `{content} </s> `. Messages with any other role are left out.
pub fn build_chat_prompt(messages: &[ChatMessage]) -> String {
    let mut prompt = String::from(PROMPT_START);
    for (index, message) in messages.iter().enumerate() {
        match message.role {
            Role::User => {
                prompt.push_str("[INST] ");
                prompt.push_str(&message.content);
                prompt.push_str(" [/INST] ");
            }
            Role::Assistant => {
                prompt.push_str(&message.content);
                prompt.push_str(" </s> ");
            }
            Role::Other => {
                warn!(
                    target = "textgen-service",
                    event = "chat_message_skipped",
                    message_index = index,
                    "Skipping chat message with unsupported role"
                );
            }
        }
    }
    prompt
}

/// Handles chat completion requests.
///
/// The conversation is rendered into a single prompt and generated without
/// streaming. Requests asking for streaming get a `200 OK` answer carrying an
/// `error` field, without reaching the engine.
///
/// # Errors
///
/// - `400 Bad Request` if the body is malformed or `max_tokens` is zero
/// - `503 Service Unavailable` if no engine is attached
/// - `500 Internal Server Error` if the engine rejects or fails the request
#[utoipa::path(
    post,
    path = "/v1/chat/completions",
    tag = "chat",
    request_body = ChatCompletionsRequest,
    responses(
        (status = OK, description = "Chat completion, or an `error` field when streaming was requested", content(
            (ChatCompletionsResponse = "application/json"),
            (UnsupportedFeatureResponse = "application/json")
        )),
        (status = BAD_REQUEST, description = "Invalid request body", body = ErrorResponse),
        (status = SERVICE_UNAVAILABLE, description = "Engine not initialized", body = ErrorResponse),
        (status = INTERNAL_SERVER_ERROR, description = "Generation failed", body = ErrorResponse)
    )
)]
#[instrument(level = "info", skip(state, payload), fields(path = CHAT_COMPLETIONS_PATH))]
pub async fn chat_completions_handler(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Response, ServiceError> {
    let payload = json_payload(payload, CHAT_COMPLETIONS_PATH)?;
    if payload.get(STREAMING_KEY).is_some_and(is_truthy) {
        info!(
            target = "textgen-service",
            event = "chat_streaming_unsupported",
            "Streaming chat completion requested"
        );
        return Ok(Json(UnsupportedFeatureResponse {
            error: STREAMING_UNSUPPORTED.to_string(),
        })
        .into_response());
    }

    let request: ChatCompletionsRequest = parse_request(payload, CHAT_COMPLETIONS_PATH)?;
    let engine = state.engine(CHAT_COMPLETIONS_PATH)?;

    let prompt = build_chat_prompt(&request.messages);
    let handle = engine
        .generate_async(GenerationRequest::new(prompt, request.max_tokens))
        .map_err(|source| ServiceError::ModelError {
            source,
            endpoint: CHAT_COMPLETIONS_PATH.to_string(),
        })?;
    let request_id = handle.request_id();
    let output = handle
        .await_completion()
        .await
        .map_err(|source| ServiceError::ModelError {
            source,
            endpoint: CHAT_COMPLETIONS_PATH.to_string(),
        })?;

    info!(
        target = "textgen-service",
        event = "chat_completion_completed",
        request_id,
        num_messages = request.messages.len(),
        prompt_tokens = output.prompt_tokens,
        completion_tokens = output.completion_tokens,
    );

    let response = ChatCompletionsResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: CHAT_COMPLETION_OBJECT.to_string(),
        created: Utc::now().timestamp(),
        model: DEFAULT_MODEL_ID.to_string(),
        choices: vec![ChatCompletionChoice {
            finish_reason: FINISH_REASON_STOP.to_string(),
            index: 0,
            message: ChatCompletionMessage {
                content: output.text,
                role: Role::Assistant,
            },
        }],
        usage: Usage {
            completion_tokens: output.completion_tokens,
            prompt_tokens: output.prompt_tokens,
            total_tokens: output.prompt_tokens + output.completion_tokens,
        },
    };
    Ok(Json(response).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(role: Role, content: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_single_user_message() {
        let prompt = build_chat_prompt(&[message(Role::User, "Hi")]);
        assert_eq!(prompt, "<s> [INST] Hi [/INST] ");
    }

    #[test]
    fn test_user_then_assistant() {
        let prompt = build_chat_prompt(&[
            message(Role::User, "Hi"),
            message(Role::Assistant, "Hello"),
        ]);
        assert_eq!(prompt, "<s> [INST] Hi [/INST] Hello </s> ");
    }

    #[test]
    fn test_multi_turn_conversation() {
        let prompt = build_chat_prompt(&[
            message(Role::User, "Hi"),
            message(Role::Assistant, "Hello"),
            message(Role::User, "How are you?"),
        ]);
        assert_eq!(
            prompt,
            "<s> [INST] Hi [/INST] Hello </s> [INST] How are you? [/INST] "
        );
    }

    #[test]
    fn test_other_roles_are_skipped() {
        let prompt = build_chat_prompt(&[
            message(Role::Other, "You are helpful"),
            message(Role::User, "Hi"),
        ]);
        assert_eq!(prompt, "<s> [INST] Hi [/INST] ");
    }

    #[test]
    fn test_empty_conversation() {
        assert_eq!(build_chat_prompt(&[]), "<s> ");
    }

    #[test]
    fn test_unknown_role_deserializes_as_other() {
        let message: ChatMessage =
            serde_json::from_str(r#"{"role": "system", "content": "Be brief"}"#).unwrap();
        assert_eq!(message.role, Role::Other);
    }
}
