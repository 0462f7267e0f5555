use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use validator::Validate;

/// Body of a `POST /generate` request.
#[derive(Debug, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
pub struct GenerateRequest {
    /// The prompt to use for the generation
    pub prompt: String,

    /// Maximum number of tokens to generate, at least one
    #[validate(range(min = 1))]
    pub max_new_tokens: u32,

    /// Whether to stream the results as NUL-terminated JSON fragments
    #[serde(default)]
    pub streaming: bool,

    /// Every other field is a sampling parameter, forwarded verbatim to the engine
    #[serde(flatten)]
    #[schema(ignore)]
    pub sampling_params: Map<String, Value>,
}

/// Body of a non-streaming `POST /generate` response.
#[derive(Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct GenerateResponse {
    /// The full generated text
    pub text: String,
}

/// The author of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    /// Any other role (`system`, `tool`, ...), left out of the prompt
    #[serde(other)]
    Other,
}

/// A single message of a chat conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Returns whether a JSON value counts as set: `null`, `false`, `0`, and
/// empty strings, arrays and objects do not, every other value does.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

fn deserialize_truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(|value| is_truthy(&value))
}

/// Body of a `POST /v1/chat/completions` request.
///
/// The `streaming` flag is read separately, before the rest of the body is
/// validated, and accepts any JSON value: see [`is_truthy`].
#[derive(Debug, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
pub struct ChatCompletionsRequest {
    /// The conversation so far, in order
    pub messages: Vec<ChatMessage>,

    /// Maximum number of tokens to generate, at least one
    #[validate(range(min = 1))]
    pub max_tokens: u32,

    /// Streaming is not supported for chat completions
    #[serde(default, deserialize_with = "deserialize_truthy")]
    pub streaming: bool,
}

/// The message generated by the assistant.
#[derive(Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionMessage {
    pub content: String,
    pub role: Role,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionChoice {
    pub finish_reason: String,
    pub index: u32,
    pub message: ChatCompletionMessage,
}

/// Token usage of a chat completion.
#[derive(Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Usage {
    pub completion_tokens: usize,
    pub prompt_tokens: usize,
    pub total_tokens: usize,
}

/// Body of a `POST /v1/chat/completions` response.
#[derive(Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChatCompletionsResponse {
    pub id: String,
    pub object: String,
    /// Unix timestamp, in seconds, of the response creation
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: Usage,
}

/// A 200 response body reporting a feature the server does not implement.
#[derive(Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct UnsupportedFeatureResponse {
    pub error: String,
}

/// An entry of the `/v1/models` listing.
#[derive(Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

/// Body of the `/v1/models` response.
#[derive(Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelCard>,
}
