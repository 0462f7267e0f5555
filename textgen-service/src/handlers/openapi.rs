use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

use crate::{
    error::{ErrorDetails, ErrorResponse},
    handlers::{chat_completions, generate, models, stats},
    server,
    types::{
        ChatCompletionChoice, ChatCompletionMessage, ChatCompletionsRequest,
        ChatCompletionsResponse, ChatMessage, GenerateRequest, GenerateResponse, ModelCard,
        ModelList, Role, UnsupportedFeatureResponse, Usage,
    },
};

pub const OPENAPI_PATH: &str = "/api-docs/openapi.json";

#[derive(OpenApi)]
#[openapi(
    paths(
        server::health,
        stats::stats_handler,
        models::models_handler,
        generate::generate_handler,
        chat_completions::chat_completions_handler,
    ),
    components(schemas(
        ErrorResponse,
        ErrorDetails,
        GenerateRequest,
        GenerateResponse,
        Role,
        ChatMessage,
        ChatCompletionsRequest,
        ChatCompletionsResponse,
        ChatCompletionChoice,
        ChatCompletionMessage,
        Usage,
        UnsupportedFeatureResponse,
        ModelCard,
        ModelList,
    )),
    tags(
        (name = "health", description = "Health check"),
        (name = "stats", description = "Engine statistics"),
        (name = "models", description = "Served models"),
        (name = "generate", description = "Text generation"),
        (name = "chat", description = "Chat completions"),
    )
)]
pub struct ApiDoc;

/// Routes serving the OpenAPI document of the service
pub fn openapi_routes() -> Router {
    Router::new().route(OPENAPI_PATH, get(|| async { Json(ApiDoc::openapi()) }))
}
