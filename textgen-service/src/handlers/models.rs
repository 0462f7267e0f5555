use axum::Json;
use tracing::instrument;

use crate::types::{ModelCard, ModelList};

pub const MODELS_PATH: &str = "/v1/models";

/// Identifier of the single model served
pub const DEFAULT_MODEL_ID: &str = "default";
const MODEL_CREATED: i64 = 1_686_935_002;
const MODEL_OWNER: &str = "TensorRT-LLM";

/// Lists the models served. The listing is constant.
#[utoipa::path(
    get,
    path = "/v1/models",
    tag = "models",
    responses(
        (status = OK, description = "Available models", body = ModelList)
    )
)]
#[instrument(level = "info", fields(path = MODELS_PATH))]
pub async fn models_handler() -> Json<ModelList> {
    Json(ModelList {
        object: "list".to_string(),
        data: vec![ModelCard {
            id: DEFAULT_MODEL_ID.to_string(),
            object: "model".to_string(),
            created: MODEL_CREATED,
            owned_by: MODEL_OWNER.to_string(),
        }],
    })
}
