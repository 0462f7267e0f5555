use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use textgen_engine::EngineError;
use thiserror::Error;
use utoipa::ToSchema;

/// Response structure for API errors
///
/// Wraps [`ErrorDetails`] in an `error` field, so every failure serializes
/// as `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Details of an API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetails {
    /// A machine-readable error code string (e.g., "INVALID_BODY", "ENGINE_ERROR")
    pub code: String,
    /// A human-readable error message describing what went wrong
    pub message: String,
}

/// Represents all possible errors that can occur while serving a request
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Error returned when the request body is malformed or contains invalid data
    #[error("Invalid request body: {message}")]
    InvalidBody {
        /// Description of why the request body is invalid
        message: String,
        /// The endpoint that the error occurred on
        endpoint: String,
    },

    /// Error returned when no route matches the request
    #[error("No route for `{endpoint}`")]
    NotFound { endpoint: String },

    /// Error returned when a handler requiring the engine runs without one
    #[error("Generation engine is not initialized")]
    EngineUnavailable { endpoint: String },

    /// Error returned when the generation engine fails on a request
    #[error("Engine error: {source}")]
    ModelError {
        #[source]
        source: EngineError,
        /// The endpoint that the error occurred on
        endpoint: String,
    },

    /// Error returned for unexpected internal server errors
    #[error("Internal server error: {message}")]
    InternalError {
        /// Description of the internal error
        message: String,
        /// The endpoint that the error occurred on
        endpoint: String,
    },
}

impl ServiceError {
    /// Returns the machine-readable error code for this error type
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidBody { .. } => "INVALID_BODY",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::EngineUnavailable { .. } => "ENGINE_UNAVAILABLE",
            Self::ModelError { .. } => "ENGINE_ERROR",
            Self::InternalError { .. } => "INTERNAL_ERROR",
        }
    }

    /// Returns the message sent to clients.
    ///
    /// Engine and internal failures are reported generically, their details
    /// only reach the logs.
    fn client_message(&self) -> String {
        match self {
            Self::InvalidBody { message, .. } => format!("Invalid request body: {message}"),
            Self::NotFound { endpoint } => format!("No route for `{endpoint}`"),
            Self::EngineUnavailable { .. } => "Generation engine is not initialized".to_string(),
            Self::ModelError { .. } => "Generation failed".to_string(),
            Self::InternalError { .. } => "Internal server error occurred".to_string(),
        }
    }

    /// Returns the HTTP status code associated with this error
    ///
    /// - `400 Bad Request` for invalid request bodies
    /// - `404 Not Found` for unmatched routes
    /// - `503 Service Unavailable` when the engine is missing
    /// - `500 Internal Server Error` for engine and unexpected failures
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::EngineUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::ModelError { .. } | Self::InternalError { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the endpoint where the error occurred
    fn endpoint(&self) -> &str {
        match self {
            Self::InvalidBody { endpoint, .. }
            | Self::NotFound { endpoint }
            | Self::EngineUnavailable { endpoint }
            | Self::ModelError { endpoint, .. }
            | Self::InternalError { endpoint, .. } => endpoint,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        tracing::error!(
            target = "textgen-service",
            event = "error_occurred",
            endpoint = self.endpoint(),
            error = %self,
        );
        let error_response = ErrorResponse {
            error: ErrorDetails {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };
        (self.status_code(), Json(error_response)).into_response()
    }
}
