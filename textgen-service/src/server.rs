use std::{sync::Arc, time::Duration};

use axum::{
    http::{StatusCode, Uri},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo, TokioTimer},
    server::{conn::auto::Builder, graceful::GracefulShutdown},
    service::TowerToHyperService,
};
use textgen_engine::GenerationEngine;
use tokio::{net::TcpListener, sync::watch::Receiver};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::{
    error::ServiceError,
    handlers::{
        chat_completions::{chat_completions_handler, CHAT_COMPLETIONS_PATH},
        generate::{generate_handler, GENERATE_PATH},
        models::{models_handler, MODELS_PATH},
        openapi::openapi_routes,
        stats::{stats_handler, STATS_PATH},
    },
};

pub const HEALTH_PATH: &str = "/health";

/// Represents the shared state of the application.
///
/// Every handler receives the state explicitly. The engine is optional so
/// that a router can be built before, or without, a loaded engine: handlers
/// needing it answer `503 Service Unavailable` in that case.
#[derive(Clone)]
pub struct AppState {
    /// The generation engine serving every request.
    engine: Option<Arc<dyn GenerationEngine>>,
}

impl AppState {
    pub fn new(engine: Arc<dyn GenerationEngine>) -> Self {
        Self {
            engine: Some(engine),
        }
    }

    /// Creates a state with no engine attached
    pub fn without_engine() -> Self {
        Self { engine: None }
    }

    /// Returns the engine, or [`ServiceError::EngineUnavailable`] if none is attached.
    pub fn engine(&self, endpoint: &str) -> Result<&Arc<dyn GenerationEngine>, ServiceError> {
        self.engine
            .as_ref()
            .ok_or_else(|| ServiceError::EngineUnavailable {
                endpoint: endpoint.to_string(),
            })
    }
}

/// Creates and configures the main router for the application.
///
/// # Arguments
///
/// * `app_state` - The shared application state holding the generation engine.
///
/// # Returns
///
/// Returns a configured `Router` instance. Requests matching no route, or a
/// known path with another method, get a structured `404 Not Found` error.
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route(GENERATE_PATH, post(generate_handler))
        .route(CHAT_COMPLETIONS_PATH, post(chat_completions_handler))
        .route(MODELS_PATH, get(models_handler))
        .route(STATS_PATH, get(stats_handler))
        .route(HEALTH_PATH, get(health))
        .fallback(not_found)
        .method_not_allowed_fallback(not_found)
        .with_state(app_state)
        .merge(openapi_routes())
        .layer(TraceLayer::new_for_http())
}

/// Starts and runs the HTTP server with graceful shutdown handling.
///
/// Connections are served by hyper directly so that idle keep-alive
/// connections are closed once `keep_alive_timeout` elapses without a new
/// request head. Once the shutdown signal is received new connections are
/// refused and in-flight requests are allowed to finish.
///
/// # Arguments
///
/// * `app_state` - The shared application state
/// * `tcp_listener` - A bound TCP listener the server accepts connections on
/// * `keep_alive_timeout` - How long an idle connection waits for its next request
/// * `shutdown_receiver` - A channel receiver signaling the server to stop
///
/// # Errors
///
/// Currently never fails: accept and connection errors are logged and the
/// server keeps running.
pub async fn run_server(
    app_state: AppState,
    tcp_listener: TcpListener,
    keep_alive_timeout: Duration,
    mut shutdown_receiver: Receiver<bool>,
) -> anyhow::Result<()> {
    let app = create_router(app_state);
    let mut builder = Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .keep_alive(true)
        .header_read_timeout(keep_alive_timeout);
    let graceful = GracefulShutdown::new();

    loop {
        tokio::select! {
            accept_result = tcp_listener.accept() => {
                let (stream, remote_addr) = match accept_result {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(
                            target = "textgen-service",
                            event = "accept_failed",
                            error = %e,
                            "Failed to accept connection"
                        );
                        continue;
                    }
                };
                let hyper_service = TowerToHyperService::new(app.clone());
                let connection = builder
                    .serve_connection_with_upgrades(TokioIo::new(stream), hyper_service)
                    .into_owned();
                let connection = graceful.watch(connection);
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        debug!(
                            target = "textgen-service",
                            event = "connection_closed",
                            %remote_addr,
                            error = %e,
                        );
                    }
                });
            }
            result = shutdown_receiver.changed() => {
                if result.is_err() {
                    info!(
                        target = "textgen-service",
                        event = "shutdown_sender_dropped",
                        "Shutdown sender dropped, stopping server"
                    );
                }
                break;
            }
        }
    }

    drop(tcp_listener);
    graceful.shutdown().await;
    info!(
        target = "textgen-service",
        event = "server_stopped",
        "Server stopped gracefully"
    );
    Ok(())
}

/// Handles the health check endpoint.
///
/// Always answers `200 OK` with an empty body, whether or not an engine is
/// attached.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Service is running")
    )
)]
pub async fn health() -> impl IntoResponse {
    StatusCode::OK
}

/// Answers every request matching no route.
async fn not_found(uri: Uri) -> ServiceError {
    ServiceError::NotFound {
        endpoint: uri.path().to_string(),
    }
}
