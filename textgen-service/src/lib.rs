pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod streamer;
pub mod telemetry;
pub mod types;


use anyhow::{Context, Result};
use tokio::sync::watch;

pub use config::{ConfigOverrides, TextgenServiceConfig};
pub use server::{create_router, run_server, AppState};

/// Spawns `task`, signaling shutdown to the rest of the process if it fails.
///
/// The error is logged before the signal is sent, and then returned through
/// the `JoinHandle`.
pub fn spawn_with_shutdown<F>(
    name: &'static str,
    task: F,
    shutdown_sender: watch::Sender<bool>,
) -> tokio::task::JoinHandle<Result<()>>
where
    F: std::future::Future<Output = Result<()>> + Send + 'static,
{
    tokio::task::spawn(async move {
        let result = task.await;
        if let Err(e) = &result {
            tracing::error!(
                target = "textgen-service",
                event = "task_failed",
                task = name,
                error = %e,
                "Task failed, shutting down"
            );
            shutdown_sender
                .send(true)
                .with_context(|| format!("Failed to send shutdown signal from {name}"))?;
        }
        result
    })
}
