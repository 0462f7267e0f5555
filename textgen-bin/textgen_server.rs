use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use textgen_engine::EchoEngine;
use textgen_service::{
    run_server, spawn_with_shutdown, telemetry, AppState, ConfigOverrides, TextgenServiceConfig,
};
use tokio::{net::TcpListener, sync::watch, try_join};
use tracing::info;

/// Command line arguments of the text generation server.
#[derive(Parser)]
#[command(version, about = "HTTP server for text generation")]
struct ServerArgs {
    /// Optional configuration file with a `textgen_service` section
    #[arg(short, long)]
    config_path: Option<PathBuf>,

    /// Path to the engine directory, or to its `config.json`
    #[arg(long)]
    engine_path: Option<PathBuf>,

    /// Path to the tokenizer directory, or to its `tokenizer.json`
    #[arg(long)]
    tokenizer_path: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    max_beam_width: Option<usize>,

    /// Seconds an idle keep-alive connection stays open
    #[arg(long)]
    keep_alive_timeout_secs: Option<u64>,
}

impl ServerArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            engine_path: self.engine_path.clone(),
            tokenizer_path: self.tokenizer_path.clone(),
            host: self.host.clone(),
            port: self.port,
            max_beam_width: self.max_beam_width,
            keep_alive_timeout_secs: self.keep_alive_timeout_secs,
        }
    }
}

#[tokio::main]
#[allow(clippy::redundant_pub_crate)]
async fn main() -> Result<()> {
    // A missing .env file is not an error
    dotenvy::dotenv().ok();

    let args = ServerArgs::parse();
    let config = TextgenServiceConfig::load(args.config_path.as_deref(), args.overrides())
        .context("Failed to load textgen-service configuration")?;

    // Keep the guard alive so buffered log lines are flushed on exit
    let _log_guard =
        telemetry::setup_logging(&config.log_directory).context("Failed to setup logging")?;

    info!(
        target = "textgen-server",
        event = "textgen-server-start",
        engine_path = %config.engine_path.display(),
        tokenizer_path = %config.tokenizer_path.display(),
        "Loading generation engine..."
    );
    let engine = EchoEngine::load(
        &config.engine_path,
        &config.tokenizer_path,
        config.max_beam_width,
    )
    .context("Failed to initialize the generation engine")?;

    let bind_address = config.bind_address();
    let tcp_listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {bind_address}"))?;
    info!(
        target = "textgen-server",
        event = "textgen-server-start",
        "Starting the text generation service, on {bind_address}"
    );

    let (shutdown_sender, mut shutdown_receiver) = watch::channel(false);
    let app_state = AppState::new(Arc::new(engine));

    let server_handle = spawn_with_shutdown(
        "textgen-server",
        run_server(
            app_state,
            tcp_listener,
            config.keep_alive_timeout(),
            shutdown_receiver.clone(),
        ),
        shutdown_sender.clone(),
    );

    let ctrl_c = tokio::task::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                info!(
                    target = "textgen-server",
                    event = "textgen-server-stop",
                    "ctrl-c received, sending shutdown signal"
                );
                shutdown_sender
                    .send(true)
                    .context("Failed to send shutdown signal")?;
                result.map_err(anyhow::Error::from)
            }
            _ = shutdown_receiver.changed() => {
                Ok(())
            }
        }
    });

    let (server_result, ctrl_c_result) = try_join!(server_handle, ctrl_c)?;
    info!(
        target = "textgen-server",
        event = "textgen-server-stop",
        "Text generation service stopped"
    );
    server_result.and(ctrl_c_result)
}
