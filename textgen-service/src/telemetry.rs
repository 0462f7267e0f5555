use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::{
    non_blocking,
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

/// The log file name for the text generation server.
const SERVER_LOG_FILE: &str = "textgen-server.log";
/// Filter used when `RUST_LOG` is unset or invalid
const DEFAULT_FILTER: &str = "info,textgen_service=info,textgen_engine=info";

/// Configure logging with JSON formatting, file output, and console output
///
/// Log files are rotated daily under `log_directory`. The returned guard
/// flushes the file writer when dropped and must be kept alive for the
/// duration of the program.
///
/// # Errors
///
/// Returns an error if:
/// - Failed to create the logs directory
/// - Failed to set global default subscriber
pub fn setup_logging<P: AsRef<Path>>(log_directory: P) -> Result<WorkerGuard> {
    let log_directory = log_directory.as_ref();
    std::fs::create_dir_all(log_directory).with_context(|| {
        format!(
            "Failed to create logs directory {}",
            log_directory.display()
        )
    })?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_directory, SERVER_LOG_FILE);
    let (non_blocking, guard) = non_blocking(file_appender);

    let file_layer = fmt::layer()
        .json()
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_span_events(FmtSpan::CLOSE);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to set global default subscriber")?;

    Ok(guard)
}
