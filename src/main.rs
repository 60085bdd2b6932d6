use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use colored::*;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use llmpal::cli::{run, Cli};
use llmpal::config::Settings;

/// Main entry point for llmpal
///
/// Parses the command line, loads layered settings, sets up file logging and
/// dispatches to the command handlers. Any unrecovered error is printed and
/// turns into a non-zero exit code.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load settings first
    let settings = match Settings::new() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let log_dir = settings
        .logging
        .file
        .clone()
        .unwrap_or_else(|| Path::new("logs").to_path_buf());
    let file_appender = tracing_appender::rolling::RollingFileAppender::new(
        tracing_appender::rolling::Rotation::DAILY,
        &log_dir,
        "llmpal",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.logging.level.to_lowercase()));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        // Disable ANSI colors for cleaner log files
        .with_ansi(false)
        .with_line_number(true)
        .with_file(true)
        .with_thread_ids(true)
        .with_target(false)
        .with_env_filter(filter)
        .init();

    info!("llmpal {} starting", env!("CARGO_PKG_VERSION"));
    info!("Log directory: {}", log_dir.display());
    info!("Models directory: {}", settings.models.directory.display());

    match run(cli, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("{} {:#}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
