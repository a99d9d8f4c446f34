//! CML Parser - watches the incoming directory and ingests CML files

use anyhow::Result;
use clap::Parser;
use cml_common::logging::{init_logging, LogConfig, LogLevel};
use cml_parser::{config::Config, orchestrator::ParserService};
use tokio::signal;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cml-parser")]
#[command(author, version, about = "CML telemetry ingestion service")]
struct Cli {
    /// Process files already in the incoming directory, then exit
    #[arg(long)]
    once: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("cml-parser")
        .build()
        // Environment variables take precedence
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = Config::load()?;
    info!(
        incoming = %config.paths.incoming_dir.display(),
        archived = %config.paths.archived_dir.display(),
        quarantine = %config.paths.quarantine_dir.display(),
        enabled = config.enabled,
        "Starting CML parser"
    );

    let stats = ParserService::new(config)
        .run(shutdown_signal(), cli.once)
        .await?;

    info!(
        archived = stats.archived,
        quarantined = stats.quarantined,
        "CML parser stopped"
    );
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing current file before shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing current file before shutdown");
        },
    }
}
