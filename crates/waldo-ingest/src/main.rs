//! Waldo Ingest - image metadata ingestion tool

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use waldo_common::logging::{init_logging, LogConfig, LogLevel};
use waldo_ingest::cli::Cli;
use waldo_ingest::progress::StageBars;
use waldo_ingest::Pipeline;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over flags
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("waldo-ingest")
        .build()
        .with_env_overrides()?;
    let _log_guard = init_logging(&log_config)?;

    let config = cli.to_config()?;
    let summary_path = config.summary_json.clone();

    let mut pipeline = Pipeline::new(config)?;
    if !cli.no_progress {
        pipeline = pipeline.with_progress(StageBars::new().observer());
    }

    let cancel = pipeline.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight items");
            cancel.cancel();
        }
    });

    let summary = pipeline.run().await?;
    summary.log();
    if let Some(path) = summary_path {
        summary.write_json(&path)?;
    }

    if summary.cancelled {
        anyhow::bail!("Run cancelled before every stage completed");
    }

    info!(failed = summary.total_failed(), "Ingestion complete");
    Ok(())
}
