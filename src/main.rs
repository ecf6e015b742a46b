//! Daily dataset backup job
//!
//! Exports a Sanity dataset, uploads the archive to an Azure Files share in
//! chunks and prunes archives beyond the retention count.

// fusebackup/src/main.rs
mod backup;
mod config;
mod errors;
mod utils;

use anyhow::Result;
use backup::PruneOutcome;
use config::AppConfig;
use std::env;
use std::process::ExitCode;

/// Main entry point for the backup job
#[tokio::main]
async fn main() -> ExitCode {
    let dotenv_path = dotenv::dotenv().ok();
    initialize_tracing();
    if let Some(path) = dotenv_path {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    match run_app().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("❌ Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn initialize_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_app() -> Result<bool> {
    let app_config = AppConfig::from_env()?;
    tracing::debug!("Configuration: {:?}", app_config);

    let choice = env::args()
        .nth(1)
        .map(|arg| arg.trim().to_string())
        .unwrap_or_else(|| "schedule".to_string());

    match choice.as_str() {
        "1" | "run" => {
            let Some(report) = backup::run_daily_backup(&app_config).await else {
                return Ok(false);
            };
            tracing::info!(
                "✅ Uploaded {} ({} bytes, {} chunks)",
                report.upload.file_name,
                report.upload.size,
                report.upload.chunks
            );
            match &report.prune {
                PruneOutcome::Completed(prune) => tracing::info!(
                    "Retention: {} archives examined, {} deleted",
                    prune.examined,
                    prune.deleted.len()
                ),
                PruneOutcome::Failed(message) => {
                    tracing::warn!("Retention pruning failed: {}", message)
                }
            }
            Ok(true)
        }
        "2" | "schedule" => {
            let config = &app_config;
            utils::schedule::run_daily(move || async move {
                backup::run_daily_backup(config).await;
            })
            .await;
            Ok(true)
        }
        _ => {
            anyhow::bail!(
                "Invalid choice '{}'. Use '1' (run once) or '2' (schedule daily).",
                choice
            );
        }
    }
}
