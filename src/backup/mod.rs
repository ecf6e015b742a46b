mod logic;
pub(crate) mod archive;
pub(crate) mod azure_files;
pub(crate) mod export;
pub(crate) mod retention;
pub(crate) mod storage;
pub(crate) mod upload;

use anyhow::Result;
use chrono::Utc;

use crate::config::AppConfig;
use azure_files::AzureFileDirectory;
use export::SanityExporter;

pub use logic::{BackupReport, PruneOutcome};

/// Public entry point for one scheduled backup run.
///
/// Every error is caught and logged here; `None` means the run failed.
pub async fn run_daily_backup(app_config: &AppConfig) -> Option<BackupReport> {
    match run_backup_flow(app_config).await {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::error!("❌ Backup failed: {:#}", e);
            None
        }
    }
}

async fn run_backup_flow(app_config: &AppConfig) -> Result<BackupReport> {
    let started_at = Utc::now();
    let exporter = SanityExporter::new(&app_config.sanity, app_config.asset_concurrency);
    let directory = AzureFileDirectory::new(&app_config.storage)?;

    logic::perform_backup_orchestration(app_config, &exporter, &directory, started_at).await
}
