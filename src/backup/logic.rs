// fusebackup/src/backup/logic.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::export::DatasetExporter;
use super::retention::{PruneReport, prune_archives};
use super::storage::FileDirectory;
use super::upload::{UploadReport, archive_file_name, upload_archive};
use crate::config::AppConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneOutcome {
    Completed(PruneReport),
    /// Pruning failed; the backup itself still counts as successful.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupReport {
    pub upload: UploadReport,
    pub prune: PruneOutcome,
}

/// Export → upload → prune, each step awaited before the next.
///
/// Export and upload failures are returned to the caller. Pruning failures
/// are logged and recorded in the report.
pub async fn perform_backup_orchestration(
    config: &AppConfig,
    exporter: &dyn DatasetExporter,
    directory: &dyn FileDirectory,
    started_at: DateTime<Utc>,
) -> Result<BackupReport> {
    let dataset = &config.sanity.dataset;
    let archive_path = config.archive_path();
    tracing::info!(
        "🚀 Starting backup of dataset {} to {}/{}",
        dataset,
        config.storage.share_name,
        config.storage.directory_name
    );

    exporter
        .export(&archive_path)
        .await
        .with_context(|| format!("Export of dataset {} failed", dataset))?;

    let remote_name = archive_file_name(started_at, dataset);
    let upload = upload_archive(directory, &archive_path, &remote_name, config.chunk_size)
        .await
        .with_context(|| format!("Upload of {} failed", remote_name))?;
    tracing::info!("Finished uploading backup to azure");

    if let Err(e) = tokio::fs::remove_file(&archive_path).await {
        tracing::warn!(
            "Could not remove local archive {}: {}",
            archive_path.display(),
            e
        );
    }

    let prune = match prune_archives(directory, config.retention_count).await {
        Ok(report) => PruneOutcome::Completed(report),
        Err(e) => {
            tracing::error!("Error deleting files: {:#}", e);
            PruneOutcome::Failed(format!("{:#}", e))
        }
    };

    tracing::info!("🎉 Finished backup");
    Ok(BackupReport { upload, prune })
}
