// fusebackup/src/backup/retention.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::storage::{EntryKind, FileDirectory};

pub const ARCHIVE_EXTENSION: &str = ".gz";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRecord {
    pub name: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub examined: usize,
    pub deleted: Vec<String>,
}

/// Returns the records to delete so that only the newest `retention` remain.
///
/// Records are ordered oldest first; equal timestamps keep their input order.
pub fn select_for_deletion(mut records: Vec<ArchiveRecord>, retention: usize) -> Vec<ArchiveRecord> {
    records.sort_by_key(|record| record.last_modified);
    let excess = records.len().saturating_sub(retention);
    records.truncate(excess);
    records
}

/// Deletes every archive in `directory` except the `retention` most recently modified.
pub async fn prune_archives(directory: &dyn FileDirectory, retention: usize) -> Result<PruneReport> {
    let entries = directory
        .list_entries()
        .await
        .context("Failed to list remote archives")?;

    let mut records = Vec::new();
    for entry in entries {
        if entry.kind != EntryKind::File || !entry.name.ends_with(ARCHIVE_EXTENSION) {
            continue;
        }
        let last_modified = directory
            .last_modified(&entry.name)
            .await
            .with_context(|| format!("Failed to read properties of {}", entry.name))?;
        records.push(ArchiveRecord {
            name: entry.name,
            last_modified,
        });
    }

    let examined = records.len();
    let to_delete = select_for_deletion(records, retention);

    let mut deleted = Vec::with_capacity(to_delete.len());
    for record in to_delete {
        tracing::info!("Deleting file: {}", record.name);
        directory
            .delete_file(&record.name)
            .await
            .with_context(|| format!("Failed to delete {}", record.name))?;
        deleted.push(record.name);
    }

    if deleted.is_empty() {
        tracing::info!(
            "No archives to delete. The {} newest archives are kept.",
            retention
        );
    } else {
        tracing::info!("🧹 {} old archive(s) deleted successfully.", deleted.len());
    }

    Ok(PruneReport { examined, deleted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::storage::{DirectoryEntry, MockFileDirectory};
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(day as i64)
    }

    fn record(name: &str, day: u32) -> ArchiveRecord {
        ArchiveRecord {
            name: name.to_string(),
            last_modified: at(day),
        }
    }

    /// Mock directory holding `files` (name, day) plus any extra entries.
    fn directory_with(
        files: Vec<(String, u32)>,
        extra: Vec<DirectoryEntry>,
        deleted: Arc<Mutex<Vec<String>>>,
    ) -> MockFileDirectory {
        let mut listing: Vec<DirectoryEntry> =
            files.iter().map(|(name, _)| DirectoryEntry::file(name.clone())).collect();
        listing.extend(extra);
        let times: HashMap<String, DateTime<Utc>> =
            files.into_iter().map(|(name, day)| (name, at(day))).collect();

        let mut directory = MockFileDirectory::new();
        directory
            .expect_list_entries()
            .times(1)
            .returning(move || Ok(listing.clone()));
        directory.expect_last_modified().returning(move |name| {
            times
                .get(name)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("unexpected properties call for {}", name))
        });
        directory.expect_delete_file().returning(move |name| {
            deleted.lock().unwrap().push(name.to_string());
            Ok(())
        });
        directory
    }

    #[test]
    fn test_select_for_deletion_keeps_newest() {
        let records = vec![record("c", 3), record("a", 1), record("d", 4), record("b", 2)];
        let selected = select_for_deletion(records, 2);
        assert_eq!(selected, vec![record("a", 1), record("b", 2)]);
    }

    #[test]
    fn test_select_for_deletion_under_retention() {
        let records = (0..31).map(|i| record(&format!("f{}", i), i)).collect();
        assert!(select_for_deletion(records, 31).is_empty());
        assert!(select_for_deletion(Vec::new(), 31).is_empty());
    }

    #[test]
    fn test_select_for_deletion_ties_keep_listing_order() {
        let records = vec![
            record("oldest", 1),
            record("tie-a", 2),
            record("tie-b", 2),
            record("tie-c", 2),
            record("newest", 3),
        ];
        let selected = select_for_deletion(records, 2);
        let names: Vec<&str> = selected.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["oldest", "tie-a", "tie-b"]);
    }

    #[tokio::test]
    async fn test_prune_forty_archives_deletes_nine_oldest() -> anyhow::Result<()> {
        // listed in a scrambled order; day n is timestamp t(n+1)
        let files: Vec<(String, u32)> = (0..40u32)
            .map(|i| (i * 7) % 40)
            .map(|day| (format!("backup-{:02}-production.tar.gz", day), day))
            .collect();
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let directory = directory_with(files, Vec::new(), deleted.clone());

        let report = prune_archives(&directory, 31).await?;

        let expected: Vec<String> = (0..9)
            .map(|day| format!("backup-{:02}-production.tar.gz", day))
            .collect();
        assert_eq!(report.examined, 40);
        assert_eq!(report.deleted, expected);
        assert_eq!(*deleted.lock().unwrap(), expected);
        Ok(())
    }

    #[tokio::test]
    async fn test_prune_under_retention_deletes_nothing() -> anyhow::Result<()> {
        let files: Vec<(String, u32)> = (0..31u32)
            .map(|day| (format!("backup-{:02}.tar.gz", day), day))
            .collect();
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let directory = directory_with(files, Vec::new(), deleted.clone());

        let report = prune_archives(&directory, 31).await?;
        assert_eq!(report.examined, 31);
        assert!(report.deleted.is_empty());
        assert!(deleted.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_prune_ignores_directories_and_other_files() -> anyhow::Result<()> {
        let files: Vec<(String, u32)> = vec![
            ("old.tar.gz".to_string(), 1),
            ("new.tar.gz".to_string(), 2),
        ];
        let extra = vec![
            DirectoryEntry::directory("archive.gz"),
            DirectoryEntry::file("notes.txt"),
        ];
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let directory = directory_with(files, extra, deleted.clone());

        let report = prune_archives(&directory, 1).await?;
        assert_eq!(report.examined, 2);
        assert_eq!(report.deleted, vec!["old.tar.gz".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_prune_propagates_delete_failure() {
        let mut directory = MockFileDirectory::new();
        directory
            .expect_list_entries()
            .returning(|| Ok(vec![DirectoryEntry::file("a.tar.gz"), DirectoryEntry::file("b.tar.gz")]));
        directory
            .expect_last_modified()
            .returning(|name| Ok(if name == "a.tar.gz" { at(1) } else { at(2) }));
        directory
            .expect_delete_file()
            .returning(|_| Err(anyhow::anyhow!("403 Forbidden")));

        let err = prune_archives(&directory, 1).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to delete a.tar.gz"));
    }
}
