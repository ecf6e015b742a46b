// fusebackup/src/backup/storage.rs
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirectoryEntry {
    pub fn file(name: impl Into<String>) -> Self {
        DirectoryEntry {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        DirectoryEntry {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }
}

/// One remote directory holding the backup archives.
///
/// All names are relative to the directory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileDirectory: Send + Sync {
    /// Creates (or truncates) `name` with a fixed total size.
    async fn create_file(&self, name: &str, size: u64) -> Result<()>;

    /// Writes `data` into `name` starting at byte `offset`.
    async fn upload_range(&self, name: &str, offset: u64, data: Vec<u8>) -> Result<()>;

    async fn list_entries(&self) -> Result<Vec<DirectoryEntry>>;

    /// Server-assigned last-modified time of `name`.
    async fn last_modified(&self, name: &str) -> Result<DateTime<Utc>>;

    async fn delete_file(&self, name: &str) -> Result<()>;
}
