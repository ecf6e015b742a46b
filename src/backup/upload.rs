// fusebackup/src/backup/upload.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::storage::FileDirectory;

/// A contiguous byte range of the archive, in upload order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Pulls fixed-size chunks out of a reader.
///
/// Every chunk except the last is exactly `chunk_size` bytes; the last one
/// holds the remainder. Only one chunk buffer is alive at a time.
pub struct ChunkReader<R> {
    reader: R,
    chunk_size: usize,
    next_index: usize,
    offset: u64,
    exhausted: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        ChunkReader {
            reader,
            chunk_size: chunk_size.max(1),
            next_index: 0,
            offset: 0,
            exhausted: false,
        }
    }

    pub async fn next_chunk(&mut self) -> std::io::Result<Option<Chunk>> {
        if self.exhausted {
            return Ok(None);
        }

        let mut data = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            let read = self.reader.read(&mut data[filled..]).await?;
            if read == 0 {
                self.exhausted = true;
                break;
            }
            filled += read;
        }

        if filled == 0 {
            return Ok(None);
        }
        data.truncate(filled);

        let chunk = Chunk {
            index: self.next_index,
            offset: self.offset,
            data,
        };
        self.next_index += 1;
        self.offset += filled as u64;
        Ok(Some(chunk))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub file_name: String,
    pub size: u64,
    pub chunks: usize,
}

/// Remote name for an archive: `YYYY-MM-DD_HH-MM-SS-<dataset>.tar.gz`.
pub fn archive_file_name(started_at: DateTime<Utc>, dataset: &str) -> String {
    format!("{}-{}.tar.gz", started_at.format("%Y-%m-%d_%H-%M-%S"), dataset)
}

async fn log_directory_listing(dir: &Path) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Could not list {}: {}", dir.display(), e);
            return;
        }
    };
    tracing::info!("Files in {}:", dir.display());
    while let Ok(Some(entry)) = entries.next_entry().await {
        tracing::info!("  {}", entry.file_name().to_string_lossy());
    }
}

/// Uploads a local archive to `remote_name`, one chunk at a time.
///
/// The remote file is created with the archive's full size before the first
/// range is written. A failed range leaves the partially written file behind.
pub async fn upload_archive(
    directory: &dyn FileDirectory,
    archive_path: &Path,
    remote_name: &str,
    chunk_size: usize,
) -> Result<UploadReport> {
    if let Some(parent) = archive_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        log_directory_listing(parent).await;
    }

    let size = tokio::fs::metadata(archive_path)
        .await
        .with_context(|| format!("Failed to read metadata of {}", archive_path.display()))?
        .len();
    tracing::info!("Filesize: {}", size);

    directory
        .create_file(remote_name, size)
        .await
        .with_context(|| format!("Failed to create remote file {}", remote_name))?;
    tracing::info!("Create file {} successfully", remote_name);

    let file = tokio::fs::File::open(archive_path)
        .await
        .with_context(|| format!("Failed to open archive {}", archive_path.display()))?;
    let mut reader = ChunkReader::new(file, chunk_size);

    let mut uploaded = 0u64;
    let mut chunks = 0usize;
    while let Some(chunk) = reader
        .next_chunk()
        .await
        .with_context(|| format!("Failed to read archive {}", archive_path.display()))?
    {
        let length = chunk.data.len() as u64;
        if chunk.offset + length > size {
            anyhow::bail!(
                "Archive {} grew past its reserved size of {} bytes",
                archive_path.display(),
                size
            );
        }
        tracing::debug!(
            "Uploading chunk {} ({} bytes at offset {})",
            chunk.index,
            length,
            chunk.offset
        );
        directory
            .upload_range(remote_name, chunk.offset, chunk.data)
            .await
            .with_context(|| format!("Failed to upload chunk {} of {}", chunk.index, remote_name))?;
        uploaded += length;
        chunks += 1;
    }

    if uploaded != size {
        anyhow::bail!(
            "Uploaded {} bytes of {} but reserved {} bytes",
            uploaded,
            archive_path.display(),
            size
        );
    }

    tracing::info!(
        "✅ Finished uploading {} ({} bytes in {} chunks)",
        remote_name,
        size,
        chunks
    );
    Ok(UploadReport {
        file_name: remote_name.to_string(),
        size,
        chunks,
    })
}
