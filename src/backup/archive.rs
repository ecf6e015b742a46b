// fusebackup/src/backup/archive.rs
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use tar::Builder;
use walkdir::WalkDir;

/// Packs a staged export directory into a gzipped tarball.
///
/// Entries are stored relative to `source_dir`, in sorted walk order so that
/// two packs of the same tree produce the same entry sequence.
///
/// # Arguments
/// * `source_dir` - Directory whose contents will be archived.
/// * `archive_dest_path` - Full path of the `.tar.gz` to create (overwritten if present).
///
/// # Returns
/// Path to the created archive file.
pub fn pack_tar_gz(source_dir: &Path, archive_dest_path: &Path) -> Result<PathBuf> {
    if !source_dir.is_dir() {
        anyhow::bail!(
            "Source for archival is not a directory: {}",
            source_dir.display()
        );
    }
    if let Some(parent) = archive_dest_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create parent directory for archive: {}",
                    parent.display()
                )
            })?;
        }
    }

    tracing::info!(
        "🗜 Packing {} into {}",
        source_dir.display(),
        archive_dest_path.display()
    );

    let archive_file = File::create(archive_dest_path).with_context(|| {
        format!(
            "Failed to create archive file: {}",
            archive_dest_path.display()
        )
    })?;
    let mut tar_builder = Builder::new(GzEncoder::new(archive_file, Compression::default()));

    let mut entries = 0usize;
    for entry in WalkDir::new(source_dir).sort_by_file_name() {
        let entry =
            entry.with_context(|| format!("Failed to walk directory: {}", source_dir.display()))?;
        let path = entry.path();
        let name = path.strip_prefix(source_dir).with_context(|| {
            format!(
                "Failed to strip prefix {} from {}",
                source_dir.display(),
                path.display()
            )
        })?;

        if name.as_os_str().is_empty() {
            continue;
        }

        if entry.file_type().is_dir() {
            tar_builder
                .append_dir(name, path)
                .with_context(|| format!("Failed to append directory {} to archive", path.display()))?;
        } else if entry.file_type().is_file() {
            tar_builder.append_path_with_name(path, name).with_context(|| {
                format!(
                    "Failed to append file {} as {} to archive",
                    path.display(),
                    name.display()
                )
            })?;
        }
        entries += 1;
    }

    let encoder = tar_builder.into_inner().with_context(|| {
        format!(
            "Failed to finish tar stream for archive: {}",
            archive_dest_path.display()
        )
    })?;
    encoder.finish().with_context(|| {
        format!(
            "Failed to finish gzip encoding for archive: {}",
            archive_dest_path.display()
        )
    })?;

    tracing::info!(
        "✓ Packed {} entries into {}",
        entries,
        archive_dest_path.display()
    );
    Ok(archive_dest_path.to_path_buf())
}
