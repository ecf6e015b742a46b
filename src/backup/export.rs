// fusebackup/src/backup/export.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use url::Url;

use super::archive::pack_tar_gz;
use crate::config::{SANITY_API_VERSION, SanityConfig};
use crate::errors::ExportError;

const IMAGE_ASSET_TYPE: &str = "sanity.imageAsset";
const FILE_ASSET_TYPE: &str = "sanity.fileAsset";

/// Produces a compressed dataset archive at a local path.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DatasetExporter: Send + Sync {
    async fn export(&self, output_path: &Path) -> Result<()>;
}

/// The fields of an exported document this crate cares about.
#[derive(Debug, Deserialize)]
struct DocumentHeader {
    #[serde(rename = "_id")]
    id: Option<String>,
    #[serde(rename = "_type")]
    doc_type: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct AssetRef {
    id: String,
    url: String,
    folder: &'static str,
}

enum LineOutcome {
    Skipped,
    Written(Option<AssetRef>),
}

/// Exports a Sanity dataset through the HTTP export endpoint.
///
/// Documents are streamed into `data.ndjson`; image and file assets are
/// downloaded alongside them and the whole tree is packed as a `.tar.gz`.
pub struct SanityExporter {
    http: reqwest::Client,
    config: SanityConfig,
    asset_concurrency: usize,
}

impl SanityExporter {
    pub fn new(config: &SanityConfig, asset_concurrency: usize) -> Self {
        SanityExporter {
            http: reqwest::Client::new(),
            config: config.clone(),
            asset_concurrency: asset_concurrency.max(1),
        }
    }

    fn export_url(&self) -> Result<Url> {
        self.config
            .api_host
            .join(&format!(
                "v{}/data/export/{}",
                SANITY_API_VERSION, self.config.dataset
            ))
            .with_context(|| {
                format!(
                    "Failed to build export URL from {}",
                    self.config.api_host
                )
            })
    }

    // Only hand the token to Sanity hosts.
    fn should_authenticate(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => {
                Some(host) == self.config.api_host.host_str() || host.ends_with(".sanity.io")
            }
            None => false,
        }
    }

    /// Streams the dataset's documents into `data_path`, returning the assets they reference.
    async fn write_documents(&self, data_path: &Path) -> Result<(usize, Vec<AssetRef>)> {
        let url = self.export_url()?;
        tracing::info!("📥 Exporting dataset {} from {}", self.config.dataset, url);

        let mut response = self
            .http
            .get(url)
            .bearer_auth(&self.config.read_token)
            .send()
            .await
            .map_err(ExportError::from)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExportError::Status {
                dataset: self.config.dataset.clone(),
                status,
                body,
            }
            .into());
        }

        let file = File::create(data_path)
            .await
            .with_context(|| format!("Failed to create {}", data_path.display()))?;
        let mut writer = BufWriter::new(file);

        let mut pending: Vec<u8> = Vec::new();
        let mut line_number = 0usize;
        let mut documents = 0usize;
        let mut assets = Vec::new();

        loop {
            let chunk = response.chunk().await.map_err(ExportError::from)?;
            let finished = chunk.is_none();
            if let Some(bytes) = chunk {
                pending.extend_from_slice(&bytes);
            } else if !pending.is_empty() {
                pending.push(b'\n');
            }

            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                line_number += 1;
                match self
                    .write_document_line(&line[..line.len() - 1], line_number, &mut writer)
                    .await?
                {
                    LineOutcome::Skipped => {}
                    LineOutcome::Written(asset) => {
                        documents += 1;
                        assets.extend(asset);
                    }
                }
            }

            if finished {
                break;
            }
        }

        writer
            .flush()
            .await
            .with_context(|| format!("Failed to flush {}", data_path.display()))?;

        Ok((documents, assets))
    }

    async fn write_document_line(
        &self,
        line: &[u8],
        line_number: usize,
        writer: &mut BufWriter<File>,
    ) -> Result<LineOutcome> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Ok(LineOutcome::Skipped);
        }

        let document: DocumentHeader = serde_json::from_slice(line).map_err(|source| {
            ExportError::MalformedDocument {
                line: line_number,
                source,
            }
        })?;

        if is_system_document(&document) {
            return Ok(LineOutcome::Skipped);
        }

        writer.write_all(line).await.context("Failed to write document")?;
        writer.write_all(b"\n").await.context("Failed to write document")?;

        Ok(LineOutcome::Written(asset_ref(&document)))
    }

    /// Downloads one asset into `<export_dir>/<folder>/<name>` and returns its relative path.
    async fn download_asset(&self, asset: AssetRef, export_dir: &Path) -> Result<(String, String)> {
        let url = Url::parse(&asset.url)
            .with_context(|| format!("Invalid URL for asset {}: {}", asset.id, asset.url))?;
        let file_name = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| asset.id.clone());
        let relative = format!("{}/{}", asset.folder, file_name);
        let destination = export_dir.join(&relative);

        let mut request = self.http.get(url.clone());
        if self.should_authenticate(&url) {
            request = request.bearer_auth(&self.config.read_token);
        }
        let mut response = request.send().await.map_err(ExportError::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExportError::AssetStatus {
                url: asset.url,
                status,
            }
            .into());
        }

        let mut file = File::create(&destination)
            .await
            .with_context(|| format!("Failed to create asset file {}", destination.display()))?;
        while let Some(bytes) = response.chunk().await.map_err(ExportError::from)? {
            file.write_all(&bytes)
                .await
                .with_context(|| format!("Failed to write asset file {}", destination.display()))?;
        }
        file.flush().await?;

        tracing::debug!("Downloaded asset {} to {}", asset.id, relative);
        Ok((asset.id, relative))
    }
}

#[async_trait]
impl DatasetExporter for SanityExporter {
    async fn export(&self, output_path: &Path) -> Result<()> {
        let parent = match output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("Failed to create output directory {}", parent.display()))?;

        let staging = tempfile::Builder::new()
            .prefix("fusebackup-export-")
            .tempdir_in(&parent)
            .with_context(|| format!("Failed to create staging directory in {}", parent.display()))?;

        let export_dir = staging
            .path()
            .join(format!("{}-export", self.config.dataset));
        for folder in ["images", "files"] {
            tokio::fs::create_dir_all(export_dir.join(folder))
                .await
                .with_context(|| format!("Failed to create {} in {}", folder, export_dir.display()))?;
        }

        let (documents, assets) = self.write_documents(&export_dir.join("data.ndjson")).await?;
        tracing::info!(
            "✓ Exported {} documents, downloading {} assets (concurrency {})",
            documents,
            assets.len(),
            self.asset_concurrency
        );

        let downloaded: BTreeMap<String, String> = futures::stream::iter(assets)
            .map(|asset| self.download_asset(asset, &export_dir))
            .buffer_unordered(self.asset_concurrency)
            .try_collect()
            .await?;

        let assets_json = serde_json::to_vec_pretty(&downloaded)?;
        tokio::fs::write(export_dir.join("assets.json"), assets_json)
            .await
            .context("Failed to write assets.json")?;

        let output = output_path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let packed = pack_tar_gz(staging.path(), &output);
            drop(staging);
            packed
        })
        .await
        .context("Archive packing task panicked")??;

        tracing::info!("✅ Dataset archive written to {}", output_path.display());
        Ok(())
    }
}

fn is_system_document(document: &DocumentHeader) -> bool {
    document
        .id
        .as_deref()
        .is_some_and(|id| id.starts_with("_."))
}

fn asset_ref(document: &DocumentHeader) -> Option<AssetRef> {
    let folder = match document.doc_type.as_deref()? {
        IMAGE_ASSET_TYPE => "images",
        FILE_ASSET_TYPE => "files",
        _ => return None,
    };
    Some(AssetRef {
        id: document.id.clone()?,
        url: document.url.clone()?,
        folder,
    })
}
