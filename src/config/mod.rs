// fusebackup/src/config/mod.rs
use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use url::Url;

pub const SHARE_NAME: &str = "fusebackups";
pub const DIRECTORY_NAME: &str = "backups";
pub const CHUNK_SIZE: usize = 3_000_000;
pub const RETENTION_COUNT: usize = 31;
pub const ASSET_CONCURRENCY: usize = 12;
pub const SANITY_API_VERSION: &str = "2023-05-03";

// Environment variable names
const ENV_DATASET: &str = "SANITY_STUDIO_DATASET";
const ENV_PROJECT_ID: &str = "SANITY_STUDIO_PROJECT_ID";
const ENV_READ_TOKEN: &str = "SANITY_API_READ_TOKEN";
const ENV_ACCOUNT_NAME: &str = "AZURE_FILES_ACCOUNT_NAME";
const ENV_ACCOUNT_KEY: &str = "AZURE_FILES_ACCOUNT_KEY";
const ENV_TEMP_DIR: &str = "BACKUP_TEMP_DIR";
const ENV_SANITY_API_HOST: &str = "SANITY_API_HOST";
const ENV_AZURE_ENDPOINT: &str = "AZURE_FILES_ENDPOINT";

#[derive(Clone)]
pub struct SanityConfig {
    pub project_id: String,
    pub dataset: String,
    pub read_token: String,
    pub api_host: Url,
}

#[derive(Clone)]
pub struct StorageConfig {
    pub account_name: String,
    pub account_key: String,
    pub endpoint: Url,
    pub share_name: String,
    pub directory_name: String,
}

#[derive(Clone)]
pub struct AppConfig {
    pub sanity: SanityConfig,
    pub storage: StorageConfig,
    pub temp_dir: PathBuf,
    pub chunk_size: usize,
    pub retention_count: usize,
    pub asset_concurrency: usize,
}

// Secrets stay out of Debug output.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("project_id", &self.sanity.project_id)
            .field("dataset", &self.sanity.dataset)
            .field("sanity_api_host", &self.sanity.api_host.as_str())
            .field("account_name", &self.storage.account_name)
            .field("storage_endpoint", &self.storage.endpoint.as_str())
            .field("share_name", &self.storage.share_name)
            .field("directory_name", &self.storage.directory_name)
            .field("temp_dir", &self.temp_dir)
            .field("chunk_size", &self.chunk_size)
            .field("retention_count", &self.retention_count)
            .field("asset_concurrency", &self.asset_concurrency)
            .finish()
    }
}

impl AppConfig {
    /// Builds the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .with_context(|| format!("{} must be set", key))
        };

        let dataset = required(ENV_DATASET)?;
        let project_id = required(ENV_PROJECT_ID)?;
        let read_token = required(ENV_READ_TOKEN)?;
        let account_name = required(ENV_ACCOUNT_NAME)?;
        let account_key = required(ENV_ACCOUNT_KEY)?;

        if dataset.contains(|c: char| !c.is_ascii_alphanumeric() && c != '_' && c != '-') {
            anyhow::bail!(
                "{} contains invalid characters: {}. Only letters, digits, '_' and '-' are allowed.",
                ENV_DATASET,
                dataset
            );
        }

        let api_host = match lookup(ENV_SANITY_API_HOST).filter(|s| !s.trim().is_empty()) {
            Some(host) => Url::parse(host.trim())
                .with_context(|| format!("Invalid {}: {}", ENV_SANITY_API_HOST, host))?,
            None => Url::parse(&format!("https://{}.api.sanity.io", project_id))
                .with_context(|| format!("Invalid {}: {}", ENV_PROJECT_ID, project_id))?,
        };

        let endpoint = match lookup(ENV_AZURE_ENDPOINT).filter(|s| !s.trim().is_empty()) {
            Some(endpoint) => Url::parse(endpoint.trim())
                .with_context(|| format!("Invalid {}: {}", ENV_AZURE_ENDPOINT, endpoint))?,
            None => Url::parse(&format!("https://{}.file.core.windows.net", account_name))
                .with_context(|| format!("Invalid {}: {}", ENV_ACCOUNT_NAME, account_name))?,
        };

        let temp_dir = lookup(ENV_TEMP_DIR)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir);

        Ok(AppConfig {
            sanity: SanityConfig {
                project_id,
                dataset,
                read_token,
                api_host,
            },
            storage: StorageConfig {
                account_name,
                account_key,
                endpoint,
                share_name: SHARE_NAME.to_string(),
                directory_name: DIRECTORY_NAME.to_string(),
            },
            temp_dir,
            chunk_size: CHUNK_SIZE,
            retention_count: RETENTION_COUNT,
            asset_concurrency: ASSET_CONCURRENCY,
        })
    }

    /// Local path the exporter writes the archive to.
    pub fn archive_path(&self) -> PathBuf {
        self.temp_dir.join(format!("{}.tar.gz", self.sanity.dataset))
    }
}
