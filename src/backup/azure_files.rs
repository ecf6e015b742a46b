// fusebackup/src/backup/azure_files.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ct_codecs::{Base64, Decoder, Encoder};
use hmac::{Hmac, Mac};
use regex::Regex;
use reqwest::Method;
use sha2::Sha256;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use url::Url;

use super::storage::{DirectoryEntry, FileDirectory};
use crate::config::StorageConfig;
use crate::errors::StorageError;

const API_VERSION: &str = "2022-11-02";

static ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(File|Directory)>(.*?)</(?:File|Directory)>").expect("valid entry regex")
});
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Name>([^<]*)</Name>").expect("valid name regex"));
static NEXT_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<NextMarker>([^<]*)</NextMarker>").expect("valid marker regex"));

/// Directory client for the Azure Files REST API, authenticated with SharedKey.
pub struct AzureFileDirectory {
    http: reqwest::Client,
    account_name: String,
    account_key: Vec<u8>,
    directory_url: Url,
}

impl AzureFileDirectory {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let account_key = Base64::decode_to_vec(config.account_key.trim(), None)
            .map_err(|e| StorageError::InvalidAccountKey(format!("{:?}", e)))?;

        let mut directory_url = config.endpoint.clone();
        directory_url
            .path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Storage endpoint cannot be a base URL: {}", config.endpoint))?
            .pop_if_empty()
            .push(&config.share_name)
            .push(&config.directory_name);

        Ok(AzureFileDirectory {
            http: reqwest::Client::new(),
            account_name: config.account_name.clone(),
            account_key,
            directory_url,
        })
    }

    fn file_url(&self, name: &str) -> Result<Url> {
        let mut url = self.directory_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Invalid directory URL: {}", self.directory_url))?
            .push(name);
        Ok(url)
    }

    fn sign(&self, string_to_sign: &str) -> Result<String, StorageError> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.account_key)
            .map_err(|e| StorageError::InvalidAccountKey(e.to_string()))?;
        mac.update(string_to_sign.as_bytes());
        Base64::encode_to_string(mac.finalize().into_bytes())
            .map_err(|e| StorageError::InvalidAccountKey(format!("{:?}", e)))
    }

    /// Sends one signed request and fails on any non-2xx status.
    async fn send(
        &self,
        operation: &'static str,
        method: Method,
        url: Url,
        ms_headers: Vec<(&'static str, String)>,
        body: Vec<u8>,
    ) -> Result<reqwest::Response, StorageError> {
        let mut headers: Vec<(String, String)> = vec![
            ("x-ms-date".to_string(), rfc1123(Utc::now())),
            ("x-ms-version".to_string(), API_VERSION.to_string()),
        ];
        headers.extend(ms_headers.into_iter().map(|(k, v)| (k.to_string(), v)));
        headers.sort();

        let to_sign = string_to_sign(
            method.as_str(),
            body.len(),
            &headers,
            &canonicalized_resource(&self.account_name, &url),
        );
        let signature = self.sign(&to_sign)?;

        let resource = url.path().to_string();
        let mut request = self
            .http
            .request(method, url)
            .header(
                "Authorization",
                format!("SharedKey {}:{}", self.account_name, signature),
            )
            .body(body);
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Status {
                operation,
                resource,
                status,
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl FileDirectory for AzureFileDirectory {
    async fn create_file(&self, name: &str, size: u64) -> Result<()> {
        let url = self.file_url(name)?;
        self.send(
            "Create file",
            Method::PUT,
            url,
            vec![
                ("x-ms-type", "file".to_string()),
                ("x-ms-content-length", size.to_string()),
            ],
            Vec::new(),
        )
        .await?;
        Ok(())
    }

    async fn upload_range(&self, name: &str, offset: u64, data: Vec<u8>) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut url = self.file_url(name)?;
        url.query_pairs_mut().append_pair("comp", "range");
        let end = offset + data.len() as u64 - 1;
        self.send(
            "Put range",
            Method::PUT,
            url,
            vec![
                ("x-ms-range", format!("bytes={}-{}", offset, end)),
                ("x-ms-write", "update".to_string()),
            ],
            data,
        )
        .await
        .with_context(|| format!("Failed to upload bytes {}-{} of {}", offset, end, name))?;
        Ok(())
    }

    async fn list_entries(&self) -> Result<Vec<DirectoryEntry>> {
        let mut entries = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut url = self.directory_url.clone();
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("restype", "directory").append_pair("comp", "list");
                if let Some(marker) = &marker {
                    query.append_pair("marker", marker);
                }
            }

            let response = self
                .send("List directory", Method::GET, url, Vec::new(), Vec::new())
                .await?;
            let body = response.text().await.map_err(StorageError::from)?;
            let (page, next) = parse_listing(&body);
            entries.extend(page);

            match next {
                Some(next) => marker = Some(next),
                None => break,
            }
        }

        Ok(entries)
    }

    async fn last_modified(&self, name: &str) -> Result<DateTime<Utc>> {
        let url = self.file_url(name)?;
        let response = self
            .send("Get file properties", Method::HEAD, url, Vec::new(), Vec::new())
            .await?;

        let value = response
            .headers()
            .get(reqwest::header::LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| StorageError::MissingHeader {
                resource: name.to_string(),
                header: "Last-Modified",
            })?;

        let parsed = DateTime::parse_from_rfc2822(value).map_err(|_| {
            StorageError::InvalidTimestamp {
                resource: name.to_string(),
                value: value.to_string(),
            }
        })?;
        Ok(parsed.with_timezone(&Utc))
    }

    async fn delete_file(&self, name: &str) -> Result<()> {
        let url = self.file_url(name)?;
        self.send("Delete file", Method::DELETE, url, Vec::new(), Vec::new())
            .await?;
        Ok(())
    }
}

fn rfc1123(instant: DateTime<Utc>) -> String {
    instant.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// SharedKey string-to-sign for the File service.
///
/// Content-Length is signed as an empty string when zero. `headers` must be the
/// sorted, lower-cased `x-ms-*` headers.
fn string_to_sign(
    verb: &str,
    content_length: usize,
    headers: &[(String, String)],
    canonicalized_resource: &str,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };
    let canonicalized_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name.to_ascii_lowercase(), value.trim()))
        .collect();

    format!(
        "{}\n\n\n{}\n\n\n\n\n\n\n\n\n{}{}",
        verb, length, canonicalized_headers, canonicalized_resource
    )
}

fn canonicalized_resource(account_name: &str, url: &Url) -> String {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        params
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.into_owned());
    }

    let mut resource = format!("/{}{}", account_name, url.path());
    for (key, mut values) in params {
        values.sort();
        resource.push_str(&format!("\n{}:{}", key, values.join(",")));
    }
    resource
}

/// Parses one page of a "List Directories and Files" response.
fn parse_listing(body: &str) -> (Vec<DirectoryEntry>, Option<String>) {
    let entries = ENTRY_RE
        .captures_iter(body)
        .filter_map(|caps| {
            let name = unescape_xml(NAME_RE.captures(&caps[2])?.get(1)?.as_str());
            Some(match &caps[1] {
                "File" => DirectoryEntry::file(name),
                _ => DirectoryEntry::directory(name),
            })
        })
        .collect();

    let next_marker = NEXT_MARKER_RE
        .captures(body)
        .map(|caps| unescape_xml(&caps[1]))
        .filter(|marker| !marker.is_empty());

    (entries, next_marker)
}

fn unescape_xml(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
