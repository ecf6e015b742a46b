use thiserror::Error;

/// Failures reported by the Azure Files REST API.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid storage account key: {0}")]
    InvalidAccountKey(String),

    #[error("Storage request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{operation} on {resource} failed with status {status}: {body}")]
    Status {
        operation: &'static str,
        resource: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Response for {resource} is missing header {header}")]
    MissingHeader {
        resource: String,
        header: &'static str,
    },

    #[error("Invalid timestamp '{value}' for {resource}")]
    InvalidTimestamp { resource: String, value: String },
}

/// Failures reported while exporting a dataset.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Export request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Export of dataset {dataset} failed with status {status}: {body}")]
    Status {
        dataset: String,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Malformed document on line {line}: {source}")]
    MalformedDocument {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Download of asset {url} failed with status {status}")]
    AssetStatus {
        url: String,
        status: reqwest::StatusCode,
    },
}
