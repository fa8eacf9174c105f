//! Downloader trait and errors.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::NodeSnapshot;

/// Errors that can occur while fetching a node's data.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The node has no source location.
    #[error("node '{0}' has no url")]
    MissingUrl(String),

    /// Request failed before a response was received.
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// Local filesystem error.
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    /// Transient failures persisted past the attempt limit.
    #[error("gave up on {url} after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
}

impl DownloadError {
    /// Whether retrying after a delay could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Request { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request() || source.is_body()
            }
            DownloadError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Fetches node data to local storage.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch the node's resource, returning the local path.
    async fn fetch(&self, node: &NodeSnapshot) -> Result<PathBuf, DownloadError>;

    /// Remote size in bytes, if the server reports one.
    async fn estimate_remote_size(&self, node: &NodeSnapshot) -> Option<u64>;

    /// Where the node's resource is stored locally.
    fn local_path(&self, node: &NodeSnapshot) -> PathBuf;
}
