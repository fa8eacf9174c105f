//! HTTP downloader.
//!
//! Files are streamed into a `.tmp` sibling and renamed into place once
//! complete.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT_ENCODING, CONTENT_LENGTH};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::config::DownloadConfig;
use super::traits::{DownloadError, Downloader};
use crate::model::NodeSnapshot;

/// Local file extension for a catalog format.
pub fn file_extension(url: Option<&str>, format: Option<&str>) -> &'static str {
    if crate::model::is_archive(url, format) {
        return "zip";
    }
    match format.map(str::trim) {
        Some("GPKG") => "gpkg",
        Some("ArcGIS GeoServices REST API") | Some("GeoJSON") | Some("WFS") | Some("KML") => {
            "geojson"
        }
        Some("osm-export-tool YML") | Some("Open Site Energy YML") => "yml",
        _ => "dat",
    }
}

/// `<dir>/<database_table or urn>.<ext>`
pub fn local_path(dir: &Path, node: &NodeSnapshot) -> PathBuf {
    let stem = node
        .database_table
        .clone()
        .unwrap_or_else(|| node.urn.to_string());
    dir.join(format!(
        "{}.{}",
        stem,
        file_extension(node.url.as_deref(), node.format.as_deref())
    ))
}

/// Downloads node resources over HTTP with fixed-delay retries.
pub struct HttpDownloader {
    client: Client,
    config: DownloadConfig,
}

impl HttpDownloader {
    pub fn new(config: DownloadConfig) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| DownloadError::Request {
                url: String::new(),
                source: e,
            })?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    async fn fetch_once(&self, url: &str, destination: &Path) -> Result<u64, DownloadError> {
        let tmp_path = tmp_path(destination);
        let result = self.stream_to(url, &tmp_path).await;
        match result {
            Ok(bytes) => {
                tokio::fs::rename(&tmp_path, destination).await?;
                Ok(bytes)
            }
            Err(e) => {
                if tokio::fs::try_exists(&tmp_path).await.unwrap_or(false) {
                    if let Err(rm) = tokio::fs::remove_file(&tmp_path).await {
                        warn!("Failed to remove {}: {}", tmp_path.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }

    async fn stream_to(&self, url: &str, path: &Path) -> Result<u64, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Request {
                url: url.to_string(),
                source: e,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::Request {
                url: url.to_string(),
                source: e,
            })?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

fn tmp_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, node: &NodeSnapshot) -> Result<PathBuf, DownloadError> {
        let url = node
            .url
            .as_deref()
            .ok_or_else(|| DownloadError::MissingUrl(node.name.clone()))?;
        let destination = self.local_path(node);

        if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
            info!(urn = node.urn, "File exists, skipping: {}", destination.display());
            return Ok(destination);
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let delay = Duration::from_secs(self.config.retry_delay_secs);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            info!(urn = node.urn, attempt, "Downloading: {}", url);
            match self.fetch_once(url, &destination).await {
                Ok(bytes) => {
                    debug!(urn = node.urn, "Downloaded {} bytes to {}", bytes, destination.display());
                    return Ok(destination);
                }
                Err(e) if e.is_transient() => {
                    if self.config.max_attempts != 0 && attempt >= self.config.max_attempts {
                        return Err(DownloadError::RetriesExhausted {
                            url: url.to_string(),
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }
                    warn!(
                        urn = node.urn,
                        "Download attempt {} failed: {}, retrying in {:?}", attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn estimate_remote_size(&self, node: &NodeSnapshot) -> Option<u64> {
        let url = node.url.as_deref()?;
        let response = match self
            .client
            .head(url)
            .header(ACCEPT_ENCODING, "identity")
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(urn = node.urn, "Size probe failed for {}: {}", url, e);
                return None;
            }
        };
        if !response.status().is_success() {
            return None;
        }
        response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
    }

    fn local_path(&self, node: &NodeSnapshot) -> PathBuf {
        local_path(&self.config.dir, node)
    }
}
