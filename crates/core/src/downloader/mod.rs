//! Fetching source datasets.

mod config;
mod http;
mod traits;

pub use config::DownloadConfig;
pub use http::{file_extension, local_path, HttpDownloader};
pub use traits::{DownloadError, Downloader};
