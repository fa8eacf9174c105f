//! Unpacking downloaded archives.

mod archive;

pub use archive::{extract_dir, ZipUnzipper};

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::model::NodeSnapshot;

#[derive(Debug, Error)]
pub enum UnzipError {
    #[error("archive not found: {0}")]
    NotFound(String),

    #[error("invalid archive {path}: {message}")]
    Archive { path: String, message: String },

    #[error("archive entry escapes target directory: {0}")]
    PathTraversal(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unzip task failed: {0}")]
    Task(String),
}

/// Unpacks a node's downloaded archive.
#[async_trait]
pub trait Unzipper: Send + Sync {
    /// Extract `archive`, returning the directory it was unpacked into.
    async fn run(&self, node: &NodeSnapshot, archive: &Path) -> Result<PathBuf, UnzipError>;
}
