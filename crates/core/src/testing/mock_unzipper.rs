//! Mock unzipper for testing.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::model::{NodeSnapshot, Urn};
use crate::unzip::{extract_dir, UnzipError, Unzipper};

/// Mock implementation of the Unzipper trait.
///
/// Records every archive it is asked to extract without touching the
/// filesystem.
#[derive(Debug, Default)]
pub struct MockUnzipper {
    /// Extracted `(urn, archive)` pairs.
    extracted: Arc<RwLock<Vec<(Urn, PathBuf)>>>,
    /// Node names whose extraction fails.
    failing: Arc<RwLock<HashSet<String>>>,
}

impl MockUnzipper {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recorded_extractions(&self) -> Vec<(Urn, PathBuf)> {
        self.extracted.read().await.clone()
    }

    /// Make extraction of nodes with this name fail.
    pub async fn fail_on(&self, name: &str) {
        self.failing.write().await.insert(name.to_string());
    }
}

#[async_trait]
impl Unzipper for MockUnzipper {
    async fn run(&self, node: &NodeSnapshot, archive: &Path) -> Result<PathBuf, UnzipError> {
        if self.failing.read().await.contains(&node.name) {
            return Err(UnzipError::Archive {
                path: archive.display().to_string(),
                message: "mock failure".to_string(),
            });
        }
        self.extracted
            .write()
            .await
            .push((node.urn, archive.to_path_buf()));
        Ok(extract_dir(archive))
    }
}
