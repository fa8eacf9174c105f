//! Mock downloader for testing.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::downloader::{DownloadError, Downloader};
use crate::model::{NodeSnapshot, Urn};

/// Mock implementation of the Downloader trait.
///
/// Provides controllable behavior for testing:
/// - Track fetched nodes for assertions
/// - Fail fetches for chosen node names
/// - Answer size probes from a configured table
/// - Simulate transfer time
///
/// # Example
///
/// ```rust,ignore
/// use opensite_core::testing::MockDownloader;
///
/// let downloader = MockDownloader::new();
/// downloader.set_remote_size("parks", Some(1024)).await;
/// downloader.fail_on("broken").await;
///
/// // Run the orchestrator...
///
/// assert_eq!(downloader.fetch_count().await, 3);
/// ```
#[derive(Debug)]
pub struct MockDownloader {
    /// Directory returned paths live under.
    dir: PathBuf,
    /// Urns fetched, in completion order.
    fetched: Arc<RwLock<Vec<Urn>>>,
    /// Node names whose fetch fails.
    failing: Arc<RwLock<HashSet<String>>>,
    /// Remote sizes by node name.
    sizes: Arc<RwLock<HashMap<String, Option<u64>>>>,
    /// Number of size probes answered.
    probes: Arc<AtomicUsize>,
    /// Simulated fetch duration in milliseconds.
    fetch_duration_ms: Arc<RwLock<u64>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Default for MockDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDownloader {
    /// Create a new mock downloader with instant fetches.
    pub fn new() -> Self {
        Self {
            dir: PathBuf::from("/mock/downloads"),
            fetched: Arc::new(RwLock::new(Vec::new())),
            failing: Arc::new(RwLock::new(HashSet::new())),
            sizes: Arc::new(RwLock::new(HashMap::new())),
            probes: Arc::new(AtomicUsize::new(0)),
            fetch_duration_ms: Arc::new(RwLock::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Use a real directory for local paths.
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Get all fetched urns.
    pub async fn recorded_fetches(&self) -> Vec<Urn> {
        self.fetched.read().await.clone()
    }

    /// Get the number of fetches performed.
    pub async fn fetch_count(&self) -> usize {
        self.fetched.read().await.len()
    }

    /// Make fetches of nodes with this name fail.
    pub async fn fail_on(&self, name: &str) {
        self.failing.write().await.insert(name.to_string());
    }

    /// Set the size reported for nodes with this name.
    pub async fn set_remote_size(&self, name: &str, size: Option<u64>) {
        self.sizes.write().await.insert(name.to_string(), size);
    }

    /// Get the number of size probes answered.
    pub async fn size_probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Set the simulated fetch duration.
    pub async fn set_fetch_duration(&self, duration: Duration) {
        *self.fetch_duration_ms.write().await = duration.as_millis() as u64;
    }

    /// Highest number of fetches that ran at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn fetch(&self, node: &NodeSnapshot) -> Result<PathBuf, DownloadError> {
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);

        let duration_ms = *self.fetch_duration_ms.read().await;
        if duration_ms > 0 {
            tokio::time::sleep(Duration::from_millis(duration_ms)).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.failing.read().await.contains(&node.name) {
            return Err(DownloadError::Status {
                url: node.url.clone().unwrap_or_default(),
                status: 404,
            });
        }

        self.fetched.write().await.push(node.urn);
        Ok(self.local_path(node))
    }

    async fn estimate_remote_size(&self, node: &NodeSnapshot) -> Option<u64> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.sizes.read().await.get(&node.name).copied().flatten()
    }

    fn local_path(&self, node: &NodeSnapshot) -> PathBuf {
        crate::downloader::local_path(&self.dir, node)
    }
}
