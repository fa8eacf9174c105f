//! Download configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the HTTP downloader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory downloaded files are written to.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Delay between attempts after a transient failure.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Attempts before giving up (0 = retry forever).
    #[serde(default)]
    pub max_attempts: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_dir() -> PathBuf {
    PathBuf::from("build/downloads")
}

fn default_timeout() -> u64 {
    300
}

fn default_retry_delay() -> u64 {
    5
}

fn default_user_agent() -> String {
    format!("opensite/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            timeout_secs: default_timeout(),
            retry_delay_secs: default_retry_delay(),
            max_attempts: 0,
            user_agent: default_user_agent(),
        }
    }
}

impl DownloadConfig {
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    pub fn with_retry(mut self, delay_secs: u64, max_attempts: u32) -> Self {
        self.retry_delay_secs = delay_secs;
        self.max_attempts = max_attempts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DownloadConfig::default();
        assert_eq!(config.dir, PathBuf::from("build/downloads"));
        assert_eq!(config.retry_delay_secs, 5);
        assert_eq!(config.max_attempts, 0);
        assert!(config.user_agent.starts_with("opensite/"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: DownloadConfig = toml::from_str("dir = \"/tmp/dl\"\nmax_attempts = 3").unwrap();
        assert_eq!(config.dir, PathBuf::from("/tmp/dl"));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.timeout_secs, 300);
    }
}
