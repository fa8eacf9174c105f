use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::catalog::CatalogConfig;
use crate::downloader::DownloadConfig;
use crate::grid::SpatialConfig;
use crate::orchestrator::OrchestratorConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub downloads: DownloadConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub catalog: Option<CatalogConfig>,
    #[serde(default)]
    pub spatial: SpatialConfig,
    /// Site YAML files, one branch each.
    #[serde(default)]
    pub sites: Vec<PathBuf>,
    /// Top-level keys replaced in every site payload.
    #[serde(default)]
    pub overrides: Map<String, Value>,
}

/// Status API configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Keep the status API up after the run.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Registry database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("opensite.db")
}

/// Sanitized config for API responses (secrets hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub downloads: DownloadConfig,
    pub orchestrator: OrchestratorConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<SanitizedCatalogConfig>,
    pub spatial: SpatialConfig,
    pub sites: Vec<PathBuf>,
    pub overrides: Map<String, Value>,
}

/// Sanitized catalog config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedCatalogConfig {
    pub url: String,
    pub api_key_configured: bool,
    pub timeout_secs: u64,
    pub formats: Vec<String>,
    pub page_size: usize,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            downloads: config.downloads.clone(),
            orchestrator: config.orchestrator.clone(),
            catalog: config.catalog.as_ref().map(|c| SanitizedCatalogConfig {
                url: c.url.clone(),
                api_key_configured: c.api_key.as_ref().is_some_and(|k| !k.is_empty()),
                timeout_secs: c.timeout_secs,
                formats: c.formats.clone(),
                page_size: c.page_size,
            }),
            spatial: config.spatial.clone(),
            sites: config.sites.clone(),
            overrides: config.overrides.clone(),
        }
    }
}
