//! CKAN API client.
//!
//! Uses `package_search`, paging with `start`/`rows` until every package has
//! been seen.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::types::{CatalogDataset, CatalogGroup, CatalogModel, CatalogResource, DEFAULT_GROUP};
use super::{CatalogClient, CatalogError};
use crate::orchestrator::default_format_priority;

/// CKAN client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// CKAN base URL (e.g., "https://data.example.org").
    pub url: String,
    /// API key sent in the Authorization header, if the instance needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Request timeout in seconds (default: 30).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Resource formats to keep, in priority order.
    #[serde(default = "default_format_priority")]
    pub formats: Vec<String>,
    /// Packages requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_timeout() -> u64 {
    30
}

fn default_page_size() -> usize {
    1000
}

/// CKAN API client.
pub struct CkanClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    page_size: usize,
}

impl CkanClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        if config.url.is_empty() {
            return Err(CatalogError::NotConfigured(
                "CKAN url is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            page_size: config.page_size.max(1),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch_page(&self, start: usize) -> Result<PackageSearch, CatalogError> {
        let url = format!("{}/api/3/action/package_search", self.base_url);
        debug!("CKAN package_search: start={}, rows={}", start, self.page_size);

        let mut request = self.client.get(&url).query(&[
            ("start", start.to_string()),
            ("rows", self.page_size.to_string()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let envelope: CkanResponse<PackageSearch> = response.json().await.map_err(|e| {
            CatalogError::ParseError(format!("Failed to parse package_search response: {}", e))
        })?;
        envelope.into_result()
    }
}

#[async_trait]
impl CatalogClient for CkanClient {
    async fn query(&self, formats: &[String]) -> Result<CatalogModel, CatalogError> {
        let mut packages = Vec::new();
        loop {
            let page = self.fetch_page(packages.len()).await?;
            let received = page.results.len();
            packages.extend(page.results);
            if received == 0 || packages.len() >= page.count {
                break;
            }
        }

        let model = build_model(packages, formats);
        info!(
            "Fetched {} group(s), {} dataset(s) from {}",
            model.len(),
            model.values().map(|g| g.datasets.len()).sum::<usize>(),
            self.base_url
        );
        Ok(model)
    }
}

#[derive(Debug, Deserialize)]
struct CkanResponse<T> {
    success: bool,
    result: Option<T>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl<T> CkanResponse<T> {
    fn into_result(self) -> Result<T, CatalogError> {
        match (self.success, self.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(CatalogError::ParseError(format!(
                "CKAN call unsuccessful: {}",
                self.error.map(|e| e.to_string()).unwrap_or_default()
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PackageSearch {
    count: usize,
    #[serde(default)]
    results: Vec<CkanPackage>,
}

#[derive(Debug, Deserialize)]
struct CkanPackage {
    name: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    groups: Vec<CkanGroup>,
    #[serde(default)]
    resources: Vec<CkanResource>,
}

#[derive(Debug, Deserialize)]
struct CkanGroup {
    name: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CkanResource {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    format: Option<String>,
}

fn build_model(packages: Vec<CkanPackage>, formats: &[String]) -> CatalogModel {
    let mut model = CatalogModel::new();

    for package in packages {
        let resources: Vec<CatalogResource> = package
            .resources
            .into_iter()
            .filter_map(|r| {
                let url = r.url?.trim().to_string();
                let format = r.format.unwrap_or_default().trim().to_string();
                if url.is_empty() {
                    return None;
                }
                if !formats.is_empty() && !formats.contains(&format) {
                    return None;
                }
                Some(CatalogResource { url, format })
            })
            .collect();
        if resources.is_empty() {
            continue;
        }

        let dataset = CatalogDataset {
            title: package
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| package.name.clone())
                .trim()
                .to_string(),
            package_name: package.name,
            resources,
        };

        if package.groups.is_empty() {
            model
                .entry(DEFAULT_GROUP.to_string())
                .or_insert_with(|| CatalogGroup {
                    title: DEFAULT_GROUP.to_string(),
                    datasets: Vec::new(),
                })
                .datasets
                .push(dataset);
            continue;
        }

        for group in package.groups {
            let title = group
                .title
                .or(group.display_name)
                .unwrap_or_else(|| group.name.clone());
            model
                .entry(group.name)
                .or_insert_with(|| CatalogGroup {
                    title: title.trim().to_string(),
                    datasets: Vec::new(),
                })
                .datasets
                .push(dataset.clone());
        }
    }

    model
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "success": true,
        "result": {
            "count": 3,
            "results": [
                {
                    "name": "national-parks",
                    "title": " National Parks ",
                    "groups": [{"name": "landscape", "title": "Landscape"}],
                    "resources": [
                        {"url": "https://example.org/parks.geojson", "format": "GeoJSON"},
                        {"url": "https://example.org/parks.gpkg", "format": "GPKG"},
                        {"url": "https://example.org/parks.pdf", "format": "PDF"}
                    ]
                },
                {
                    "name": "roads",
                    "title": "Roads",
                    "groups": [],
                    "resources": [{"url": "https://example.org/roads.gpkg", "format": "GPKG"}]
                },
                {
                    "name": "report",
                    "title": "Report",
                    "groups": [],
                    "resources": [{"url": "https://example.org/report.pdf", "format": "PDF"}]
                }
            ]
        }
    }"#;

    fn formats() -> Vec<String> {
        vec!["GPKG".to_string(), "GeoJSON".to_string()]
    }

    #[test]
    fn test_build_model_groups_and_filters() {
        let response: CkanResponse<PackageSearch> = serde_json::from_str(RESPONSE).unwrap();
        let page = response.into_result().unwrap();
        assert_eq!(page.count, 3);

        let model = build_model(page.results, &formats());
        assert_eq!(model.len(), 2);

        let landscape = &model["landscape"];
        assert_eq!(landscape.title, "Landscape");
        assert_eq!(landscape.datasets.len(), 1);
        assert_eq!(landscape.datasets[0].title, "National Parks");
        assert_eq!(landscape.datasets[0].resources.len(), 2);

        let default = &model[DEFAULT_GROUP];
        let names: Vec<&str> = default.datasets.iter().map(|d| d.package_name.as_str()).collect();
        assert_eq!(names, vec!["roads"]);
    }

    #[test]
    fn test_unsuccessful_response() {
        let response: CkanResponse<PackageSearch> =
            serde_json::from_str(r#"{"success": false, "error": {"message": "nope"}}"#).unwrap();
        let err = response.into_result().unwrap_err();
        assert!(matches!(err, CatalogError::ParseError(msg) if msg.contains("nope")));
    }

    #[test]
    fn test_client_requires_url() {
        let config = CatalogConfig {
            url: String::new(),
            api_key: None,
            timeout_secs: 30,
            formats: formats(),
            page_size: 10,
        };
        assert!(matches!(CkanClient::new(&config), Err(CatalogError::NotConfigured(_))));
    }

    #[test]
    fn test_config_defaults() {
        let config: CatalogConfig = toml::from_str("url = \"https://data.example.org/\"").unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.formats[0], "GPKG");

        let client = CkanClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "https://data.example.org");
    }
}
