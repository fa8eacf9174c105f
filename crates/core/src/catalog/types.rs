//! Catalog metadata model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A downloadable file attached to a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogResource {
    pub url: String,
    pub format: String,
}

/// A catalog dataset (CKAN package).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogDataset {
    /// Package slug. Matched against node names.
    pub package_name: String,
    pub title: String,
    #[serde(default)]
    pub resources: Vec<CatalogResource>,
}

/// A catalog group and its datasets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogGroup {
    pub title: String,
    #[serde(default)]
    pub datasets: Vec<CatalogDataset>,
}

/// Group name -> group. Datasets without a group sit under `default`.
pub type CatalogModel = BTreeMap<String, CatalogGroup>;

/// Group that collects datasets with no group of their own.
pub const DEFAULT_GROUP: &str = "default";
