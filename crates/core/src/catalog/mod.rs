//! Dataset catalog metadata.
//!
//! The catalog maps dataset slugs to titles and download locations. Nodes in
//! the tree are matched to catalog entries by name.

mod apply;
mod ckan;
mod types;

pub use apply::{apply_catalog, choose_priority_resource};
pub use ckan::{CatalogConfig, CkanClient};
pub use types::*;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur when querying a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// API returned an error.
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Client not configured.
    #[error("Client not configured: {0}")]
    NotConfigured(String),
}

/// Source of dataset metadata.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Fetch every dataset that has at least one resource in `formats`.
    /// An empty list keeps all resources.
    async fn query(&self, formats: &[String]) -> Result<CatalogModel, CatalogError>;
}
