//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the orchestrator's
//! collaborator traits, allowing full orchestration runs without network
//! access or a spatial database.
//!
//! # Example
//!
//! ```rust,ignore
//! use opensite_core::testing::{MockCpuHandler, MockDownloader, MockUnzipper};
//!
//! let downloader = Arc::new(MockDownloader::new());
//! let unzipper = Arc::new(MockUnzipper::new());
//! let handler = Arc::new(MockCpuHandler::new());
//!
//! // Configure mock behavior
//! downloader.fail_on("broken-dataset").await;
//! handler.set_duration(Duration::from_millis(10));
//!
//! let orchestrator = Orchestrator::new(config, downloader, unzipper, handler);
//! ```

mod mock_cpu_handler;
mod mock_downloader;
mod mock_unzipper;

pub use mock_cpu_handler::MockCpuHandler;
pub use mock_downloader::MockDownloader;
pub use mock_unzipper::MockUnzipper;

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::catalog::{CatalogDataset, CatalogGroup, CatalogModel, CatalogResource};
    use crate::model::{DatabaseAction, NodeAction, NodeAttrs, NodeType, Tree, Urn};

    /// A small wind site: two categories, three datasets, one buffer
    /// expression.
    pub const WIND_SITE: &str = r##"
title: Wind
height-to-tip: 150
blade-radius: 60
structure:
  landscape:
    - national-parks
    - ancient-woodland
  ecology:
    - hedgerow
style:
  landscape:
    color: "#00FF00"
buffers:
  national-parks: 1.1 * height-to-tip
  hedgerow: 20
"##;

    /// Attributes of a downloadable GPKG source.
    pub fn source_attrs(name: &str) -> NodeAttrs {
        NodeAttrs::default()
            .with_type(NodeType::Source)
            .with_url(format!("https://data.example/{}.gpkg", name))
            .with_format("GPKG")
    }

    /// Add a source under `parent` with action `download`.
    pub fn download_source(tree: &mut Tree, parent: Urn, name: &str) -> Urn {
        let urn = tree
            .add_child(parent, name, source_attrs(name))
            .expect("parent exists");
        tree.set_action(urn, NodeAction::Download)
            .expect("node exists");
        urn
    }

    /// `B` (action `buffer`) depending on `A` (action `download`), both
    /// under the root. Returns `(a, b)`.
    pub fn dependency_pair(tree: &mut Tree) -> (Urn, Urn) {
        let b = tree
            .add_child(
                tree.root(),
                "b",
                NodeAttrs::default().with_database_action(DatabaseAction::Buffer),
            )
            .expect("root exists");
        tree.set_action(b, NodeAction::Buffer).expect("node exists");
        let a = download_source(tree, b, "a");
        (a, b)
    }

    /// One dataset referenced from two branches, sharing a global urn.
    /// Returns `(clone_under_x, clone_under_y)`.
    pub fn clone_pair(tree: &mut Tree) -> (Urn, Urn) {
        let root = tree.root();
        let x = tree
            .add_child(root, "x", NodeAttrs::default().with_type(NodeType::Branch))
            .expect("root exists");
        let y = tree
            .add_child(root, "y", NodeAttrs::default().with_type(NodeType::Branch))
            .expect("root exists");
        let first = download_source(tree, x, "shared");
        let second = download_source(tree, y, "shared");
        tree.assign_global_urns();
        (first, second)
    }

    /// Catalog entries for the datasets of [`WIND_SITE`].
    pub fn wind_catalog() -> CatalogModel {
        let dataset = |name: &str, title: &str| CatalogDataset {
            package_name: name.to_string(),
            title: title.to_string(),
            resources: vec![
                CatalogResource {
                    url: format!("https://data.example/{}.geojson", name),
                    format: "GeoJSON".to_string(),
                },
                CatalogResource {
                    url: format!("https://data.example/{}.gpkg", name),
                    format: "GPKG".to_string(),
                },
            ],
        };

        let mut model = CatalogModel::new();
        model.insert(
            "landscape".to_string(),
            CatalogGroup {
                title: "Landscape".to_string(),
                datasets: vec![
                    dataset("national-parks", "National Parks"),
                    dataset("ancient-woodland", "Ancient Woodland"),
                ],
            },
        );
        model.insert(
            "ecology".to_string(),
            CatalogGroup {
                title: "Ecology".to_string(),
                datasets: vec![dataset("hedgerow", "Hedgerows")],
            },
        );
        model
    }
}
